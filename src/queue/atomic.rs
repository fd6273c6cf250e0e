use std::{sync::Arc, time::Duration};

use super::{
	super::{
		progress::{ProgressSnapshot, ProgressTree},
		task::{
			ClosureTask, Dependency, InteractiveClosureTask, IntoTask, TaskController, TaskHandle,
		},
		value::{AtomicValue, ValueAccess},
	},
	QueueOptions, Status, TaskQueue, WaitOutcome,
};

/// A [`TaskQueue`] whose tasks share one mutable value of type `T`, passed
/// into every body as a [`ValueAccess`] proxy.
///
/// The proxies hold only a non-owning reference; once every clone of the
/// queue is gone, outstanding proxies turn into no-ops instead of keeping the
/// value alive.
///
/// For full control over weight, label or dependencies, build a task
/// explicitly and capture [`access`](Self::access):
///
/// ```
/// use atomic_task_queue::{AtomicTaskQueue, ClosureTask, QueueOptions, Weight};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = AtomicTaskQueue::new(QueueOptions::default(), 0u64);
///
/// let access = queue.access();
/// queue.dispatch_task(
///     ClosureTask::new(move || access.mutate(|value| *value += 10))
///         .with_label("bump")
///         .with_weight(Weight::Short),
/// );
///
/// queue.wait().await;
/// assert_eq!(queue.with_value(|value| *value), 10);
/// # }
/// ```
#[derive(Debug)]
pub struct AtomicTaskQueue<T> {
	queue: TaskQueue,
	value: Arc<AtomicValue<T>>,
}

impl<T> Clone for AtomicTaskQueue<T> {
	fn clone(&self) -> Self {
		Self {
			queue: self.queue.clone(),
			value: Arc::clone(&self.value),
		}
	}
}

impl<T: Send + 'static> AtomicTaskQueue<T> {
	#[must_use]
	pub fn new(options: QueueOptions, initial_value: T) -> Self {
		Self {
			queue: TaskQueue::new(options),
			value: Arc::new(AtomicValue::new(initial_value)),
		}
	}

	/// A fresh proxy to the shared value.
	#[must_use]
	pub fn access(&self) -> ValueAccess<T> {
		ValueAccess::new(Arc::downgrade(&self.value))
	}

	/// Mutate the shared value directly, outside of any task.
	pub fn with_value<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		self.value.with(f)
	}

	/// Dispatch a closure operating on the shared value.
	pub fn dispatch(&self, body: impl FnOnce(&ValueAccess<T>) + Send + 'static) -> TaskHandle {
		let access = self.access();
		self.queue.dispatch(ClosureTask::new(move || body(&access)))
	}

	/// Dispatch a closure receiving its own [`TaskController`] alongside the
	/// shared value, so it can poll for cancellation and publish progress.
	pub fn dispatch_interactive(
		&self,
		body: impl FnOnce(&TaskController, &ValueAccess<T>) + Send + 'static,
	) -> TaskHandle {
		let access = self.access();
		self.queue
			.dispatch(InteractiveClosureTask::new(move |ctl| body(ctl, &access)))
	}

	/// Dispatch a barrier closure; see [`TaskQueue::dispatch_barrier`].
	pub fn dispatch_barrier(
		&self,
		body: impl FnOnce(&ValueAccess<T>) + Send + 'static,
	) -> TaskHandle {
		let access = self.access();
		self.queue.dispatch_barrier(move || body(&access))
	}

	/// Dispatch any [`Task`](crate::Task), composite tasks included.
	pub fn dispatch_task(&self, task: impl IntoTask) -> TaskHandle {
		self.queue.dispatch(task)
	}

	pub fn dispatch_task_with_dependencies(
		&self,
		task: impl IntoTask,
		dependencies: Vec<Dependency>,
	) -> TaskHandle {
		self.queue.dispatch_with_dependencies(task, dependencies)
	}

	pub fn dispatch_many<U: IntoTask>(&self, tasks: Vec<U>) -> Vec<TaskHandle> {
		self.queue.dispatch_many(tasks)
	}

	pub fn suspend(&self) {
		self.queue.suspend();
	}

	pub fn resume(&self) {
		self.queue.resume();
	}

	#[must_use]
	pub fn is_suspended(&self) -> bool {
		self.queue.is_suspended()
	}

	pub fn cancel_all(&self) {
		self.queue.cancel_all();
	}

	pub async fn wait(&self) {
		self.queue.wait().await;
	}

	pub async fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
		self.queue.wait_timeout(timeout).await
	}

	#[must_use]
	pub fn status(&self) -> Status {
		self.queue.status()
	}

	#[must_use]
	pub fn task_count(&self) -> usize {
		self.queue.task_count()
	}

	#[must_use]
	pub fn progress(&self) -> Arc<ProgressTree> {
		self.queue.progress()
	}

	#[must_use]
	pub fn progress_snapshot(&self) -> ProgressSnapshot {
		self.queue.progress_snapshot()
	}

	/// Consume the queue and take the shared value back out.
	///
	/// # Panics
	///
	/// Panics if another clone of this queue is still alive.
	pub(crate) fn into_value(self) -> T {
		let Self { queue, value } = self;
		drop(queue);

		match Arc::try_unwrap(value) {
			Ok(value) => value.into_inner(),
			Err(_) => panic!("shared value still referenced by another queue clone"),
		}
	}
}
