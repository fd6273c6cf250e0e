use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::{
	progress::ProgressTree,
	queue::{AtomicTaskQueue, ConcurrencyPolicy, QueueOptions, Status},
	task::{IntoTask, Task, TaskController, TaskHandle, TaskId, Weight, Worktable},
	value::ValueAccess,
};

/// A [`Task`] that privately owns a whole [`AtomicTaskQueue`], exposing an
/// arbitrarily complex concurrent sub-pipeline as one unit: its `run` returns
/// only once every internal task has finished.
///
/// The internal queue starts suspended; populate it up front (or from the
/// setup closure), then dispatch the composite into any queue, or
/// [`start`](Self::start) it standalone. Composites nest to arbitrary depth,
/// and their internal progress tree is grafted into the host queue's
/// aggregation.
///
/// ```
/// use atomic_task_queue::{CompositeTask, ConcurrencyPolicy};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut composite = CompositeTask::new(ConcurrencyPolicy::SerialFifo, 2);
/// composite.dispatch(|access| access.mutate(|value| *value += 1));
/// composite.dispatch(|access| access.mutate(|value| *value += 1));
/// composite.set_completion(|access| access.mutate(|value| *value *= 10));
///
/// assert_eq!(composite.start().await, 40);
/// # }
/// ```
pub struct CompositeTask<T: Send + 'static> {
	queue: Option<AtomicTaskQueue<T>>,
	setup: Option<SetupFn<T>>,
	completion: Option<CompletionFn<T>>,
	weight: Weight,
}

type SetupFn<T> = Box<dyn FnOnce(&TaskController, &AtomicTaskQueue<T>) + Send>;
type CompletionFn<T> = Box<dyn FnOnce(&ValueAccess<T>) + Send>;

impl<T: Send + 'static> CompositeTask<T> {
	#[must_use]
	pub fn new(policy: ConcurrencyPolicy, initial_value: T) -> Self {
		Self {
			queue: Some(AtomicTaskQueue::new(
				QueueOptions {
					policy,
					initially_suspended: true,
					..QueueOptions::default()
				},
				initial_value,
			)),
			setup: None,
			completion: None,
			weight: Weight::default(),
		}
	}

	fn queue(&self) -> &AtomicTaskQueue<T> {
		self.queue
			.as_ref()
			.expect("composite task queue is only taken on start")
	}

	#[must_use]
	pub fn with_label(self, label: impl Into<String>) -> Self {
		let tree = self.queue().progress();
		tree.set_label(tree.root(), Some(label.into()));
		self
	}

	#[must_use]
	pub fn with_weight(mut self, weight: Weight) -> Self {
		self.weight = weight;
		self
	}

	/// A closure run when the composite starts, before the internal queue is
	/// released; it receives the composite's own controller and its queue, so
	/// it can still populate or inspect the pipeline.
	pub fn set_setup(&mut self, setup: impl FnOnce(&TaskController, &AtomicTaskQueue<T>) + Send + 'static) {
		self.setup = Some(Box::new(setup));
	}

	/// A closure run with access to the final shared value, after the
	/// internal queue drained and before the composite finalizes. Skipped
	/// when the composite is cancelled.
	pub fn set_completion(&mut self, completion: impl FnOnce(&ValueAccess<T>) + Send + 'static) {
		self.completion = Some(Box::new(completion));
	}

	/// Queue a closure operating on the shared value into the internal queue.
	pub fn dispatch(&self, body: impl FnOnce(&ValueAccess<T>) + Send + 'static) -> TaskHandle {
		self.queue().dispatch(body)
	}

	pub fn dispatch_interactive(
		&self,
		body: impl FnOnce(&TaskController, &ValueAccess<T>) + Send + 'static,
	) -> TaskHandle {
		self.queue().dispatch_interactive(body)
	}

	pub fn dispatch_barrier(
		&self,
		body: impl FnOnce(&ValueAccess<T>) + Send + 'static,
	) -> TaskHandle {
		self.queue().dispatch_barrier(body)
	}

	/// Queue any task, nested composites included.
	pub fn dispatch_task(&self, task: impl IntoTask) -> TaskHandle {
		self.queue().dispatch_task(task)
	}

	#[must_use]
	pub fn access(&self) -> ValueAccess<T> {
		self.queue().access()
	}

	pub fn with_value<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		self.queue().with_value(f)
	}

	#[must_use]
	pub fn task_count(&self) -> usize {
		self.queue().task_count()
	}

	#[must_use]
	pub fn status(&self) -> Status {
		self.queue().status()
	}

	/// Cancel every task currently in the internal queue and mark the
	/// internal progress cancelled. When the composite was dispatched into a
	/// host queue, prefer cancelling its [`TaskHandle`], which also
	/// short-circuits the composite itself.
	pub fn cancel(&self) {
		let queue = self.queue();
		queue.cancel_all();
		queue.progress().mark_root_cancelled();
	}

	/// Run the composite standalone, outside of any queue, returning the
	/// final shared value once every internal task has finished.
	pub async fn start(mut self) -> T {
		let worktable = Arc::new(Worktable::new(TaskId::new_v4()));
		let ctl = TaskController::detached(Arc::clone(&worktable));

		self.run(&ctl).await;

		let queue = self
			.queue
			.take()
			.expect("composite task queue is only taken on start");

		queue.progress().force_finish_root(worktable.is_cancelled());
		worktable.finalize();

		drop(self);
		queue.into_value()
	}

	async fn cancel_internal(queue: &AtomicTaskQueue<T>) {
		trace!("Cancelling composite task's internal queue");

		queue.cancel_all();
		queue.progress().mark_root_cancelled();
		queue.resume();
		queue.wait().await;
	}
}

#[async_trait]
impl<T: Send + 'static> Task for CompositeTask<T> {
	fn label(&self) -> Option<String> {
		let tree = self.queue().progress();
		tree.label(tree.root())
	}

	fn weight(&self) -> Weight {
		self.weight
	}

	fn progress_tree(&self) -> Option<Arc<ProgressTree>> {
		Some(self.queue().progress())
	}

	async fn run(&mut self, ctl: &TaskController) {
		let setup = self.setup.take();
		let mut completion = self.completion.take();
		let queue = self
			.queue
			.as_ref()
			.expect("composite task queue is only taken on start");

		if !ctl.should_start() {
			Self::cancel_internal(queue).await;
			return;
		}

		if let Some(setup) = setup {
			setup(ctl, queue);
		}

		if queue.task_count() == 0 {
			return;
		}

		queue.resume();

		tokio::select! {
			() = queue.wait() => {
				if let Some(completion) = completion.take() {
					completion(&queue.access());
				}
			}
			() = ctl.cancelled() => {
				Self::cancel_internal(queue).await;
			}
		}
	}
}

impl<T: Send + 'static> Drop for CompositeTask<T> {
	/// An unstarted composite holds pending internal tasks parked on its
	/// suspended queue; release them through the cancellation path so their
	/// progress still reaches the finished state.
	fn drop(&mut self) {
		if let Some(queue) = &self.queue {
			queue.cancel_all();
			queue.resume();
		}
	}
}
