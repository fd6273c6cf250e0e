use std::{
	sync::{Arc, Weak},
	thread::available_parallelism,
	time::Duration,
};

use async_channel as chan;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Semaphore};
use tracing::{error, instrument, trace};

use super::{
	message::{EventSink, QueueEvent},
	progress::{NodeRef, ProgressSnapshot, ProgressTree},
	task::{
		ClosureTask, Dependency, InteractiveClosureTask, IntoTask, ProgressAttachment, Task,
		TaskController, TaskHandle, TaskId, Worktable,
	},
};

mod atomic;
mod runner;
mod status;

pub use atomic::AtomicTaskQueue;
pub use status::Status;

/// How many tasks of a queue may execute at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
	/// Strictly one at a time, started in dispatch order. Enforced
	/// structurally: every task depends on the previously added one.
	SerialFifo,
	/// As many as the machine offers.
	ConcurrentAutomatic,
	/// An explicit cap.
	Concurrent { max: usize },
}

impl ConcurrencyPolicy {
	fn max_concurrent_tasks(self) -> usize {
		match self {
			Self::SerialFifo => 1,
			Self::ConcurrentAutomatic => available_parallelism().map_or_else(
				|e| {
					error!("Failed to get available parallelism: {e:#?}");
					1
				},
				std::num::NonZeroUsize::get,
			),
			Self::Concurrent { max } => {
				assert!(max > 0, "concurrency cap must be positive");
				max
			}
		}
	}
}

/// Subscriber called with `(new, old)` on every status change, always from
/// the queue's single notification channel.
pub type StatusHandler = Box<dyn Fn(&Status, &Status) + Send>;

/// Construction-time configuration of a [`TaskQueue`].
pub struct QueueOptions {
	pub policy: ConcurrencyPolicy,
	/// Label of the queue itself, aggregated alongside task labels.
	pub label: Option<String>,
	/// Start suspended; no task runs until [`TaskQueue::resume`].
	pub initially_suspended: bool,
	/// Reset progress totals to a known baseline whenever the queue drains.
	pub reset_when_idle: bool,
	pub status_handler: Option<StatusHandler>,
}

impl Default for QueueOptions {
	fn default() -> Self {
		Self {
			policy: ConcurrencyPolicy::ConcurrentAutomatic,
			label: None,
			initially_suspended: false,
			reset_when_idle: false,
			status_handler: None,
		}
	}
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
	Completed,
	TimedOut,
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
	pub(crate) task_count: usize,
	/// Bumped on every dispatch; pending idle resets compare against it.
	pub(crate) generation: u64,
	last_added: Option<Dependency>,
	barrier: Option<Dependency>,
	outstanding: Vec<(Dependency, Weak<Worktable>)>,
}

/// State shared between the queue handle, every task runner and the status
/// actor. The `state` mutex is the single source of truth for bookkeeping;
/// the watches exist so waiters don't need to poll it.
#[derive(Debug)]
pub(crate) struct QueueShared {
	pub(crate) policy: ConcurrencyPolicy,
	pub(crate) reset_when_idle: bool,
	pub(crate) tree: Arc<ProgressTree>,
	pub(crate) semaphore: Arc<Semaphore>,
	pub(crate) suspended_tx: watch::Sender<bool>,
	pub(crate) events: EventSink,
	pub(crate) state: Mutex<QueueState>,
	pub(crate) drained_tx: watch::Sender<bool>,
	pub(crate) status_tx: watch::Sender<Status>,
}

/// A queue of tasks executed under a [`ConcurrencyPolicy`], aggregating every
/// task's progress into one weighted tree and deriving a single observable
/// [`Status`].
///
/// Cloning is cheap and clones observe the same queue. Dropping every clone
/// does not stop already dispatched tasks; they keep the internal machinery
/// alive until they finish.
///
/// Must be created and used within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TaskQueue {
	shared: Arc<QueueShared>,
}

impl TaskQueue {
	#[must_use]
	pub fn new(options: QueueOptions) -> Self {
		let QueueOptions {
			policy,
			label,
			initially_suspended,
			reset_when_idle,
			status_handler,
		} = options;

		let (events_tx, events_rx) = chan::unbounded();
		let events = EventSink::new(events_tx);

		let shared = Arc::new(QueueShared {
			policy,
			reset_when_idle,
			tree: ProgressTree::with_sink(0, label, events.clone()),
			semaphore: Arc::new(Semaphore::new(policy.max_concurrent_tasks())),
			suspended_tx: watch::Sender::new(initially_suspended),
			events,
			state: Mutex::new(QueueState::default()),
			drained_tx: watch::Sender::new(true),
			status_tx: watch::Sender::new(Status::Idle),
		});

		status::spawn_status_actor(Arc::downgrade(&shared), events_rx, status_handler);

		if initially_suspended {
			shared.events.emit(QueueEvent::SuspendedChanged);
		}

		Self { shared }
	}

	/// Dispatch a task for execution under this queue's policy.
	pub fn dispatch(&self, task: impl IntoTask) -> TaskHandle {
		self.dispatch_inner(task.into_task(), Vec::new(), false)
	}

	/// Dispatch a task that additionally waits for the given dependencies,
	/// on top of whatever the policy wires in.
	pub fn dispatch_with_dependencies(
		&self,
		task: impl IntoTask,
		dependencies: Vec<Dependency>,
	) -> TaskHandle {
		self.dispatch_inner(task.into_task(), dependencies, false)
	}

	/// Dispatch a plain closure as a task.
	pub fn dispatch_fn(&self, body: impl FnOnce() + Send + 'static) -> TaskHandle {
		self.dispatch(ClosureTask::new(body))
	}

	/// Dispatch a closure that receives its own [`TaskController`] to poll
	/// for cancellation and publish fractional progress.
	pub fn dispatch_interactive(
		&self,
		body: impl FnOnce(&TaskController) + Send + 'static,
	) -> TaskHandle {
		self.dispatch(InteractiveClosureTask::new(body))
	}

	/// Dispatch tasks in order; under [`ConcurrencyPolicy::SerialFifo`] the
	/// serial chain follows the input order. Await the returned handles to
	/// wait for the whole batch.
	pub fn dispatch_many<T: IntoTask>(&self, tasks: Vec<T>) -> Vec<TaskHandle> {
		tasks.into_iter().map(|task| self.dispatch(task)).collect()
	}

	/// Dispatch a barrier: it starts only after every previously dispatched
	/// task has finished, and every task dispatched afterwards waits for it.
	pub fn dispatch_barrier(&self, body: impl FnOnce() + Send + 'static) -> TaskHandle {
		self.dispatch_inner(ClosureTask::new(body).into_task(), Vec::new(), true)
	}

	#[instrument(skip(self, task, dependencies))]
	fn dispatch_inner(
		&self,
		task: Box<dyn Task>,
		mut dependencies: Vec<Dependency>,
		barrier: bool,
	) -> TaskHandle {
		let weight = task.weight().units();
		let label = task.label();
		let foreign_tree = task.progress_tree();

		let worktable = Arc::new(Worktable::new(TaskId::new_v4()));
		let (done_tx, done_rx) = oneshot::channel();

		let progress = {
			let mut state = self.shared.state.lock();

			state.generation = state.generation.wrapping_add(1);

			// Failsafe reset to a known baseline, in case an irregular prior
			// run left stray children behind.
			if self.shared.reset_when_idle && state.task_count == 0 {
				self.shared.tree.reset_to_baseline();
			}

			if self.shared.policy == ConcurrencyPolicy::SerialFifo {
				if let Some(last) = &state.last_added {
					dependencies.push(last.clone());
				}
			}

			if let Some(barrier_dep) = &state.barrier {
				dependencies.push(barrier_dep.clone());
			}

			if barrier {
				dependencies.extend(state.outstanding.iter().map(|(dep, _)| dep.clone()));
			}

			let root = self.shared.tree.root();
			self.shared.tree.reserve(root, weight);

			let progress = if let Some(subtree) = foreign_tree {
				self.shared.tree.graft_child(&subtree, weight);
				ProgressAttachment::Tree(subtree)
			} else {
				ProgressAttachment::Node(NodeRef::new(
					Arc::clone(&self.shared.tree),
					self.shared.tree.add_child(root, 1, weight, label),
				))
			};

			let dependency = Dependency {
				id: worktable.id(),
				done: worktable.done_rx(),
			};

			state.last_added = Some(dependency.clone());
			if barrier {
				state.barrier = Some(dependency.clone());
			}
			state.outstanding.push((dependency, Arc::downgrade(&worktable)));
			state.task_count += 1;

			// Set synchronously so a wait() racing this dispatch can't slip
			// through on a stale drained flag.
			self.shared.drained_tx.send_replace(false);

			progress
		};

		trace!(task_id = %worktable.id(), %weight, "Task dispatched");
		self.shared.events.emit(QueueEvent::TaskAdded);

		runner::spawn_runner(
			Arc::clone(&self.shared),
			runner::TaskWorkState {
				task,
				worktable: Arc::clone(&worktable),
				progress: progress.clone(),
				done_tx,
				dependencies,
			},
		);

		TaskHandle {
			done_rx,
			worktable,
			progress,
		}
	}

	/// Stop starting new tasks. Already executing bodies keep running.
	pub fn suspend(&self) {
		if !self.shared.suspended_tx.send_replace(true) {
			trace!("Queue suspended");
			self.shared.events.emit(QueueEvent::SuspendedChanged);
		}
	}

	pub fn resume(&self) {
		if self.shared.suspended_tx.send_replace(false) {
			trace!("Queue resumed");
			self.shared.events.emit(QueueEvent::SuspendedChanged);
		}
	}

	#[must_use]
	pub fn is_suspended(&self) -> bool {
		*self.shared.suspended_tx.borrow()
	}

	/// Request cooperative cancellation of every outstanding task, pending
	/// and executing alike. Pending tasks finalize without running their
	/// bodies; executing bodies keep going until they check their controller.
	pub fn cancel_all(&self) {
		let worktables = self
			.shared
			.state
			.lock()
			.outstanding
			.iter()
			.filter_map(|(_, weak)| weak.upgrade())
			.collect::<Vec<_>>();

		trace!(task_count = worktables.len(), "Cancelling all tasks");

		for worktable in worktables {
			worktable.cancel();
		}
	}

	/// Resolves once the queue holds no tasks and its progress tree is fully
	/// finished. Resolves immediately on an empty queue.
	pub async fn wait(&self) {
		let mut drained = self.shared.drained_tx.subscribe();
		let _ = drained.wait_for(|drained| *drained).await;
	}

	/// [`wait`](Self::wait), bounded. Never blocks past the given duration.
	pub async fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
		match tokio::time::timeout(timeout, self.wait()).await {
			Ok(()) => WaitOutcome::Completed,
			Err(_) => WaitOutcome::TimedOut,
		}
	}

	#[must_use]
	pub fn status(&self) -> Status {
		self.shared.status_tx.borrow().clone()
	}

	#[must_use]
	pub fn task_count(&self) -> usize {
		self.shared.state.lock().task_count
	}

	/// The queue's progress tree; its root aggregates every outstanding task.
	#[must_use]
	pub fn progress(&self) -> Arc<ProgressTree> {
		Arc::clone(&self.shared.tree)
	}

	#[must_use]
	pub fn progress_snapshot(&self) -> ProgressSnapshot {
		self.shared.tree.root_snapshot()
	}

	#[must_use]
	pub fn policy(&self) -> ConcurrencyPolicy {
		self.shared.policy
	}
}
