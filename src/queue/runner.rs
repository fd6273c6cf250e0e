use std::sync::Arc;

use tokio::{
	spawn,
	sync::{oneshot, OwnedSemaphorePermit},
};
use tracing::{instrument, trace, Instrument};

use super::{
	super::{
		message::QueueEvent,
		task::{Dependency, ProgressAttachment, Task, TaskController, Termination, Worktable},
	},
	QueueShared,
};

/// Everything a runner needs to drive one task from pending to finished.
pub(super) struct TaskWorkState {
	pub(super) task: Box<dyn Task>,
	pub(super) worktable: Arc<Worktable>,
	pub(super) progress: ProgressAttachment,
	pub(super) done_tx: oneshot::Sender<Termination>,
	pub(super) dependencies: Vec<Dependency>,
}

pub(super) fn spawn_runner(shared: Arc<QueueShared>, work: TaskWorkState) {
	spawn(drive(shared, work).in_current_span());
}

/// Drives a single task: waits for its dependencies, for the queue to be
/// running and for a concurrency permit, then runs the body and finalizes.
///
/// Cancellation short-circuits the waiting phase but never the body call: a
/// cancelled task still executes its start path, where `should_start` denies
/// the actual work, so its progress always reaches the finished state instead
/// of being silently dropped.
#[instrument(skip(shared, work), fields(task_id = %work.worktable.id()))]
async fn drive(shared: Arc<QueueShared>, work: TaskWorkState) {
	let TaskWorkState {
		mut task,
		worktable,
		progress,
		done_tx,
		dependencies,
	} = work;

	let mut permit = None;

	if !worktable.is_cancelled() {
		let mut cancel_rx = worktable.cancel_rx();

		tokio::select! {
			acquired = acquire_start_slot(&shared, dependencies) => permit = Some(acquired),
			_ = cancel_rx.wait_for(|cancelled| *cancelled) => {
				trace!("Task cancelled while waiting to start");
			}
		}
	}

	let ctl = TaskController {
		worktable: Arc::clone(&worktable),
		progress: progress.clone(),
	};

	task.run(&ctl).await;

	drop(task);
	drop(permit);

	let cancelled = worktable.is_cancelled();

	// Completed units always reach the total here, cancelled or not, so the
	// node is released from every ancestor's aggregation.
	progress.force_complete(cancelled);
	worktable.finalize();

	{
		let mut state = shared.state.lock();
		state.task_count -= 1;
		state
			.outstanding
			.retain(|(_, weak)| weak.upgrade().is_some_and(|worktable| !worktable.is_finished()));
	}

	shared.events.emit(QueueEvent::TaskFinished);

	let termination = if cancelled {
		Termination::Cancelled
	} else {
		Termination::Completed
	};

	if done_tx.send(termination).is_err() {
		trace!("Task handle dropped before observing termination");
	}
}

/// The gate sequence in front of every task body: dependency completions
/// first, then the suspension flag, then a permit from the policy semaphore.
/// Serial queues are already ordered by their dependency chain; the single
/// permit mirrors the policy's one-worker bound.
async fn acquire_start_slot(
	shared: &QueueShared,
	dependencies: Vec<Dependency>,
) -> OwnedSemaphorePermit {
	for dependency in dependencies {
		dependency.finished().await;
	}

	let mut suspended = shared.suspended_tx.subscribe();
	let _ = suspended.wait_for(|suspended| !*suspended).await;

	Arc::clone(&shared.semaphore)
		.acquire_owned()
		.await
		.expect("queue semaphore is never closed")
}
