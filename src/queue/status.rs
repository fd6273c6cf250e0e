use std::{
	fmt,
	pin::pin,
	sync::{Arc, Weak},
	time::Duration,
};

use async_channel as chan;
use futures::StreamExt;
use tokio::{spawn, time::sleep};
use tracing::trace;

use super::{
	super::{message::QueueEvent, progress::ProgressTree},
	QueueShared, StatusHandler,
};

/// How long a drained queue stays untouched before its progress is reset to
/// the baseline. Restarted on every drain; abandoned when new work arrives.
const IDLE_RESET_DEBOUNCE: Duration = Duration::from_millis(200);

/// The externally observed state of a queue.
///
/// A pure function of the suspended flag, the outstanding task count and the
/// progress tree, recomputed by the status actor on every change event.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
	/// The queue is empty and all progress is accounted for.
	Idle,
	/// The queue is suspended; there may or may not be pending tasks.
	Paused,
	/// One or more tasks are outstanding.
	InProgress {
		/// Aggregate completion between `0.0..=1.0`.
		fraction: f64,
		/// Deep label aggregated over every active task, nested queues
		/// included.
		label: Option<String>,
		/// Displayable description of the current state.
		description: String,
	},
}

impl Status {
	#[must_use]
	pub const fn is_in_progress(&self) -> bool {
		matches!(self, Self::InProgress { .. })
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Idle => write!(f, "idle"),
			Self::Paused => write!(f, "paused"),
			Self::InProgress {
				fraction,
				label,
				description,
			} => {
				if let Some(label) = label {
					write!(f, "{fraction} [{label}] \"{description}\"")
				} else {
					write!(f, "{fraction} \"{description}\"")
				}
			}
		}
	}
}

fn derive_status(suspended: bool, task_count: usize, tree: &ProgressTree) -> Status {
	if suspended {
		Status::Paused
	} else if task_count == 0 && tree.is_finished() {
		Status::Idle
	} else {
		let fraction = tree.fraction();
		Status::InProgress {
			fraction,
			label: tree.root_deep_label(),
			description: format!("{:.0}% completed", fraction * 100.0),
		}
	}
}

/// The single consumer of a queue's event channel.
///
/// Serializing every recomputation and subscriber notification through this
/// one loop guarantees `(new, old)` pairs are delivered in order and never
/// interleaved. The actor holds only a weak reference, so it winds down when
/// the queue and its runners are gone and the channel closes.
pub(super) fn spawn_status_actor(
	shared: Weak<QueueShared>,
	events_rx: chan::Receiver<QueueEvent>,
	handler: Option<StatusHandler>,
) {
	spawn(async move {
		let mut current = Status::Idle;
		let mut events = pin!(events_rx);

		while let Some(event) = events.next().await {
			let Some(shared) = shared.upgrade() else {
				break;
			};

			let new_status = {
				let state = shared.state.lock();
				let suspended = *shared.suspended_tx.borrow();
				let new_status = derive_status(suspended, state.task_count, &shared.tree);

				// Both watches are updated under the state lock so a
				// concurrent dispatch can never be overwritten with a stale
				// "drained" observation; the status watch goes first so a
				// waiter woken by the drained flag reads the final status.
				if new_status != current {
					shared.status_tx.send_replace(new_status.clone());
				}

				shared
					.drained_tx
					.send_replace(state.task_count == 0 && shared.tree.is_finished());

				new_status
			};

			if new_status != current {
				trace!(?event, old = %current, new = %new_status, "Queue status changed");

				if let Some(handler) = &handler {
					handler(&new_status, &current);
				}

				if new_status == Status::Idle && shared.reset_when_idle {
					schedule_idle_reset(&shared);
				}

				current = new_status;
			}
		}
	});
}

/// Schedules the debounced post-drain reset. The dispatch generation captured
/// here invalidates the reset if any task arrives while the timer runs.
fn schedule_idle_reset(shared: &Arc<QueueShared>) {
	let generation = shared.state.lock().generation;
	let shared = Arc::downgrade(shared);

	spawn(async move {
		sleep(IDLE_RESET_DEBOUNCE).await;

		let Some(shared) = shared.upgrade() else {
			return;
		};

		let undisturbed = {
			let state = shared.state.lock();
			state.task_count == 0 && state.generation == generation
		};

		if undisturbed {
			trace!("Resetting progress to baseline after queue drain");
			shared.tree.reset_idle();
		}
	});
}
