//!
//! # Atomic Task Queue
//!
//! Task queues with pluggable concurrency policies, hierarchical weighted
//! progress aggregation and a lock-guarded value shared by every task.
//!
//! Dispatch closures or [`Task`] implementations onto a queue and the library
//! handles the rest:
//! - Serial FIFO execution enforced structurally through dependency edges, or
//!   concurrent execution with an automatic or explicit cap;
//! - A weighted progress tree per queue, aggregating fractional completion
//!   and user-readable labels across arbitrarily nested queues;
//! - A single derived [`Status`] (idle, paused or in-progress) delivered to
//!   a subscriber through one serialized notification channel;
//! - Cooperative, non-throwing cancellation where even a task cancelled
//!   before starting still drives its progress to the finished state;
//! - [`CompositeTask`]: a whole concurrent sub-pipeline consumable as one
//!   task, nestable to arbitrary depth.
//!
//! ## Basic example
//!
//! ```
//! use atomic_task_queue::{AtomicTaskQueue, ConcurrencyPolicy, QueueOptions, Termination};
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = AtomicTaskQueue::new(
//!         QueueOptions {
//!             policy: ConcurrencyPolicy::SerialFifo,
//!             ..QueueOptions::default()
//!         },
//!         0u32,
//!     );
//!
//!     let handle = queue.dispatch(|access| access.mutate(|value| *value += 1));
//!
//!     assert!(matches!(handle.await, Ok(Termination::Completed)));
//!
//!     queue.wait().await;
//!     assert_eq!(queue.with_value(|value| *value), 1);
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod composite;
mod error;
mod message;
mod progress;
mod queue;
mod task;
mod value;

pub use composite::CompositeTask;
pub use error::Error;
pub use progress::{NodeId, NodeRef, ProgressSnapshot, ProgressTree};
pub use queue::{
	AtomicTaskQueue, ConcurrencyPolicy, QueueOptions, Status, StatusHandler, TaskQueue,
	WaitOutcome,
};
pub use task::{
	AsyncClosureTask, ClosureTask, Dependency, InteractiveClosureTask, IntoTask, Task,
	TaskController, TaskHandle, TaskId, Termination, Weight,
};
