use std::{
	fmt,
	future::Future,
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{oneshot, watch};
use tracing::trace;
use uuid::Uuid;

use super::{
	error::Error,
	progress::{NodeRef, ProgressSnapshot, ProgressTree},
};

/// A unique identifier for a task using the [`uuid`](https://docs.rs/uuid) crate.
pub type TaskId = Uuid;

/// Progress weight of a task relative to its queue siblings.
///
/// The named presets span four orders of magnitude so mixed workloads can be
/// ranked without counting units by hand; `Units` declares an exact positive
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
	Shortest,
	Short,
	MediumShort,
	Medium,
	MediumLong,
	Long,
	VeryLong,
	Longest,
	Units(u64),
}

impl Default for Weight {
	fn default() -> Self {
		Self::Medium
	}
}

impl Weight {
	/// The unit count this weight reserves in the queue's progress root.
	///
	/// # Panics
	///
	/// Panics on `Units(0)`; a task with no weight would be invisible to
	/// progress aggregation forever.
	#[must_use]
	pub fn units(self) -> u64 {
		match self {
			Self::Shortest => 1,
			Self::Short => 10,
			Self::MediumShort => 50,
			Self::Medium => 100,
			Self::MediumLong => 200,
			Self::Long => 500,
			Self::VeryLong => 10_000,
			Self::Longest => 100_000,
			Self::Units(units) => {
				assert!(units > 0, "task weight must be positive");
				units
			}
		}
	}
}

/// How a task left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
	/// The task ran its body to completion.
	Completed,
	/// The task was cancelled, before or during its run.
	Cancelled,
}

/// The main trait representing a schedulable unit of work.
///
/// Implementations drive their own body inside [`run`](Self::run); the queue
/// runner handles dependency ordering, the concurrency policy, suspension and
/// finalization. A body that may run for more than a few moments should call
/// [`TaskController::should_abort`] periodically and return early when asked.
///
/// We're currently using the [`async_trait`](https://docs.rs/async-trait)
/// crate to allow dyn async traits, due to a limitation in the Rust language.
#[async_trait]
pub trait Task: Send + 'static {
	/// User-readable label fed into the queue's progress aggregation.
	fn label(&self) -> Option<String> {
		None
	}

	/// Progress weight when added to a queue.
	fn weight(&self) -> Weight {
		Weight::default()
	}

	/// Tasks that carry a whole progress tree of their own (composite tasks)
	/// return it here so the queue grafts it instead of allocating a node.
	fn progress_tree(&self) -> Option<Arc<ProgressTree>> {
		None
	}

	/// The work itself. Call `ctl.should_start()` as the first statement and
	/// return early when it denies the start.
	async fn run(&mut self, ctl: &TaskController);
}

/// A helper trait to convert any type that implements [`Task`] into a
/// [`Box<dyn Task>`], boxing it.
pub trait IntoTask: Send {
	fn into_task(self) -> Box<dyn Task>;
}

impl<T: Task> IntoTask for T {
	fn into_task(self) -> Box<dyn Task> {
		Box::new(self)
	}
}

impl fmt::Debug for Box<dyn Task> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<Task>")
	}
}

/// A synchronous closure wrapped as a task.
///
/// The closure is not cancellable once started and cannot publish progress
/// mid-run; use [`InteractiveClosureTask`] when either is needed.
pub struct ClosureTask {
	label: Option<String>,
	weight: Weight,
	body: Option<Box<dyn FnOnce() + Send>>,
}

impl ClosureTask {
	pub fn new(body: impl FnOnce() + Send + 'static) -> Self {
		Self {
			label: None,
			weight: Weight::default(),
			body: Some(Box::new(body)),
		}
	}

	#[must_use]
	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	#[must_use]
	pub fn with_weight(mut self, weight: Weight) -> Self {
		self.weight = weight;
		self
	}
}

#[async_trait]
impl Task for ClosureTask {
	fn label(&self) -> Option<String> {
		self.label.clone()
	}

	fn weight(&self) -> Weight {
		self.weight
	}

	async fn run(&mut self, ctl: &TaskController) {
		if !ctl.should_start() {
			return;
		}
		if let Some(body) = self.body.take() {
			body();
		}
	}
}

/// A closure task that receives its own [`TaskController`], so the body can
/// poll for cancellation and publish fractional progress while it runs.
pub struct InteractiveClosureTask {
	label: Option<String>,
	weight: Weight,
	body: Option<Box<dyn FnOnce(&TaskController) + Send>>,
}

impl InteractiveClosureTask {
	pub fn new(body: impl FnOnce(&TaskController) + Send + 'static) -> Self {
		Self {
			label: None,
			weight: Weight::default(),
			body: Some(Box::new(body)),
		}
	}

	#[must_use]
	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	#[must_use]
	pub fn with_weight(mut self, weight: Weight) -> Self {
		self.weight = weight;
		self
	}
}

#[async_trait]
impl Task for InteractiveClosureTask {
	fn label(&self) -> Option<String> {
		self.label.clone()
	}

	fn weight(&self) -> Weight {
		self.weight
	}

	async fn run(&mut self, ctl: &TaskController) {
		if !ctl.should_start() {
			return;
		}
		if let Some(body) = self.body.take() {
			body(ctl);
		}
	}
}

/// A future-returning closure wrapped as a task, for bodies that hand work to
/// other executors or await on their own. Queues treat it exactly like a
/// synchronous task through the same state machine.
pub struct AsyncClosureTask {
	label: Option<String>,
	weight: Weight,
	body: Option<Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>>,
}

impl AsyncClosureTask {
	pub fn new<F, Fut>(body: F) -> Self
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		Self {
			label: None,
			weight: Weight::default(),
			body: Some(Box::new(move || Box::pin(body()))),
		}
	}

	#[must_use]
	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	#[must_use]
	pub fn with_weight(mut self, weight: Weight) -> Self {
		self.weight = weight;
		self
	}
}

#[async_trait]
impl Task for AsyncClosureTask {
	fn label(&self) -> Option<String> {
		self.label.clone()
	}

	fn weight(&self) -> Weight {
		self.weight
	}

	async fn run(&mut self, ctl: &TaskController) {
		if !ctl.should_start() {
			return;
		}
		if let Some(body) = self.body.take() {
			body().await;
		}
	}
}

/// Shared bookkeeping of one task's lifecycle: the ready → executing →
/// finished state machine plus the cancelled flag, with watch channels for
/// the completion and cancellation signals.
#[derive(Debug)]
pub(crate) struct Worktable {
	id: TaskId,
	is_executing: AtomicBool,
	is_finished: AtomicBool,
	has_cancelled: AtomicBool,
	done_tx: watch::Sender<bool>,
	cancel_tx: watch::Sender<bool>,
}

impl Worktable {
	pub(crate) fn new(id: TaskId) -> Self {
		Self {
			id,
			is_executing: AtomicBool::new(false),
			is_finished: AtomicBool::new(false),
			has_cancelled: AtomicBool::new(false),
			done_tx: watch::Sender::new(false),
			cancel_tx: watch::Sender::new(false),
		}
	}

	pub(crate) const fn id(&self) -> TaskId {
		self.id
	}

	/// Whether the body should begin: `false` when the task was cancelled
	/// beforehand or when it is somehow re-entered while already executing.
	pub(crate) fn should_start(&self) -> bool {
		if self.has_cancelled.load(Ordering::Acquire) {
			return false;
		}
		!self.is_executing.swap(true, Ordering::AcqRel)
	}

	/// Flip to finished exactly once; later calls are no-ops.
	pub(crate) fn finalize(&self) {
		if !self.is_finished.swap(true, Ordering::AcqRel) {
			self.is_executing.store(false, Ordering::Release);
			self.done_tx.send_replace(true);
		}
	}

	pub(crate) fn cancel(&self) {
		self.has_cancelled.store(true, Ordering::Release);
		self.cancel_tx.send_replace(true);
	}

	pub(crate) fn is_cancelled(&self) -> bool {
		self.has_cancelled.load(Ordering::Acquire)
	}

	pub(crate) fn is_finished(&self) -> bool {
		self.is_finished.load(Ordering::Acquire)
	}

	pub(crate) fn done_rx(&self) -> watch::Receiver<bool> {
		self.done_tx.subscribe()
	}

	pub(crate) fn cancel_rx(&self) -> watch::Receiver<bool> {
		self.cancel_tx.subscribe()
	}
}

/// A completion signal of another task, used to delay a task's start until
/// the referenced task has finished. Serial queues wire these automatically;
/// explicit dependencies come from [`TaskHandle::dependency`].
#[derive(Debug, Clone)]
pub struct Dependency {
	pub(crate) id: TaskId,
	pub(crate) done: watch::Receiver<bool>,
}

impl Dependency {
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.id
	}

	/// Resolves once the referenced task finished. A task whose bookkeeping
	/// is already gone counts as finished.
	pub(crate) async fn finished(mut self) {
		let _ = self.done.wait_for(|done| *done).await;
	}
}

/// How a task's progress is represented inside its queue's tree: a leaf node
/// allocated by the queue, or a whole grafted tree owned by the task itself.
#[derive(Debug, Clone)]
pub(crate) enum ProgressAttachment {
	Node(NodeRef),
	Tree(Arc<ProgressTree>),
	Detached,
}

impl ProgressAttachment {
	pub(crate) fn force_complete(&self, cancelled: bool) {
		match self {
			Self::Node(node) => node.force_complete(cancelled),
			Self::Tree(tree) => tree.force_finish_root(cancelled),
			Self::Detached => {}
		}
	}

	fn snapshot(&self) -> Option<ProgressSnapshot> {
		match self {
			Self::Node(node) => node.snapshot(),
			Self::Tree(tree) => Some(tree.root_snapshot()),
			Self::Detached => None,
		}
	}
}

/// The task's own handle, passed into [`Task::run`] and interactive bodies.
///
/// Exposes the state machine guard, cooperative cancellation checks, and
/// fractional progress updates on the task's own node.
#[derive(Debug)]
pub struct TaskController {
	pub(crate) worktable: Arc<Worktable>,
	pub(crate) progress: ProgressAttachment,
}

impl TaskController {
	pub(crate) fn detached(worktable: Arc<Worktable>) -> Self {
		Self {
			worktable,
			progress: ProgressAttachment::Detached,
		}
	}

	#[must_use]
	pub fn task_id(&self) -> TaskId {
		self.worktable.id()
	}

	/// Whether the body should begin. Returns `false` when the task was
	/// cancelled before starting; the runner still finalizes its progress so
	/// the finished invariant holds.
	#[must_use]
	pub fn should_start(&self) -> bool {
		self.worktable.should_start()
	}

	/// Cooperative cancellation check for long-running bodies: return early
	/// from the body when this turns `true`.
	#[must_use]
	pub fn should_abort(&self) -> bool {
		let cancelled = self.worktable.is_cancelled();
		if cancelled {
			trace!(task_id = %self.worktable.id(), "Task body observed cancellation");
		}
		cancelled
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.worktable.is_cancelled()
	}

	/// Resolves when the task gets cancelled; never resolves otherwise.
	pub async fn cancelled(&self) {
		let mut cancel_rx = self.worktable.cancel_rx();
		let _ = cancel_rx.wait_for(|cancelled| *cancelled).await;
	}

	/// Declare how many units this task's own progress node spans.
	pub fn set_total_units(&self, units: u64) {
		if let ProgressAttachment::Node(node) = &self.progress {
			node.set_total_units(units);
		}
	}

	pub fn set_completed_units(&self, units: u64) {
		if let ProgressAttachment::Node(node) = &self.progress {
			node.set_completed_units(units);
		}
	}

	pub fn add_completed_units(&self, units: u64) {
		if let ProgressAttachment::Node(node) = &self.progress {
			node.add_completed_units(units);
		}
	}

	pub fn set_label(&self, label: Option<String>) {
		if let ProgressAttachment::Node(node) = &self.progress {
			node.set_label(label);
		}
	}
}

/// A handle returned when a task is dispatched; await it to observe the
/// task's [`Termination`], or use it to cancel the task and to wire explicit
/// dependencies.
#[derive(Debug)]
pub struct TaskHandle {
	pub(crate) done_rx: oneshot::Receiver<Termination>,
	pub(crate) worktable: Arc<Worktable>,
	pub(crate) progress: ProgressAttachment,
}

impl Future for TaskHandle {
	type Output = Result<Termination, Error>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let id = self.worktable.id();
		Pin::new(&mut self.done_rx)
			.poll(cx)
			.map(|res| res.map_err(|_| Error::TaskJoin(id)))
	}
}

impl TaskHandle {
	#[must_use]
	pub fn task_id(&self) -> TaskId {
		self.worktable.id()
	}

	/// Request cooperative cancellation. A pending task will finalize without
	/// running its body; a running body keeps going until it checks
	/// [`TaskController::should_abort`].
	pub fn cancel(&self) {
		trace!(task_id = %self.worktable.id(), "Cancelling task");
		self.worktable.cancel();
	}

	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.worktable.is_finished()
	}

	/// A completion signal other dispatches can wait on.
	#[must_use]
	pub fn dependency(&self) -> Dependency {
		Dependency {
			id: self.worktable.id(),
			done: self.worktable.done_rx(),
		}
	}

	/// Unit counts of this task's progress, when it is attached to a queue.
	#[must_use]
	pub fn progress(&self) -> Option<ProgressSnapshot> {
		self.progress.snapshot()
	}
}
