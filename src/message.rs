use async_channel as chan;

/// Change events published by every queue mutation and consumed by the
/// status derivation actor, which is the single subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueEvent {
	TaskAdded,
	TaskFinished,
	SuspendedChanged,
	ProgressChanged,
}

/// A cloneable handle used to publish [`QueueEvent`]s from synchronous code,
/// like progress tree mutations happening under a mutex.
///
/// A detached sink (used by progress trees built outside of a queue) simply
/// swallows events.
#[derive(Debug, Clone)]
pub(crate) struct EventSink(Option<chan::Sender<QueueEvent>>);

impl EventSink {
	pub(crate) fn new(tx: chan::Sender<QueueEvent>) -> Self {
		Self(Some(tx))
	}

	pub(crate) const fn detached() -> Self {
		Self(None)
	}

	/// Publishing never blocks; the channel is unbounded and a closed channel
	/// just means the owning queue is gone, in which case nobody is observing.
	pub(crate) fn emit(&self, event: QueueEvent) {
		if let Some(tx) = &self.0 {
			let _ = tx.try_send(event);
		}
	}
}
