use std::sync::Weak;

use parking_lot::Mutex;

use super::error::Error;

/// A single value shared by every task of an
/// [`AtomicTaskQueue`](crate::AtomicTaskQueue), only reachable through scoped
/// mutation: the lock is acquired, the closure receives `&mut T`, and the lock
/// is released as soon as the closure returns. No other access path exists.
#[derive(Debug, Default)]
pub struct AtomicValue<T> {
	inner: Mutex<T>,
}

impl<T> AtomicValue<T> {
	pub fn new(value: T) -> Self {
		Self {
			inner: Mutex::new(value),
		}
	}

	/// Run `f` with exclusive access to the value, forwarding its return value.
	pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		f(&mut self.inner.lock())
	}

	pub(crate) fn into_inner(self) -> T {
		self.inner.into_inner()
	}
}

/// Proxy handed into task bodies to reach the queue's shared value.
///
/// Holds a non-owning reference so outstanding proxies never extend the
/// lifetime of the queue that issued them.
#[derive(Debug)]
pub struct ValueAccess<T> {
	value: Weak<AtomicValue<T>>,
}

impl<T> Clone for ValueAccess<T> {
	fn clone(&self) -> Self {
		Self {
			value: Weak::clone(&self.value),
		}
	}
}

impl<T> ValueAccess<T> {
	pub(crate) fn new(value: Weak<AtomicValue<T>>) -> Self {
		Self { value }
	}

	/// Mutate the shared value in a closure.
	///
	/// Perform as little work as possible inside the closure; the value lock
	/// is held for its whole duration. If the owning queue was released the
	/// closure is not run.
	pub fn mutate(&self, f: impl FnOnce(&mut T)) {
		if let Some(value) = self.value.upgrade() {
			value.with(f);
		}
	}

	/// Like [`mutate`](Self::mutate), but forwards the closure's return value
	/// and reports when the owning queue was released.
	pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Error> {
		self.value
			.upgrade()
			.map(|value| value.with(f))
			.ok_or(Error::ValueReleased)
	}
}
