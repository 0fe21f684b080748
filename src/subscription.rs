//! The pull side of the protocol.
//!
//! A [`Subscription`] is handed to a subscriber exactly once, before any
//! value, and is the only way for that subscriber to ask for more values
//! ([`Subscription::request`]) or to stop the stream ([`Cancellable::cancel`]).
//! Both calls may arrive from any thread, concurrently, and after the stream
//! has already terminated; implementations treat late calls as no-ops.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use crate::demand::Demand;

/// Anything whose activity can be stopped.
pub trait Cancellable: Send + Sync {
  /// Stops the activity. Calling it again, or after the activity has ended on
  /// its own, must do nothing.
  fn cancel(&self);
}

/// The live edge between one publisher stage and one subscriber.
pub trait Subscription: Cancellable {
  /// Adds `demand` to the cumulative number of values the subscriber is
  /// willing to receive.
  ///
  /// # Panics
  ///
  /// Implementations panic when `demand` is [`Demand::NONE`]; requesting
  /// nothing is a caller bug.
  fn request(&self, demand: Demand);
}

/// How subscriptions are passed between stages.
pub type SharedSubscription = Arc<dyn Subscription>;

impl<T: Cancellable + ?Sized> Cancellable for Arc<T> {
  #[inline]
  fn cancel(&self) { (**self).cancel() }
}

impl<T: Cancellable + ?Sized> Cancellable for Box<T> {
  #[inline]
  fn cancel(&self) { (**self).cancel() }
}

impl<T: Subscription + ?Sized> Subscription for Arc<T> {
  #[inline]
  fn request(&self, demand: Demand) { (**self).request(demand) }
}

impl<T: Subscription + ?Sized> Subscription for Box<T> {
  #[inline]
  fn request(&self, demand: Demand) { (**self).request(demand) }
}

// ==================== Empty ====================

/// Namespace for ready-made subscriptions.
pub struct Subscriptions;

impl Subscriptions {
  /// A subscription that ignores every request and cancel.
  ///
  /// Handed out by publishers that complete immediately, such as
  /// [`Empty`](crate::publisher::Empty) and [`Fail`](crate::publisher::Fail).
  pub fn empty() -> SharedSubscription { Arc::new(EmptySubscription) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl Cancellable for EmptySubscription {
  fn cancel(&self) {}
}

impl Subscription for EmptySubscription {
  fn request(&self, demand: Demand) { demand.assert_non_zero(); }
}

// ==================== AnyCancellable ====================

/// Type-erased cancellable that cancels itself when dropped.
///
/// Returned by [`PublisherExt::sink`](crate::publisher::PublisherExt::sink),
/// it ties the lifetime of a subscription to a value: keep it alive for as
/// long as the stream should run.
///
/// ```rust
/// use rxflow::prelude::*;
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let subject = PassthroughSubject::<i32, Never>::new();
/// let handle = subject.clone().sink_values(move |v| sink.lock().unwrap().push(v));
///
/// subject.send(1);
/// drop(handle);
/// subject.send(2);
/// assert_eq!(*seen.lock().unwrap(), vec![1]);
/// ```
#[must_use = "dropping an AnyCancellable cancels the subscription it holds"]
pub struct AnyCancellable {
  inner: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl AnyCancellable {
  /// Wraps a cancellation closure; it runs at most once.
  pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
    AnyCancellable { inner: Mutex::new(Some(Box::new(cancel))) }
  }

  /// Wraps any shared cancellable value.
  pub fn from_cancellable<C: Cancellable + 'static>(cancellable: Arc<C>) -> Self {
    AnyCancellable::new(move || cancellable.cancel())
  }

  /// Moves `self` into `set`, keeping the subscription alive as long as the
  /// collection lives.
  pub fn store(self, set: &mut Vec<AnyCancellable>) { set.push(self); }

  pub fn is_cancelled(&self) -> bool { self.inner.lock().is_none() }
}

impl Cancellable for AnyCancellable {
  fn cancel(&self) {
    let cancel = self.inner.lock().take();
    if let Some(cancel) = cancel {
      cancel();
    }
  }
}

impl Drop for AnyCancellable {
  fn drop(&mut self) { self.cancel(); }
}

impl fmt::Debug for AnyCancellable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AnyCancellable")
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}
