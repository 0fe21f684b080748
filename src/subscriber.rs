//! The push side of the protocol.
//!
//! A subscriber receives, in order: exactly one subscription, any number of
//! values (never more than it asked for), then at most one completion.
//! Every callback takes `&self`: stages are shared between the threads that
//! drive them, so implementations keep their mutable state behind a lock.

use std::{fmt, sync::Arc};

use crate::{demand::Demand, subscription::SharedSubscription};

pub mod sink;

pub use sink::Sink;

/// How a stream ended.
#[derive(Clone, PartialEq, Eq)]
pub enum Completion<F> {
  Finished,
  Failure(F),
}

impl<F> Completion<F> {
  #[inline]
  pub fn is_finished(&self) -> bool { matches!(self, Completion::Finished) }

  #[inline]
  pub fn is_failure(&self) -> bool { matches!(self, Completion::Failure(_)) }

  /// Converts the failure, keeping `Finished` as is.
  pub fn map_failure<G>(self, f: impl FnOnce(F) -> G) -> Completion<G> {
    match self {
      Completion::Finished => Completion::Finished,
      Completion::Failure(err) => Completion::Failure(f(err)),
    }
  }

  pub fn failure(self) -> Option<F> {
    match self {
      Completion::Finished => None,
      Completion::Failure(err) => Some(err),
    }
  }

  pub fn as_ref(&self) -> Completion<&F> {
    match self {
      Completion::Finished => Completion::Finished,
      Completion::Failure(err) => Completion::Failure(err),
    }
  }
}

impl<F: fmt::Debug> fmt::Debug for Completion<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Completion::Finished => f.write_str("Finished"),
      Completion::Failure(err) => f.debug_tuple("Failure").field(err).finish(),
    }
  }
}

impl<F> From<Result<(), F>> for Completion<F> {
  fn from(result: Result<(), F>) -> Self {
    match result {
      Ok(()) => Completion::Finished,
      Err(err) => Completion::Failure(err),
    }
  }
}

/// Receives a subscription, then values, then one completion.
///
/// `receive` returns the number of *additional* values the subscriber wants
/// on top of what it already requested; returning [`Demand::NONE`] keeps the
/// outstanding demand unchanged.
pub trait Subscriber<Input, Failure>: Send + Sync + 'static {
  fn receive_subscription(&self, subscription: SharedSubscription);

  fn receive(&self, input: Input) -> Demand;

  fn receive_completion(&self, completion: Completion<Failure>);
}

impl<I, F, S> Subscriber<I, F> for Arc<S>
where
  S: Subscriber<I, F> + ?Sized,
{
  #[inline]
  fn receive_subscription(&self, subscription: SharedSubscription) {
    (**self).receive_subscription(subscription)
  }

  #[inline]
  fn receive(&self, input: I) -> Demand { (**self).receive(input) }

  #[inline]
  fn receive_completion(&self, completion: Completion<F>) { (**self).receive_completion(completion) }
}

impl<I, F, S> Subscriber<I, F> for Box<S>
where
  S: Subscriber<I, F> + ?Sized,
{
  #[inline]
  fn receive_subscription(&self, subscription: SharedSubscription) {
    (**self).receive_subscription(subscription)
  }

  #[inline]
  fn receive(&self, input: I) -> Demand { (**self).receive(input) }

  #[inline]
  fn receive_completion(&self, completion: Completion<F>) { (**self).receive_completion(completion) }
}

/// A subscriber whose concrete type has been erased.
pub type BoxedSubscriber<I, F> = Box<dyn Subscriber<I, F>>;

#[cfg(test)]
mod tests {
  use super::*;

  #[rxflow_macro::test]
  fn completion_helpers() {
    let failed: Completion<&str> = Completion::Failure("boom");
    assert!(failed.is_failure());
    assert_eq!(failed.clone().map_failure(str::len), Completion::Failure(4));
    assert_eq!(failed.failure(), Some("boom"));
    assert_eq!(Completion::<()>::from(Ok(())), Completion::Finished);
    assert_eq!(format!("{:?}", Completion::<u8>::Finished), "Finished");
  }
}
