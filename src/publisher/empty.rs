use std::{fmt, marker::PhantomData};

use crate::{
  error::Never,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::Subscriptions,
};

/// Publishes no values and, unless told otherwise, finishes immediately.
pub struct Empty<O, F = Never> {
  complete_immediately: bool,
  _marker: PhantomData<fn() -> (O, F)>,
}

impl<O, F> Empty<O, F> {
  pub fn new() -> Self { Empty { complete_immediately: true, _marker: PhantomData } }

  /// An empty publisher that never sends its completion either.
  pub fn never() -> Self { Empty { complete_immediately: false, _marker: PhantomData } }
}

impl<O, F> Default for Empty<O, F> {
  fn default() -> Self { Self::new() }
}

impl<O, F> Clone for Empty<O, F> {
  fn clone(&self) -> Self { Empty { complete_immediately: self.complete_immediately, _marker: PhantomData } }
}

impl<O, F> fmt::Debug for Empty<O, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Empty")
      .field("complete_immediately", &self.complete_immediately)
      .finish()
  }
}

impl<O, F> Publisher for Empty<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  type Output = O;
  type Failure = F;

  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<O, F>,
  {
    subscriber.receive_subscription(Subscriptions::empty());
    if self.complete_immediately {
      subscriber.receive_completion(Completion::Finished);
    }
  }
}
