use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  error::Never,
  lock::Downstream,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, Subscription},
};

/// Emits one value on the first request, then finishes.
#[derive(Debug)]
pub struct Just<T, F = Never> {
  value: T,
  _failure: PhantomData<fn() -> F>,
}

impl<T> Just<T> {
  pub fn new(value: T) -> Self { Just { value, _failure: PhantomData } }
}

impl<T, F> Just<T, F> {
  /// Changes the declared failure type so the publisher can be combined
  /// with fallible ones. It still never fails.
  pub fn set_failure<E>(self) -> Just<T, E> { Just { value: self.value, _failure: PhantomData } }
}

impl<T: Clone, F> Clone for Just<T, F> {
  fn clone(&self) -> Self { Just { value: self.value.clone(), _failure: PhantomData } }
}

impl<T, F> Publisher for Just<T, F>
where
  T: Clone + Send + Sync + 'static,
  F: Send + 'static,
{
  type Output = T;
  type Failure = F;

  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<T, F>,
  {
    let inner = Arc::new(JustSubscription {
      value: Mutex::new(Some(self.value.clone())),
      downstream: Downstream::new(subscriber),
      _failure: PhantomData,
    });
    inner.downstream.with(|d| d.receive_subscription(inner.clone()));
  }
}

struct JustSubscription<T, F, S> {
  value: Mutex<Option<T>>,
  downstream: Downstream<S>,
  _failure: PhantomData<fn() -> F>,
}

impl<T, F, S> Cancellable for JustSubscription<T, F, S>
where
  T: Send + 'static,
  F: Send + 'static,
  S: Subscriber<T, F>,
{
  fn cancel(&self) { self.value.lock().take(); }
}

impl<T, F, S> Subscription for JustSubscription<T, F, S>
where
  T: Send + 'static,
  F: Send + 'static,
  S: Subscriber<T, F>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let value = self.value.lock().take();
    if let Some(value) = value {
      self.downstream.with(|d| {
        d.receive(value);
        d.receive_completion(Completion::Finished);
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::TestSubscriber;

  #[rxflow_macro::test]
  fn waits_for_demand() {
    let subscriber = TestSubscriber::<i32, Never>::new();
    Just::new(7).receive(subscriber.clone());
    assert!(subscriber.values().is_empty());

    subscriber.request(Demand::max(1));
    assert_eq!(subscriber.values(), vec![7]);
    assert_eq!(subscriber.completion(), Some(Completion::Finished));
  }

  #[rxflow_macro::test]
  fn cancel_before_request_suppresses_everything() {
    let subscriber = TestSubscriber::<i32, Never>::new();
    Just::new(7).receive(subscriber.clone());
    subscriber.cancel();
    subscriber.request(Demand::max(1));
    assert!(subscriber.values().is_empty());
    assert_eq!(subscriber.completion(), None);
  }
}
