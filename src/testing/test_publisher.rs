use std::{
  fmt,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, Subscription},
};

/// A publisher driven by hand.
///
/// It records every `request` and counts every `cancel` made through the
/// subscriptions it hands out, and pushes whatever the test sends to its
/// latest subscriber, regardless of demand or cancellation, so that tests
/// can exercise how a stage reacts to misbehaving or late upstreams.
pub struct TestPublisher<O, F> {
  inner: Arc<Inner<O, F>>,
}

struct Inner<O, F> {
  subscriber: Mutex<Option<Arc<dyn Subscriber<O, F>>>>,
  requests: Mutex<Vec<Demand>>,
  cancels: AtomicUsize,
  subscriptions: AtomicUsize,
}

impl<O: 'static, F: 'static> Clone for TestPublisher<O, F> {
  fn clone(&self) -> Self { TestPublisher { inner: self.inner.clone() } }
}

impl<O: 'static, F: 'static> Default for TestPublisher<O, F> {
  fn default() -> Self {
    TestPublisher {
      inner: Arc::new(Inner {
        subscriber: Mutex::new(None),
        requests: Mutex::new(Vec::new()),
        cancels: AtomicUsize::new(0),
        subscriptions: AtomicUsize::new(0),
      }),
    }
  }
}

impl<O: 'static, F: 'static> TestPublisher<O, F> {
  pub fn new() -> Self { Self::default() }

  fn subscriber(&self) -> Option<Arc<dyn Subscriber<O, F>>> { self.inner.subscriber.lock().clone() }

  /// Pushes `value` to the latest subscriber and returns the demand it
  /// handed back, or [`Demand::NONE`] when nobody is subscribed.
  pub fn send(&self, value: O) -> Demand {
    match self.subscriber() {
      Some(subscriber) => subscriber.receive(value),
      None => Demand::NONE,
    }
  }

  pub fn finish(&self) { self.complete(Completion::Finished) }

  pub fn fail(&self, error: F) { self.complete(Completion::Failure(error)) }

  pub fn complete(&self, completion: Completion<F>) {
    if let Some(subscriber) = self.subscriber() {
      subscriber.receive_completion(completion);
    }
  }

  /// Sum of every demand requested so far.
  pub fn requested(&self) -> Demand {
    self
      .inner
      .requests
      .lock()
      .iter()
      .fold(Demand::NONE, |total, demand| total + *demand)
  }

  /// Every individual request, in order.
  pub fn requests(&self) -> Vec<Demand> { self.inner.requests.lock().clone() }

  pub fn cancel_count(&self) -> usize { self.inner.cancels.load(Ordering::SeqCst) }

  pub fn is_cancelled(&self) -> bool { self.cancel_count() > 0 }

  pub fn subscription_count(&self) -> usize { self.inner.subscriptions.load(Ordering::SeqCst) }

  pub fn has_subscriber(&self) -> bool { self.inner.subscriber.lock().is_some() }
}

impl<O, F> Publisher for TestPublisher<O, F>
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
    let subscriber: Arc<dyn Subscriber<O, F>> = Arc::new(subscriber);
    *self.inner.subscriber.lock() = Some(subscriber.clone());
    self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);
    subscriber.receive_subscription(Arc::new(TestSubscription { inner: self.inner.clone() }));
  }
}

struct TestSubscription<O, F> {
  inner: Arc<Inner<O, F>>,
}

impl<O, F> Cancellable for TestSubscription<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  fn cancel(&self) { self.inner.cancels.fetch_add(1, Ordering::SeqCst); }
}

impl<O, F> Subscription for TestSubscription<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    self.inner.requests.lock().push(demand);
  }
}

impl<O: 'static, F: 'static> fmt::Debug for TestPublisher<O, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TestPublisher")
      .field("requests", &*self.inner.requests.lock())
      .field("cancels", &self.cancel_count())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{error::Never, testing::TestSubscriber};

  fn relay<O: Clone + Send + 'static>(values: Vec<O>) -> (TestPublisher<O, Never>, TestSubscriber<O, Never>) {
    let publisher = TestPublisher::new();
    let subscriber = TestSubscriber::with_demand(Demand::max(values.len()));
    publisher.receive(subscriber.clone());
    for value in values {
      publisher.send(value);
    }
    (publisher, subscriber)
  }

  #[rxflow_macro::test]
  fn records_requests_and_cancels_for_any_output() {
    let (publisher, subscriber) = relay(vec!["a", "b"]);
    assert_eq!(subscriber.values(), vec!["a", "b"]);
    assert_eq!(publisher.requests(), vec![Demand::max(2)]);
    assert_eq!(publisher.subscription_count(), 1);

    subscriber.cancel();
    assert!(publisher.is_cancelled());
    assert!(format!("{:?}", publisher).contains("cancels: 1"));
  }
}
