use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::Downstream,
  publisher::Publisher,
  status::SubscriptionStatus,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

/// Transforms every value with a fallible closure.
///
/// The first `Err` cancels the upstream and is delivered downstream as the
/// stream's failure; anything the upstream still sends afterwards is
/// dropped.
pub struct TryMapOp<S, M> {
  pub(crate) source: S,
  pub(crate) func: Arc<M>,
}

impl<S: Clone, M> Clone for TryMapOp<S, M> {
  fn clone(&self) -> Self { TryMapOp { source: self.source.clone(), func: self.func.clone() } }
}

impl<S, M, B> Publisher for TryMapOp<S, M>
where
  S: Publisher,
  M: Fn(S::Output) -> Result<B, S::Failure> + Send + Sync + 'static,
  B: Send + 'static,
{
  type Output = B;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<B, S::Failure>,
  {
    let inner = Arc::new(TryMapInner {
      status: Mutex::new(SubscriptionStatus::Awaiting),
      downstream: Downstream::new(subscriber),
      func: self.func.clone(),
      _p: PhantomData,
    });
    self.source.receive(TryMapSubscriber(inner));
  }
}

struct TryMapInner<O, M, Item, Err> {
  status: Mutex<SubscriptionStatus>,
  downstream: Downstream<O>,
  func: Arc<M>,
  _p: PhantomData<fn(Item, Err)>,
}

pub struct TryMapSubscriber<O, M, Item, Err>(Arc<TryMapInner<O, M, Item, Err>>);

impl<Item, B, Err, O, M> Subscriber<Item, Err> for TryMapSubscriber<O, M, Item, Err>
where
  O: Subscriber<B, Err>,
  M: Fn(Item) -> Result<B, Err> + Send + Sync + 'static,
  Item: 'static,
  Err: Send + 'static,
  B: Send + 'static,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut status = self.0.status.lock();
    if !status.is_awaiting() {
      drop(status);
      log_warn!("try_map received a second subscription, cancelling it");
      subscription.cancel();
      return;
    }
    *status = SubscriptionStatus::Subscribed(subscription);
    drop(status);
    self.0.downstream.with(|d| d.receive_subscription(self.0.clone()));
  }

  fn receive(&self, input: Item) -> Demand {
    if !self.0.status.lock().is_subscribed() {
      return Demand::NONE;
    }
    match (self.0.func)(input) {
      Ok(value) => self.0.downstream.with(|d| d.receive(value)),
      Err(err) => {
        let upstream = self.0.status.lock().terminate();
        if let Some(upstream) = upstream {
          upstream.cancel();
          self.0.downstream.with(|d| d.receive_completion(Completion::Failure(err)));
        }
        Demand::NONE
      }
    }
  }

  fn receive_completion(&self, completion: Completion<Err>) {
    if self.0.status.lock().terminate().is_some() {
      self.0.downstream.with(|d| d.receive_completion(completion));
    }
  }
}

impl<O, M, Item, Err> Cancellable for TryMapInner<O, M, Item, Err>
where
  O: Send + Sync,
  M: Send + Sync,
{
  fn cancel(&self) {
    let upstream = self.status.lock().terminate();
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }
}

impl<O, M, Item, Err> Subscription for TryMapInner<O, M, Item, Err>
where
  O: Send + Sync,
  M: Send + Sync,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let upstream = self.status.lock().subscription();
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{prelude::*, testing::TestPublisher, testing::TestSubscriber};

  #[rxflow_macro::test]
  fn failure_cancels_upstream_and_is_forwarded_once() {
    let upstream = TestPublisher::<i32, String>::new();
    let subscriber = TestSubscriber::<i32, String>::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .try_map(|v| if v < 3 { Ok(v * 10) } else { Err(format!("{v} is too big")) })
      .receive(subscriber.clone());

    upstream.send(1);
    upstream.send(2);
    upstream.send(3);
    upstream.send(4);
    upstream.finish();

    assert_eq!(subscriber.values(), vec![10, 20]);
    assert_eq!(subscriber.failure(), Some("3 is too big".to_string()));
    assert_eq!(subscriber.completion_count(), 1);
    assert_eq!(upstream.cancel_count(), 1);
  }

  #[rxflow_macro::test]
  fn demand_passes_through() {
    let upstream = TestPublisher::<i32, String>::new();
    let subscriber = TestSubscriber::<i32, String>::new();
    upstream.clone().try_map(Ok).receive(subscriber.clone());
    subscriber.request(Demand::max(3));
    assert_eq!(upstream.requests(), vec![Demand::max(3)]);
  }
}
