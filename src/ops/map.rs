use std::{marker::PhantomData, sync::Arc};

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::SharedSubscription,
};

/// Transforms every value with a closure.
///
/// The upstream subscription is handed straight to the downstream: mapping
/// keeps no state, so demand and cancellation pass through untouched.
pub struct MapOp<S, M> {
  pub(crate) source: S,
  pub(crate) func: Arc<M>,
}

impl<S: Clone, M> Clone for MapOp<S, M> {
  fn clone(&self) -> Self { MapOp { source: self.source.clone(), func: self.func.clone() } }
}

impl<S, M, B> Publisher for MapOp<S, M>
where
  S: Publisher,
  M: Fn(S::Output) -> B + Send + Sync + 'static,
  B: Send + 'static,
{
  type Output = B;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<B, S::Failure>,
  {
    self.source.receive(MapSubscriber {
      downstream: subscriber,
      map: self.func.clone(),
      _p: PhantomData,
    })
  }
}

pub struct MapSubscriber<O, M, Item> {
  downstream: O,
  map: Arc<M>,
  _p: PhantomData<fn(Item)>,
}

impl<Item, B, Err, O, M> Subscriber<Item, Err> for MapSubscriber<O, M, Item>
where
  O: Subscriber<B, Err>,
  M: Fn(Item) -> B + Send + Sync + 'static,
  Item: 'static,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.downstream.receive_subscription(subscription)
  }

  fn receive(&self, input: Item) -> Demand { self.downstream.receive((self.map)(input)) }

  fn receive_completion(&self, completion: Completion<Err>) { self.downstream.receive_completion(completion) }
}

#[cfg(test)]
mod tests {
  use crate::{prelude::*, testing::TestSubscriber};

  #[rxflow_macro::test]
  fn primitive_type() {
    let subscriber = TestSubscriber::<i32, Never>::with_demand(Demand::UNLIMITED);
    Sequence::new(100..103).map(|v| v * 2).receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![200, 202, 204]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn map_types_mixed() {
    let subscriber = TestSubscriber::<String, Never>::with_demand(Demand::max(2));
    Sequence::new(vec!['a', 'b', 'c'])
      .map(|c| c.to_string())
      .map(|s| s.repeat(2))
      .receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec!["aa".to_string(), "bb".to_string()]);
    assert!(!subscriber.is_completed());
  }

  #[rxflow_macro::test]
  fn publisher_is_reusable() {
    let doubled = Sequence::new(vec![1, 2]).map(|v| v * 10);
    for _ in 0..2 {
      let subscriber = TestSubscriber::<i32, Never>::with_demand(Demand::UNLIMITED);
      doubled.receive(subscriber.clone());
      assert_eq!(subscriber.values(), vec![10, 20]);
    }
  }
}
