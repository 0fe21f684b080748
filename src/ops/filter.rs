use std::{marker::PhantomData, sync::Arc};

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::SharedSubscription,
};

/// Forwards only the values matching a predicate.
///
/// A rejected value hands its unit of demand back to the upstream, so the
/// downstream keeps receiving as many values as it asked for.
pub struct FilterOp<S, F> {
  pub(crate) source: S,
  pub(crate) filter: Arc<F>,
}

impl<S: Clone, F> Clone for FilterOp<S, F> {
  fn clone(&self) -> Self { FilterOp { source: self.source.clone(), filter: self.filter.clone() } }
}

impl<S, F> Publisher for FilterOp<S, F>
where
  S: Publisher,
  F: Fn(&S::Output) -> bool + Send + Sync + 'static,
{
  type Output = S::Output;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<S::Output, S::Failure>,
  {
    self.source.receive(FilterSubscriber {
      downstream: subscriber,
      filter: self.filter.clone(),
      _p: PhantomData,
    })
  }
}

pub struct FilterSubscriber<O, F, Item> {
  downstream: O,
  filter: Arc<F>,
  _p: PhantomData<fn(Item)>,
}

impl<Item, Err, O, F> Subscriber<Item, Err> for FilterSubscriber<O, F, Item>
where
  O: Subscriber<Item, Err>,
  F: Fn(&Item) -> bool + Send + Sync + 'static,
  Item: 'static,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.downstream.receive_subscription(subscription)
  }

  fn receive(&self, input: Item) -> Demand {
    if (self.filter)(&input) {
      self.downstream.receive(input)
    } else {
      Demand::max(1)
    }
  }

  fn receive_completion(&self, completion: Completion<Err>) { self.downstream.receive_completion(completion) }
}

#[cfg(test)]
mod tests {
  use crate::{prelude::*, testing::TestSubscriber};

  #[rxflow_macro::test]
  fn fork_and_shared() {
    let evens = Sequence::new(0..10).filter(|v| v % 2 == 0);
    let first = TestSubscriber::<i32, Never>::with_demand(Demand::UNLIMITED);
    let second = TestSubscriber::<i32, Never>::with_demand(Demand::UNLIMITED);
    evens.receive(first.clone());
    evens.receive(second.clone());
    assert_eq!(first.values(), vec![0, 2, 4, 6, 8]);
    assert_eq!(second.values(), first.values());
  }

  #[rxflow_macro::test]
  fn rejected_values_do_not_consume_demand() {
    let subscriber = TestSubscriber::<i32, Never>::with_demand(Demand::max(2));
    Sequence::new(1..100).filter(|v| v % 10 == 0).receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![10, 20]);
    assert!(!subscriber.is_completed());
  }
}
