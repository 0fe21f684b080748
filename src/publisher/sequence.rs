use std::{iter::Peekable, marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  error::Never,
  lock::{DeliveryGate, Downstream},
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, Subscription},
};

/// Emits the items of an iterable, one per unit of demand, then finishes.
///
/// Every subscriber walks its own clone of the iterable. An empty iterable
/// finishes as soon as the subscription is handed over.
#[derive(Debug)]
pub struct Sequence<I, F = Never> {
  items: I,
  _failure: PhantomData<fn() -> F>,
}

impl<I> Sequence<I> {
  pub fn new(items: I) -> Self { Sequence { items, _failure: PhantomData } }
}

impl<I, F> Sequence<I, F> {
  pub fn set_failure<E>(self) -> Sequence<I, E> { Sequence { items: self.items, _failure: PhantomData } }
}

impl<I: Clone, F> Clone for Sequence<I, F> {
  fn clone(&self) -> Self { Sequence { items: self.items.clone(), _failure: PhantomData } }
}

impl<I, F> Publisher for Sequence<I, F>
where
  I: IntoIterator + Clone + Send + Sync + 'static,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
  F: Send + 'static,
{
  type Output = I::Item;
  type Failure = F;

  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<I::Item, F>,
  {
    let inner = Arc::new(SequenceInner {
      state: Mutex::new(SequenceState {
        iter: Some(self.items.clone().into_iter().peekable()),
        demand: Demand::NONE,
        gate: DeliveryGate::new(),
      }),
      downstream: Downstream::new(subscriber),
      _failure: PhantomData,
    });
    inner.downstream.with(|d| d.receive_subscription(inner.clone()));
    inner.drain();
  }
}

struct SequenceState<It: Iterator> {
  iter: Option<Peekable<It>>,
  demand: Demand,
  gate: DeliveryGate,
}

struct SequenceInner<It: Iterator, F, S> {
  state: Mutex<SequenceState<It>>,
  downstream: Downstream<S>,
  _failure: PhantomData<fn() -> F>,
}

impl<It, F, S> SequenceInner<It, F, S>
where
  It: Iterator + Send + 'static,
  It::Item: Send + 'static,
  F: Send + 'static,
  S: Subscriber<It::Item, F>,
{
  fn drain(&self) {
    let mut state = self.state.lock();
    let Some(ticket) = state.gate.try_begin() else { return };
    loop {
      let SequenceState { iter, demand, gate } = &mut *state;
      gate.settle(&ticket, demand);
      let Some(items) = iter else { break };
      if items.peek().is_none() {
        *iter = None;
        gate.finish(ticket, demand);
        drop(state);
        self.downstream.with(|d| d.receive_completion(Completion::Finished));
        return;
      }
      if !demand.take_one() {
        break;
      }
      let Some(item) = items.next() else { continue };
      drop(state);
      let more = self.downstream.with(|d| d.receive(item));
      state = self.state.lock();
      state.demand += more;
    }
    let SequenceState { demand, gate, .. } = &mut *state;
    gate.finish(ticket, demand);
  }
}

impl<It, F, S> Cancellable for SequenceInner<It, F, S>
where
  It: Iterator + Send + 'static,
  It::Item: Send + 'static,
  F: Send + 'static,
  S: Subscriber<It::Item, F>,
{
  fn cancel(&self) { self.state.lock().iter = None; }
}

impl<It, F, S> Subscription for SequenceInner<It, F, S>
where
  It: Iterator + Send + 'static,
  It::Item: Send + 'static,
  F: Send + 'static,
  S: Subscriber<It::Item, F>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    {
      let mut state = self.state.lock();
      if state.iter.is_none() {
        return;
      }
      let SequenceState { demand: current, gate, .. } = &mut *state;
      gate.credit(current, demand);
    }
    self.drain();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::TestSubscriber;

  #[rxflow_macro::test]
  fn honours_demand_in_steps() {
    let subscriber = TestSubscriber::<i32, Never>::new();
    Sequence::new(vec![1, 2, 3]).receive(subscriber.clone());
    subscriber.request(Demand::max(2));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert_eq!(subscriber.completion(), None);

    subscriber.request(Demand::max(1));
    assert_eq!(subscriber.values(), vec![1, 2, 3]);
    assert_eq!(subscriber.completion(), Some(Completion::Finished));
  }

  #[rxflow_macro::test]
  fn empty_sequence_finishes_on_subscribe() {
    let subscriber = TestSubscriber::<i32, Never>::new();
    Sequence::new(Vec::<i32>::new()).receive(subscriber.clone());
    assert_eq!(subscriber.completion(), Some(Completion::Finished));
  }

  #[rxflow_macro::test]
  fn demand_returned_from_receive_keeps_it_flowing() {
    let subscriber = TestSubscriber::<u32, Never>::with_demand(Demand::max(1)).returning(Demand::max(1));
    Sequence::new(0..5u32).receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![0, 1, 2, 3, 4]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn request_from_inside_receive_does_not_recurse() {
    let subscriber = TestSubscriber::<u32, Never>::new();
    let c_subscriber = subscriber.clone();
    subscriber.on_value(move |_| c_subscriber.request(Demand::max(1)));
    Sequence::new(0..1000u32).receive(subscriber.clone());
    subscriber.request(Demand::max(1));
    assert_eq!(subscriber.values().len(), 1000);
    assert!(subscriber.is_finished());
  }
}
