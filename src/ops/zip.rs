//! Zip operator implementation
//!
//! Zip combines items from several publishers positionally: the k-th tuple
//! is made of the k-th value of every upstream, so it is emitted only once
//! the slowest upstream has produced its k-th value.

use std::collections::VecDeque;

use crate::{
  demand::Demand,
  ops::fan_in::{Emission, FanIn, FanInKind, Side},
  publisher::Publisher,
  subscriber::Subscriber,
};

// ==================== Zip Operator ====================

/// Zips a tuple of 2 to 8 publishers.
///
/// Each upstream's values are queued until every queue holds at least one,
/// then one value is popped from each. Finishes as soon as an upstream that
/// has finished has no queued values left (no further tuple can ever be
/// completed), cancelling the others. The first failure cancels the rest
/// and is forwarded once.
#[derive(Clone, Debug)]
pub struct ZipOp<T> {
  pub(crate) sources: T,
}

impl<T> ZipOp<T> {
  pub fn new(sources: T) -> Self { ZipOp { sources } }
}

// ==================== Shared State ====================

/// A tuple of FIFO queues, one per upstream.
pub(crate) trait ZipQueues: Default + Send + 'static {
  type Tuple: Send + 'static;

  fn pop(&mut self) -> Option<Self::Tuple>;

  fn is_drained(&self, index: usize) -> bool;

  fn clear(&mut self);
}

#[derive(Default)]
pub(crate) struct ZipKind<Q> {
  queues: Q,
}

impl<Q: ZipQueues> FanInKind for ZipKind<Q> {
  type Output = Q::Tuple;

  fn attach_demand(&self, requested: Demand) -> Demand { requested }

  fn forward_demand(&mut self, demand: Demand, _requested: Demand) -> Demand { demand }

  fn next_output(&mut self) -> Option<Emission<Q::Tuple>> {
    self
      .queues
      .pop()
      .map(|output| Emission { output, refill: None })
  }

  fn is_exhausted(&self, finished: &[bool]) -> bool {
    finished
      .iter()
      .enumerate()
      .any(|(index, done)| *done && self.queues.is_drained(index))
  }

  fn clear(&mut self) { self.queues.clear() }
}

macro_rules! impl_zip {
  ($arity:expr; $($P:ident $idx:tt),+) => {
    impl<$($P: Send + 'static),+> ZipQueues for ($(VecDeque<$P>,)+) {
      type Tuple = ($($P,)+);

      fn pop(&mut self) -> Option<Self::Tuple> {
        if $(self.$idx.is_empty())||+ {
          return None;
        }
        Some(($(self.$idx.pop_front()?,)+))
      }

      fn is_drained(&self, index: usize) -> bool {
        match index {
          $($idx => self.$idx.is_empty(),)+
          _ => true,
        }
      }

      fn clear(&mut self) { $(self.$idx.clear();)+ }
    }

    impl<Fail, $($P),+> Publisher for ZipOp<($($P,)+)>
    where
      Fail: Send + 'static,
      $($P: Publisher<Failure = Fail>,)+
    {
      type Output = ($($P::Output,)+);
      type Failure = Fail;

      fn receive<S>(&self, subscriber: S)
      where
        S: Subscriber<Self::Output, Fail>,
      {
        let engine = FanIn::subscribe(
          ZipKind::<($(VecDeque<$P::Output>,)+)>::default(),
          $arity,
          subscriber,
        );
        $(
          self.sources.$idx.receive(Side::<_, Fail, S, $P::Output>::new(
            $idx,
            engine.clone(),
            |kind, _, value| kind.queues.$idx.push_back(value),
          ));
        )+
      }
    }
  };
}

impl_zip!(2; A 0, B 1);
impl_zip!(3; A 0, B 1, C 2);
impl_zip!(4; A 0, B 1, C 2, D 3);
impl_zip!(5; A 0, B 1, C 2, D 3, E 4);
impl_zip!(6; A 0, B 1, C 2, D 3, E 4, G 5);
impl_zip!(7; A 0, B 1, C 2, D 3, E 4, G 5, H 6);
impl_zip!(8; A 0, B 1, C 2, D 3, E 4, G 5, H 6, J 7);

// ==================== Tests ====================

#[cfg(test)]
mod tests {
  use crate::{
    prelude::*,
    testing::{TestPublisher, TestSubscriber},
  };

  #[rxflow_macro::test]
  fn test_zip_basic() {
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    Sequence::new(vec![1, 2, 3])
      .zip(Sequence::new(vec!["a", "b", "c", "d"]))
      .receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![(1, "a"), (2, "b"), (3, "c")]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn pairs_by_position_regardless_of_arrival() {
    let a = TestPublisher::<i32, Never>::new();
    let b = TestPublisher::<char, Never>::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    a.clone().zip(b.clone()).receive(subscriber.clone());

    a.send(1);
    a.send(2);
    a.send(3);
    assert!(subscriber.values().is_empty());
    b.send('x');
    assert_eq!(subscriber.values(), vec![(1, 'x')]);
    b.send('y');
    assert_eq!(subscriber.values(), vec![(1, 'x'), (2, 'y')]);
  }

  #[rxflow_macro::test]
  fn finished_upstream_with_queued_values_keeps_stream_open() {
    let a = TestPublisher::<i32, Never>::new();
    let b = TestPublisher::<i32, Never>::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    a.clone().zip(b.clone()).receive(subscriber.clone());

    a.send(1);
    a.send(2);
    a.finish();
    assert!(!subscriber.is_completed());

    b.send(10);
    assert!(!subscriber.is_completed());
    b.send(20);
    assert_eq!(subscriber.values(), vec![(1, 10), (2, 20)]);
    assert!(subscriber.is_finished());
    assert_eq!(b.cancel_count(), 1);
  }

  #[rxflow_macro::test]
  fn queued_tuples_wait_for_demand() {
    let a = TestPublisher::<i32, Never>::new();
    let b = TestPublisher::<i32, Never>::new();
    let subscriber = TestSubscriber::with_demand(Demand::max(1));
    a.clone().zip(b.clone()).receive(subscriber.clone());
    assert_eq!(a.requests(), vec![Demand::max(1)]);

    a.send(1);
    a.send(2);
    b.send(10);
    b.send(20);
    assert_eq!(subscriber.values(), vec![(1, 10)]);

    subscriber.request(Demand::max(1));
    assert_eq!(subscriber.values(), vec![(1, 10), (2, 20)]);
    assert_eq!(b.requests(), vec![Demand::max(1), Demand::max(1)]);
  }

  #[rxflow_macro::test]
  fn failure_is_forwarded_once() {
    let a = TestPublisher::<i32, String>::new();
    let b = TestPublisher::<i32, String>::new();
    let subscriber = TestSubscriber::<(i32, i32), String>::with_demand(Demand::UNLIMITED);
    a.clone().zip(b.clone()).receive(subscriber.clone());

    a.send(1);
    a.fail("a".into());
    b.fail("b".into());
    b.send(1);
    assert_eq!(subscriber.failure(), Some("a".to_string()));
    assert_eq!(subscriber.completion_count(), 1);
    assert!(subscriber.values().is_empty());
    assert_eq!(b.cancel_count(), 1);
  }

  #[rxflow_macro::test]
  fn three_way() {
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    Sequence::new(1..4)
      .zip3(Sequence::new(4..7), Sequence::new(7..10))
      .receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![(1, 4, 7), (2, 5, 8), (3, 6, 9)]);
  }
}
