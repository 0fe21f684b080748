//! Merge operator.
//!
//! Interleaves the values of several publishers with the same output type,
//! in the order they arrive.
//!
//! # Demand
//!
//! While the downstream demand is finite, every upstream is kept at exactly
//! one outstanding value: it is asked for one more each time one of its
//! values is delivered. Values that arrive while the downstream has no
//! demand wait in arrival order. Once the downstream requests an unlimited
//! amount, every upstream is switched to unlimited as well.
//!
//! # Completion
//!
//! Finishes once every upstream has finished and every waiting value has
//! been delivered. The first failure cancels the other upstreams and is
//! forwarded once.

use std::collections::VecDeque;

use crate::{
  demand::Demand,
  ops::fan_in::{Emission, FanIn, FanInKind, Side},
  publisher::Publisher,
  subscriber::Subscriber,
};

/// Merges a tuple of 2 to 8 publishers.
#[derive(Clone, Debug)]
pub struct MergeOp<T> {
  pub(crate) sources: T,
}

impl<T> MergeOp<T> {
  pub fn new(sources: T) -> Self { MergeOp { sources } }
}

/// Merges any number of publishers of one type.
#[derive(Clone, Debug)]
pub struct MergeManyOp<P> {
  pub(crate) sources: Vec<P>,
}

impl<P> MergeManyOp<P> {
  pub fn new(sources: impl IntoIterator<Item = P>) -> Self {
    MergeManyOp { sources: sources.into_iter().collect() }
  }
}

// ==================== Kind ====================

pub(crate) struct MergeKind<T> {
  /// Values waiting for demand, tagged with the upstream they came from.
  queue: VecDeque<(usize, T)>,
  unbounded: bool,
}

impl<T> Default for MergeKind<T> {
  fn default() -> Self { MergeKind { queue: VecDeque::new(), unbounded: false } }
}

impl<T> MergeKind<T> {
  fn put(&mut self, index: usize, value: T) { self.queue.push_back((index, value)); }
}

impl<T: Send + 'static> FanInKind for MergeKind<T> {
  type Output = T;

  fn attach_demand(&self, requested: Demand) -> Demand {
    if requested.is_unlimited() { Demand::UNLIMITED } else { Demand::max(1) }
  }

  fn forward_demand(&mut self, _demand: Demand, requested: Demand) -> Demand {
    if requested.is_unlimited() && !self.unbounded {
      self.unbounded = true;
      Demand::UNLIMITED
    } else {
      Demand::NONE
    }
  }

  fn next_output(&mut self) -> Option<Emission<T>> {
    let (index, output) = self.queue.pop_front()?;
    let refill = if self.unbounded { None } else { Some(index) };
    Some(Emission { output, refill })
  }

  fn is_exhausted(&self, finished: &[bool]) -> bool {
    self.queue.is_empty() && finished.iter().all(|done| *done)
  }

  fn clear(&mut self) { self.queue.clear() }
}

macro_rules! impl_merge {
  ($arity:expr; $($P:ident $idx:tt),+) => {
    impl<Item, Fail, $($P),+> Publisher for MergeOp<($($P,)+)>
    where
      Item: Send + 'static,
      Fail: Send + 'static,
      $($P: Publisher<Output = Item, Failure = Fail>,)+
    {
      type Output = Item;
      type Failure = Fail;

      fn receive<S>(&self, subscriber: S)
      where
        S: Subscriber<Item, Fail>,
      {
        let engine = FanIn::subscribe(MergeKind::<Item>::default(), $arity, subscriber);
        $(
          self.sources.$idx.receive(Side::new($idx, engine.clone(), MergeKind::put));
        )+
      }
    }
  };
}

impl_merge!(2; A 0, B 1);
impl_merge!(3; A 0, B 1, C 2);
impl_merge!(4; A 0, B 1, C 2, D 3);
impl_merge!(5; A 0, B 1, C 2, D 3, E 4);
impl_merge!(6; A 0, B 1, C 2, D 3, E 4, G 5);
impl_merge!(7; A 0, B 1, C 2, D 3, E 4, G 5, H 6);
impl_merge!(8; A 0, B 1, C 2, D 3, E 4, G 5, H 6, J 7);

impl<P: Publisher> Publisher for MergeManyOp<P> {
  type Output = P::Output;
  type Failure = P::Failure;

  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Output, P::Failure>,
  {
    let engine = FanIn::subscribe(MergeKind::default(), self.sources.len(), subscriber);
    for (index, source) in self.sources.iter().enumerate() {
      source.receive(Side::new(index, engine.clone(), MergeKind::put));
    }
  }
}
