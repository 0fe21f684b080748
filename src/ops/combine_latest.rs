//! CombineLatest operator.
//!
//! Emits a tuple of the latest value from every upstream. Nothing is emitted
//! until each upstream has produced at least one value; after that every new
//! value, from any upstream, produces one tuple.
//!
//! # Backpressure
//!
//! Demand requested downstream is forwarded to every live upstream. A
//! combination produced while the downstream has no demand is dropped; the
//! next value to arrive after demand returns produces the next tuple.
//!
//! # Completion
//!
//! Finishes once every upstream has finished. The first failure cancels all other upstreams and
//! is forwarded once.
//!
//! # Examples
//!
//! ```rust
//! use rxflow::prelude::*;
//! use std::sync::{Arc, Mutex};
//!
//! let numbers = PassthroughSubject::<i32, Never>::new();
//! let letters = PassthroughSubject::<char, Never>::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let c_seen = seen.clone();
//! let _handle = numbers
//!   .clone()
//!   .combine_latest(letters.clone())
//!   .sink_values(move |pair| c_seen.lock().unwrap().push(pair));
//!
//! numbers.send(1);
//! letters.send('a');
//! numbers.send(2);
//! assert_eq!(*seen.lock().unwrap(), vec![(1, 'a'), (2, 'a')]);
//! ```

use crate::{
  demand::Demand,
  ops::fan_in::{Emission, FanIn, FanInKind, Side},
  publisher::Publisher,
  subscriber::Subscriber,
};

/// Combines the latest values of a tuple of publishers (2 to 8 of them).
#[derive(Clone, Debug)]
pub struct CombineLatestOp<T> {
  pub(crate) sources: T,
}

impl<T> CombineLatestOp<T> {
  /// Combines a tuple of 2 to 8 publishers sharing one failure type.
  pub fn new(sources: T) -> Self { CombineLatestOp { sources } }
}

// ==================== Kind ====================

/// A tuple of `Option`s holding the newest value of each upstream.
pub(crate) trait LatestSlots: Default + Send + 'static {
  type Tuple: Send + 'static;

  fn is_full(&self) -> bool;

  fn snapshot(&self) -> Option<Self::Tuple>;
}

#[derive(Default)]
pub(crate) struct CombineLatestKind<S> {
  slots: S,
  /// A value arrived since the last emitted combination.
  fresh: bool,
}

impl<S: LatestSlots> FanInKind for CombineLatestKind<S> {
  type Output = S::Tuple;

  fn attach_demand(&self, requested: Demand) -> Demand { requested }

  fn forward_demand(&mut self, demand: Demand, _requested: Demand) -> Demand { demand }

  fn next_output(&mut self) -> Option<Emission<S::Tuple>> {
    if !self.fresh {
      return None;
    }
    let output = self.slots.snapshot()?;
    self.fresh = false;
    Some(Emission { output, refill: None })
  }

  fn starve(&mut self) {
    if self.fresh {
      log_trace!("combine_latest dropped a combination without demand");
      self.fresh = false;
    }
  }

  fn is_exhausted(&self, finished: &[bool]) -> bool {
    finished.iter().all(|done| *done) && !(self.fresh && self.slots.is_full())
  }

  fn clear(&mut self) {
    self.slots = S::default();
    self.fresh = false;
  }
}

macro_rules! impl_combine_latest {
  ($arity:expr; $($P:ident $idx:tt),+) => {
    impl<$($P: Clone + Send + 'static),+> LatestSlots for ($(Option<$P>,)+) {
      type Tuple = ($($P,)+);

      fn is_full(&self) -> bool { $(self.$idx.is_some())&&+ }

      fn snapshot(&self) -> Option<Self::Tuple> { Some(($(self.$idx.clone()?,)+)) }
    }

    impl<Fail, $($P),+> Publisher for CombineLatestOp<($($P,)+)>
    where
      Fail: Send + 'static,
      $($P: Publisher<Failure = Fail>, $P::Output: Clone,)+
    {
      type Output = ($($P::Output,)+);
      type Failure = Fail;

      fn receive<S>(&self, subscriber: S)
      where
        S: Subscriber<Self::Output, Fail>,
      {
        let engine = FanIn::subscribe(
          CombineLatestKind::<($(Option<$P::Output>,)+)>::default(),
          $arity,
          subscriber,
        );
        $(
          self.sources.$idx.receive(Side::<_, Fail, S, $P::Output>::new(
            $idx,
            engine.clone(),
            |kind, _, value| {
              kind.slots.$idx = Some(value);
              kind.fresh = true;
            },
          ));
        )+
      }
    }
  };
}

impl_combine_latest!(2; A 0, B 1);
impl_combine_latest!(3; A 0, B 1, C 2);
impl_combine_latest!(4; A 0, B 1, C 2, D 3);
impl_combine_latest!(5; A 0, B 1, C 2, D 3, E 4);
impl_combine_latest!(6; A 0, B 1, C 2, D 3, E 4, G 5);
impl_combine_latest!(7; A 0, B 1, C 2, D 3, E 4, G 5, H 6);
impl_combine_latest!(8; A 0, B 1, C 2, D 3, E 4, G 5, H 6, J 7);
