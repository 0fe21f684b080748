//! Concatenate operator (`append`).
//!
//! Delivers every value of a prefix publisher, then subscribes to the
//! suffix and delivers its values too. The suffix is only subscribed once
//! the prefix has finished; a prefix failure ends the stream without it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::Downstream,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

#[derive(Clone, Debug)]
pub struct ConcatenateOp<P, S> {
  pub(crate) prefix: P,
  pub(crate) suffix: S,
}

impl<P, S> ConcatenateOp<P, S> {
  pub fn new(prefix: P, suffix: S) -> Self { ConcatenateOp { prefix, suffix } }
}

impl<P, S> Publisher for ConcatenateOp<P, S>
where
  P: Publisher,
  S: Publisher<Output = P::Output, Failure = P::Failure> + Clone,
{
  type Output = P::Output;
  type Failure = P::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<P::Output, P::Failure>,
  {
    let inner = Arc::new(ConcatInner {
      state: Mutex::new(ConcatState {
        upstream: None,
        expected: 2,
        prefix_finished: false,
        demand: Demand::NONE,
        done: false,
      }),
      downstream: Downstream::new(subscriber),
      suffix: self.suffix.clone(),
    });
    inner.downstream.with(|d| d.receive_subscription(inner.clone()));
    self.prefix.receive(ConcatSubscriber(inner));
  }
}

struct ConcatState {
  upstream: Option<SharedSubscription>,
  /// Subscriptions still to come: the prefix's, then the suffix's.
  expected: usize,
  prefix_finished: bool,
  /// Outstanding downstream demand, carried over to the suffix.
  demand: Demand,
  done: bool,
}

struct ConcatInner<S, D> {
  state: Mutex<ConcatState>,
  downstream: Downstream<D>,
  suffix: S,
}

impl<S, D> Cancellable for ConcatInner<S, D>
where
  S: Publisher,
  D: Subscriber<S::Output, S::Failure>,
{
  fn cancel(&self) {
    let upstream = {
      let mut state = self.state.lock();
      state.done = true;
      state.upstream.take()
    };
    if let Some(upstream) = upstream {
      log_trace!("append cancelled");
      upstream.cancel();
    }
  }
}

impl<S, D> Subscription for ConcatInner<S, D>
where
  S: Publisher,
  D: Subscriber<S::Output, S::Failure>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let upstream = {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.demand += demand;
      state.upstream.clone()
    };
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }
}

pub struct ConcatSubscriber<S, D>(Arc<ConcatInner<S, D>>);

impl<S, D> Subscriber<S::Output, S::Failure> for ConcatSubscriber<S, D>
where
  S: Publisher,
  D: Subscriber<S::Output, S::Failure>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let demand = {
      let mut state = self.0.state.lock();
      if state.done || state.upstream.is_some() || state.expected == 0 {
        None
      } else {
        state.upstream = Some(subscription.clone());
        state.expected -= 1;
        Some(state.demand)
      }
    };
    match demand {
      None => {
        log_warn!("append received an unexpected subscription, cancelling it");
        subscription.cancel();
      }
      Some(demand) if demand.has_demand() => subscription.request(demand),
      Some(_) => {}
    }
  }

  fn receive(&self, input: S::Output) -> Demand {
    {
      let mut state = self.0.state.lock();
      if state.done {
        return Demand::NONE;
      }
      state.demand.take_one();
    }
    let more = self.0.downstream.with(|d| d.receive(input));
    self.0.state.lock().demand += more;
    more
  }

  fn receive_completion(&self, completion: Completion<S::Failure>) {
    let subscribe_suffix = {
      let mut state = self.0.state.lock();
      if state.done {
        return;
      }
      state.upstream = None;
      if !state.prefix_finished && completion.is_finished() {
        state.prefix_finished = true;
        true
      } else {
        state.done = true;
        false
      }
    };
    if subscribe_suffix {
      self.0.suffix.receive(ConcatSubscriber(self.0.clone()));
    } else {
      self.0.downstream.with(|d| d.receive_completion(completion));
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    prelude::*,
    testing::{TestPublisher, TestSubscriber},
  };

  #[rxflow_macro::test]
  fn delivers_prefix_then_suffix() {
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    Sequence::new(vec![1, 2])
      .append(Sequence::new(vec![3, 4]))
      .receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![1, 2, 3, 4]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn outstanding_demand_moves_to_the_suffix() {
    let prefix = TestPublisher::<i32, Never>::new();
    let suffix = TestPublisher::<i32, Never>::new();
    let subscriber = TestSubscriber::with_demand(Demand::max(3));
    prefix.clone().append(suffix.clone()).receive(subscriber.clone());
    assert_eq!(prefix.requests(), vec![Demand::max(3)]);
    assert!(!suffix.has_subscriber());

    prefix.send(1);
    prefix.finish();
    assert_eq!(suffix.requests(), vec![Demand::max(2)]);
    suffix.send(2);
    suffix.finish();
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn demand_before_prefix_attaches_is_kept() {
    let subscriber = TestSubscriber::<i32, Never>::new();
    let suffix = TestPublisher::<i32, Never>::new();
    Empty::new().append(suffix.clone()).receive(subscriber.clone());
    subscriber.request(Demand::max(4));
    assert_eq!(suffix.requests(), vec![Demand::max(4)]);
  }

  #[rxflow_macro::test]
  fn prefix_failure_skips_the_suffix() {
    let prefix = TestPublisher::<i32, &'static str>::new();
    let suffix = TestPublisher::<i32, &'static str>::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    prefix.clone().append(suffix.clone()).receive(subscriber.clone());

    prefix.fail("nope");
    assert_eq!(subscriber.failure(), Some("nope"));
    assert_eq!(suffix.subscription_count(), 0);
  }

  #[rxflow_macro::test]
  fn cancel_reaches_the_active_side() {
    let prefix = TestPublisher::<i32, Never>::new();
    let suffix = TestPublisher::<i32, Never>::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    prefix.clone().append(suffix.clone()).receive(subscriber.clone());
    prefix.finish();
    subscriber.cancel();
    subscriber.cancel();
    assert_eq!(prefix.cancel_count(), 0);
    assert_eq!(suffix.cancel_count(), 1);
  }
}
