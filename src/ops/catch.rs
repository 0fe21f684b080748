//! Catch operator.
//!
//! Replaces a failed upstream with the publisher returned by a handler.
//!
//! The stage goes through two phases. While the first upstream is active,
//! its values pass through and the demand the downstream still expects is
//! tracked; when it fails, the handler's publisher is subscribed and that
//! outstanding demand is requested from it. The downstream keeps the same
//! subscription throughout.

use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::Downstream,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

pub struct CatchOp<S, H> {
  pub(crate) source: S,
  pub(crate) handler: Arc<H>,
}

impl<S: Clone, H> Clone for CatchOp<S, H> {
  fn clone(&self) -> Self { CatchOp { source: self.source.clone(), handler: self.handler.clone() } }
}

impl<S, H, P> Publisher for CatchOp<S, H>
where
  S: Publisher,
  H: Fn(S::Failure) -> P + Send + Sync + 'static,
  P: Publisher<Output = S::Output>,
{
  type Output = S::Output;
  type Failure = P::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<S::Output, P::Failure>,
  {
    let inner = Arc::new(CatchInner {
      state: Mutex::new(CatchState { phase: CatchPhase::PendingFirst, demand: Demand::NONE }),
      downstream: Downstream::new(subscriber),
      handler: self.handler.clone(),
      _p: PhantomData,
    });
    self.source.receive(CatchFirst(inner));
  }
}

enum CatchPhase {
  PendingFirst,
  FirstActive(SharedSubscription),
  PendingSecond,
  SecondActive(SharedSubscription),
  Cancelled,
}

impl CatchPhase {
  fn subscription(&self) -> Option<SharedSubscription> {
    match self {
      CatchPhase::FirstActive(subscription) | CatchPhase::SecondActive(subscription) => {
        Some(subscription.clone())
      }
      _ => None,
    }
  }
}

struct CatchState {
  phase: CatchPhase,
  /// Demand not yet met by the first upstream.
  demand: Demand,
}

struct CatchInner<H, D, F1> {
  state: Mutex<CatchState>,
  downstream: Downstream<D>,
  handler: Arc<H>,
  _p: PhantomData<fn(F1)>,
}

impl<H, D, F1> Cancellable for CatchInner<H, D, F1>
where
  H: Send + Sync,
  D: Send,
{
  fn cancel(&self) {
    let previous = std::mem::replace(&mut self.state.lock().phase, CatchPhase::Cancelled);
    if let Some(subscription) = previous.subscription() {
      log_trace!("catch cancelled");
      subscription.cancel();
    }
  }
}

impl<H, D, F1> Subscription for CatchInner<H, D, F1>
where
  H: Send + Sync,
  D: Send,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let upstream = {
      let mut state = self.state.lock();
      if matches!(state.phase, CatchPhase::Cancelled) {
        return;
      }
      state.demand += demand;
      state.phase.subscription()
    };
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }
}

// ==================== First phase ====================

pub struct CatchFirst<H, D, F1>(Arc<CatchInner<H, D, F1>>);

impl<T, F1, H, P, D> Subscriber<T, F1> for CatchFirst<H, D, F1>
where
  T: Send + 'static,
  F1: Send + 'static,
  H: Fn(F1) -> P + Send + Sync + 'static,
  P: Publisher<Output = T>,
  D: Subscriber<T, P::Failure>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut state = self.0.state.lock();
    if !matches!(state.phase, CatchPhase::PendingFirst) {
      drop(state);
      log_warn!("catch received an unexpected subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.phase = CatchPhase::FirstActive(subscription);
    drop(state);
    self.0.downstream.with(|d| d.receive_subscription(self.0.clone()));
  }

  fn receive(&self, input: T) -> Demand {
    {
      let mut state = self.0.state.lock();
      if !matches!(state.phase, CatchPhase::FirstActive(_)) {
        return Demand::NONE;
      }
      state.demand.take_one();
    }
    let more = self.0.downstream.with(|d| d.receive(input));
    self.0.state.lock().demand += more;
    more
  }

  fn receive_completion(&self, completion: Completion<F1>) {
    {
      let mut state = self.0.state.lock();
      if !matches!(state.phase, CatchPhase::FirstActive(_)) {
        return;
      }
      state.phase = match completion {
        Completion::Finished => CatchPhase::Cancelled,
        Completion::Failure(_) => CatchPhase::PendingSecond,
      };
    }
    match completion {
      Completion::Finished => {
        self.0.downstream.with(|d| d.receive_completion(Completion::Finished));
      }
      Completion::Failure(err) => {
        log_debug!("catch replacing a failed upstream");
        let replacement = (self.0.handler)(err);
        replacement.receive(CatchSecond(self.0.clone()));
      }
    }
  }
}

// ==================== Second phase ====================

pub struct CatchSecond<H, D, F1>(Arc<CatchInner<H, D, F1>>);

impl<T, F2, H, D, F1> Subscriber<T, F2> for CatchSecond<H, D, F1>
where
  T: Send + 'static,
  F2: Send + 'static,
  F1: 'static,
  H: Send + Sync + 'static,
  D: Subscriber<T, F2>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let demand = {
      let mut state = self.0.state.lock();
      if !matches!(state.phase, CatchPhase::PendingSecond) {
        None
      } else {
        state.phase = CatchPhase::SecondActive(subscription.clone());
        Some(state.demand)
      }
    };
    match demand {
      None => subscription.cancel(),
      Some(demand) if demand.has_demand() => subscription.request(demand),
      Some(_) => {}
    }
  }

  fn receive(&self, input: T) -> Demand {
    if !matches!(self.0.state.lock().phase, CatchPhase::SecondActive(_)) {
      return Demand::NONE;
    }
    self.0.downstream.with(|d| d.receive(input))
  }

  fn receive_completion(&self, completion: Completion<F2>) {
    {
      let mut state = self.0.state.lock();
      if !matches!(state.phase, CatchPhase::SecondActive(_)) {
        return;
      }
      state.phase = CatchPhase::Cancelled;
    }
    self.0.downstream.with(|d| d.receive_completion(completion));
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    prelude::*,
    testing::{TestPublisher, TestSubscriber},
  };

  #[rxflow_macro::test]
  fn replaces_failed_upstream() {
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    Just::new(1)
      .set_failure()
      .append(Fail::new("boom"))
      .catch(|_: &'static str| Sequence::new(vec![2, 3]))
      .receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![1, 2, 3]);
    assert!(subscriber.is_finished());
    assert_eq!(subscriber.subscription_count(), 1);
  }

  #[rxflow_macro::test]
  fn remaining_demand_is_requested_from_the_replacement() {
    let first = TestPublisher::<i32, &'static str>::new();
    let second = TestPublisher::<i32, String>::new();
    let c_second = second.clone();
    let subscriber = TestSubscriber::with_demand(Demand::max(3));
    first
      .clone()
      .catch(move |_| c_second.clone())
      .receive(subscriber.clone());

    first.send(1);
    first.fail("broken");
    assert_eq!(second.requests(), vec![Demand::max(2)]);
    second.send(2);
    second.fail("also broken".to_string());
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert_eq!(subscriber.failure(), Some("also broken".to_string()));
  }

  #[rxflow_macro::test]
  fn finish_skips_the_handler() {
    let upstream = TestPublisher::<i32, &'static str>::new();
    let subscriber = TestSubscriber::<i32, Never>::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .catch(|_| -> Empty<i32, Never> { panic!("handler must not run") })
      .receive(subscriber.clone());
    upstream.finish();
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn cancel_reaches_the_replacement() {
    let first = TestPublisher::<i32, &'static str>::new();
    let second = TestPublisher::<i32, &'static str>::new();
    let c_second = second.clone();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    first
      .clone()
      .catch(move |_| c_second.clone())
      .receive(subscriber.clone());
    first.fail("x");
    subscriber.cancel();
    subscriber.cancel();
    assert_eq!(first.cancel_count(), 0);
    assert_eq!(second.cancel_count(), 1);
  }
}
