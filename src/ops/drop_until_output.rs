//! DropUntilOutput operator.
//!
//! Ignores upstream values until a second publisher (the trigger) produces
//! its first value, then forwards everything. A trigger that completes
//! without ever producing a value ends the stream with its completion.
//!
//! A dropped value hands its unit of demand straight back to the upstream,
//! so the downstream never loses demand to values it did not see.

use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::Downstream,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

#[derive(Clone, Debug)]
pub struct DropUntilOutputOp<S, P> {
  pub(crate) source: S,
  pub(crate) trigger: P,
}

impl<S, P> Publisher for DropUntilOutputOp<S, P>
where
  S: Publisher,
  P: Publisher<Failure = S::Failure>,
{
  type Output = S::Output;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<S::Output, S::Failure>,
  {
    let inner = Arc::new(UntilInner::new(subscriber));
    inner.downstream.with(|d| d.receive_subscription(inner.clone()));
    self.trigger.receive(DropTrigger::<O, S::Output> { inner: inner.clone(), _p: PhantomData });
    self.source.receive(DropUpstream(inner));
  }
}

// ==================== Shared state ====================

pub(crate) struct UntilState {
  pub(crate) upstream: Option<SharedSubscription>,
  pub(crate) trigger: Option<SharedSubscription>,
  pub(crate) triggered: bool,
  pub(crate) demand: Demand,
  pub(crate) done: bool,
}

/// State shared by `drop_until_output` and `prefix_until_output`: one
/// upstream, one trigger publisher watched for its first value.
pub(crate) struct UntilInner<D> {
  pub(crate) state: Mutex<UntilState>,
  pub(crate) downstream: Downstream<D>,
}

impl<D> UntilInner<D> {
  pub(crate) fn new(downstream: D) -> Self {
    UntilInner {
      state: Mutex::new(UntilState {
        upstream: None,
        trigger: None,
        triggered: false,
        demand: Demand::NONE,
        done: false,
      }),
      downstream: Downstream::new(downstream),
    }
  }

  /// Marks the stage done and hands back both subscriptions for cancelling.
  pub(crate) fn finish(&self) -> Option<[Option<SharedSubscription>; 2]> {
    let mut state = self.state.lock();
    if state.done {
      return None;
    }
    state.done = true;
    Some([state.upstream.take(), state.trigger.take()])
  }

  pub(crate) fn attach_upstream(&self, subscription: SharedSubscription) {
    let demand = {
      let mut state = self.state.lock();
      if state.done || state.upstream.is_some() {
        None
      } else {
        state.upstream = Some(subscription.clone());
        Some(state.demand)
      }
    };
    match demand {
      None => subscription.cancel(),
      Some(demand) if demand.has_demand() => subscription.request(demand),
      Some(_) => {}
    }
  }

  pub(crate) fn attach_trigger(&self, subscription: SharedSubscription) {
    let accepted = {
      let mut state = self.state.lock();
      let accepted = !state.done && !state.triggered && state.trigger.is_none();
      if accepted {
        state.trigger = Some(subscription.clone());
      }
      accepted
    };
    if accepted {
      subscription.request(Demand::max(1));
    } else {
      subscription.cancel();
    }
  }
}

pub(crate) fn cancel_all(subscriptions: [Option<SharedSubscription>; 2]) {
  for subscription in subscriptions.into_iter().flatten() {
    subscription.cancel();
  }
}

impl<D: Send + 'static> Cancellable for UntilInner<D> {
  fn cancel(&self) {
    if let Some(subscriptions) = self.finish() {
      log_trace!("until-output stage cancelled");
      cancel_all(subscriptions);
    }
  }
}

impl<D: Send + 'static> Subscription for UntilInner<D> {
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

// ==================== Subscribers ====================

pub struct DropUpstream<D>(Arc<UntilInner<D>>);

impl<T, F, D> Subscriber<T, F> for DropUpstream<D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.0.attach_upstream(subscription);
  }

  fn receive(&self, input: T) -> Demand {
    {
      let state = self.0.state.lock();
      if state.done {
        return Demand::NONE;
      }
      if !state.triggered {
        return Demand::max(1);
      }
    }
    let more = self.0.downstream.with(|d| d.receive(input));
    let mut state = self.0.state.lock();
    state.demand.take_one();
    state.demand += more;
    more
  }

  fn receive_completion(&self, completion: Completion<F>) {
    if let Some(subscriptions) = self.0.finish() {
      cancel_all(subscriptions);
      self.0.downstream.with(|d| d.receive_completion(completion));
    }
  }
}

/// `T` is the downstream's value type, pinned here because the trigger's
/// own value type is unrelated to it.
pub struct DropTrigger<D, T> {
  inner: Arc<UntilInner<D>>,
  _p: PhantomData<fn(T)>,
}

impl<O, T, F, D> Subscriber<O, F> for DropTrigger<D, T>
where
  O: Send + 'static,
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.inner.attach_trigger(subscription);
  }

  fn receive(&self, _input: O) -> Demand {
    let trigger = {
      let mut state = self.inner.state.lock();
      if state.done || state.triggered {
        return Demand::NONE;
      }
      state.triggered = true;
      state.trigger.take()
    };
    log_trace!("drop_until_output triggered");
    if let Some(trigger) = trigger {
      trigger.cancel();
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    {
      let mut state = self.inner.state.lock();
      if state.triggered {
        state.trigger = None;
        return;
      }
    }
    if let Some(subscriptions) = self.inner.finish() {
      cancel_all(subscriptions);
      self.inner.downstream.with(|d| d.receive_completion(completion));
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
  fn drops_until_trigger_emits() {
    let upstream = TestPublisher::<i32, Never>::new();
    let trigger = TestPublisher::<(), Never>::new();
    let subscriber = TestSubscriber::with_demand(Demand::max(5));
    upstream
      .clone()
      .drop_until_output(trigger.clone())
      .receive(subscriber.clone());
    assert_eq!(trigger.requests(), vec![Demand::max(1)]);

    assert_eq!(upstream.send(1), Demand::max(1));
    trigger.send(());
    assert_eq!(trigger.cancel_count(), 1);
    upstream.send(2);
    upstream.send(3);
    upstream.finish();
    assert_eq!(subscriber.values(), vec![2, 3]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn trigger_completion_without_value_ends_the_stream() {
    let upstream = TestPublisher::<i32, &'static str>::new();
    let trigger = TestPublisher::<(), &'static str>::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .drop_until_output(trigger.clone())
      .receive(subscriber.clone());

    trigger.fail("no trigger");
    assert_eq!(subscriber.failure(), Some("no trigger"));
    assert_eq!(upstream.cancel_count(), 1);
  }

  #[rxflow_macro::test]
  fn trigger_completion_after_value_is_ignored() {
    let upstream = TestPublisher::<i32, Never>::new();
    let trigger = TestPublisher::<(), Never>::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .drop_until_output(trigger.clone())
      .receive(subscriber.clone());

    trigger.send(());
    trigger.finish();
    upstream.send(1);
    assert_eq!(subscriber.values(), vec![1]);
    assert!(!subscriber.is_completed());
  }
}
