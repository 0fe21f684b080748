//! Throttle operator.
//!
//! Publishes at most one value per `interval`. With `latest` set, the value
//! emitted at the end of a window is the newest one received during it;
//! otherwise it is the first one, and the rest of the window is dropped.
//!
//! A value is only taken while the downstream has demand for it, and one
//! unit of demand is reserved for it when it is scheduled. A completion that
//! arrives while a value is scheduled is delivered right after that value.

use std::{
  marker::PhantomData,
  sync::{Arc, Weak},
  time::Duration,
};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::Downstream,
  publisher::Publisher,
  scheduler::{Scheduler, TaskHandle},
  status::SubscriptionStatus,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

#[derive(Clone)]
pub struct ThrottleOp<S, Sch> {
  pub(crate) source: S,
  pub(crate) interval: Duration,
  pub(crate) scheduler: Sch,
  pub(crate) latest: bool,
}

impl<S, Sch> Publisher for ThrottleOp<S, Sch>
where
  S: Publisher,
  Sch: Scheduler,
{
  type Output = S::Output;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<S::Output, S::Failure>,
  {
    let inner = Arc::new(ThrottleInner {
      state: Mutex::new(ThrottleState {
        upstream: SubscriptionStatus::Awaiting,
        finishing: false,
        demand: Demand::NONE,
        last_emission: None,
        pending_input: None,
        pending_completion: None,
        timer: None,
      }),
      downstream: Downstream::new(subscriber),
      interval: self.interval,
      latest: self.latest,
      scheduler: self.scheduler.clone(),
    });
    self.source.receive(ThrottleSubscriber { inner, _p: PhantomData });
  }
}

struct ThrottleState<T, F> {
  upstream: SubscriptionStatus,
  /// The upstream completed; its completion is scheduled.
  finishing: bool,
  demand: Demand,
  last_emission: Option<Duration>,
  pending_input: Option<T>,
  pending_completion: Option<Completion<F>>,
  timer: Option<TaskHandle>,
}

impl<T, F> ThrottleState<T, F> {
  fn has_scheduled_output(&self) -> bool {
    self.pending_input.is_some() || self.pending_completion.is_some()
  }

  fn is_live(&self) -> bool { self.upstream.is_subscribed() || self.finishing }
}

struct ThrottleInner<T, F, D, Sch> {
  state: Mutex<ThrottleState<T, F>>,
  downstream: Downstream<D>,
  interval: Duration,
  latest: bool,
  scheduler: Sch,
}

impl<T, F, D, Sch> ThrottleInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn schedule_emission(self: &Arc<Self>, at: Option<Duration>) -> Option<TaskHandle> {
    let weak: Weak<Self> = Arc::downgrade(self);
    let action = Box::new(move || {
      if let Some(inner) = weak.upgrade() {
        inner.emit();
      }
    });
    match at {
      Some(at) => Some(self.scheduler.schedule_after(at, action)),
      None => {
        self.scheduler.schedule(action);
        None
      }
    }
  }

  fn emit(&self) {
    let (input, completion, upstream) = {
      let mut state = self.state.lock();
      if !state.is_live() {
        return;
      }
      if state.pending_input.is_some() {
        state.last_emission = Some(self.scheduler.now());
      }
      state.timer = None;
      let input = state.pending_input.take();
      let completion = state.pending_completion.take();
      let mut upstream = None;
      if completion.is_some() {
        state.finishing = false;
        upstream = state.upstream.terminate();
      }
      (input, completion, upstream)
    };
    drop(upstream);

    let more = self.downstream.with(|d| {
      let more = input.map_or(Demand::NONE, |value| d.receive(value));
      if let Some(completion) = completion {
        d.receive_completion(completion);
      }
      more
    });
    if more.has_demand() {
      self.state.lock().demand += more;
    }
  }
}

impl<T, F, D, Sch> Cancellable for ThrottleInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn cancel(&self) {
    let (upstream, timer) = {
      let mut state = self.state.lock();
      state.finishing = false;
      state.pending_input = None;
      state.pending_completion = None;
      (state.upstream.terminate(), state.timer.take())
    };
    if let Some(timer) = timer {
      timer.cancel();
    }
    if let Some(upstream) = upstream {
      log_trace!("throttle cancelled");
      upstream.cancel();
    }
  }
}

impl<T, F, D, Sch> Subscription for ThrottleInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let mut state = self.state.lock();
    if state.upstream.is_subscribed() {
      state.demand += demand;
    }
  }
}

pub struct ThrottleSubscriber<T, F, D, Sch> {
  inner: Arc<ThrottleInner<T, F, D, Sch>>,
  _p: PhantomData<fn(T, F)>,
}

impl<T, F, D, Sch> Subscriber<T, F> for ThrottleSubscriber<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut state = self.inner.state.lock();
    if !state.upstream.is_awaiting() {
      drop(state);
      log_warn!("throttle received a second subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription.clone());
    drop(state);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
    if self.inner.state.lock().upstream.is_subscribed() {
      subscription.request(Demand::UNLIMITED);
    }
  }

  fn receive(&self, input: T) -> Demand {
    let at = {
      let mut state = self.inner.state.lock();
      if !state.upstream.is_subscribed() || !state.demand.has_demand() {
        return Demand::NONE;
      }
      let scheduled = state.has_scheduled_output();
      if scheduled {
        if self.inner.latest {
          state.pending_input = Some(input);
        }
        return Demand::NONE;
      }
      let now = self.inner.scheduler.now();
      let earliest = state.last_emission.map(|last| last + self.inner.interval);
      state.demand.take_one();
      state.pending_input = Some(input);
      earliest.filter(|earliest| *earliest > now)
    };
    let timer = self.inner.schedule_emission(at);
    if let Some(timer) = timer {
      let mut state = self.inner.state.lock();
      if state.has_scheduled_output() {
        state.timer = Some(timer);
      }
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    {
      let mut state = self.inner.state.lock();
      if !state.upstream.is_subscribed() {
        return;
      }
      state.finishing = true;
      let scheduled = state.has_scheduled_output();
      state.pending_completion = Some(completion);
      if scheduled {
        return;
      }
    }
    self.inner.schedule_emission(None);
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    prelude::*,
    testing::{TestPublisher, TestScheduler, TestSubscriber},
  };

  fn ms(n: u64) -> Duration { Duration::from_millis(n) }

  fn setup(
    latest: bool,
  ) -> (TestPublisher<i32, Never>, TestScheduler, TestSubscriber<i32, Never>) {
    let upstream = TestPublisher::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .throttle(ms(10), scheduler.clone(), latest)
      .receive(subscriber.clone());
    (upstream, scheduler, subscriber)
  }

  #[rxflow_macro::test]
  fn latest_emits_newest_value_of_each_window() {
    let (upstream, scheduler, subscriber) = setup(true);
    upstream.send(1);
    scheduler.flush();
    assert_eq!(subscriber.values(), vec![1]);

    scheduler.advance_to(ms(2));
    upstream.send(2);
    upstream.send(3);
    scheduler.advance_to(ms(9));
    assert_eq!(subscriber.values(), vec![1]);
    scheduler.advance_to(ms(10));
    assert_eq!(subscriber.values(), vec![1, 3]);
  }

  #[rxflow_macro::test]
  fn first_keeps_first_value_of_each_window() {
    let (upstream, scheduler, subscriber) = setup(false);
    upstream.send(1);
    scheduler.flush();
    upstream.send(2);
    upstream.send(3);
    scheduler.advance_to(ms(10));
    assert_eq!(subscriber.values(), vec![1, 2]);
  }

  #[rxflow_macro::test]
  fn completion_flushes_pending_value() {
    let (upstream, scheduler, subscriber) = setup(true);
    upstream.send(1);
    scheduler.flush();
    upstream.send(2);
    upstream.finish();
    assert!(!subscriber.is_completed());

    scheduler.advance_to(ms(10));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn values_without_demand_are_dropped() {
    let upstream = TestPublisher::<i32, Never>::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::new();
    upstream
      .clone()
      .throttle(ms(10), scheduler.clone(), true)
      .receive(subscriber.clone());

    upstream.send(1);
    scheduler.flush();
    subscriber.request(Demand::max(1));
    upstream.send(2);
    scheduler.flush();
    assert_eq!(subscriber.values(), vec![2]);
  }

  #[rxflow_macro::test]
  fn cancel_discards_scheduled_value() {
    let (upstream, scheduler, subscriber) = setup(true);
    upstream.send(1);
    scheduler.flush();
    upstream.send(2);
    subscriber.cancel();
    scheduler.advance_by(ms(20));
    assert_eq!(subscriber.values(), vec![1]);
    assert_eq!(upstream.cancel_count(), 1);
  }

  #[rxflow_macro::test]
  fn synchronous_upstream_on_immediate_scheduler() {
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    Sequence::new(vec![1, 2])
      .throttle(ms(1), ImmediateScheduler, false)
      .receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
    assert!(subscriber.subscribed_first());
  }

  #[rxflow_macro::test]
  fn synchronous_upstream_on_test_scheduler() {
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    Sequence::new(vec![1, 2, 3])
      .throttle(ms(10), scheduler.clone(), false)
      .receive(subscriber.clone());
    assert!(subscriber.values().is_empty());

    scheduler.flush();
    assert_eq!(subscriber.values(), vec![1]);
    assert!(subscriber.is_finished());
    assert!(subscriber.subscribed_first());
  }
}
