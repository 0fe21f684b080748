//! Timeout operator.
//!
//! Watches the gap between upstream events. The watchdog starts when the
//! upstream subscription arrives and restarts with every value; if it fires
//! first, the upstream is cancelled and the stream ends, either finished or
//! with the failure built by the configured error factory.
//!
//! Values are forwarded on the thread that delivers them. The watchdog and
//! the upstream share one delivery gate, so a completion produced by the
//! watchdog is never interleaved with a value still being delivered.

use std::{
  collections::VecDeque,
  fmt,
  marker::PhantomData,
  sync::{Arc, Weak},
  time::Duration,
};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::{DeliveryGate, Downstream},
  publisher::Publisher,
  scheduler::{Scheduler, TaskHandle},
  status::SubscriptionStatus,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

/// Builds the failure delivered when the watchdog fires.
pub type TimeoutError<F> = Arc<dyn Fn() -> F + Send + Sync>;

pub struct TimeoutOp<S: Publisher, Sch> {
  pub(crate) source: S,
  pub(crate) interval: Duration,
  pub(crate) scheduler: Sch,
  pub(crate) error: Option<TimeoutError<S::Failure>>,
}

impl<S: Publisher + Clone, Sch: Clone> Clone for TimeoutOp<S, Sch> {
  fn clone(&self) -> Self {
    TimeoutOp {
      source: self.source.clone(),
      interval: self.interval,
      scheduler: self.scheduler.clone(),
      error: self.error.clone(),
    }
  }
}

impl<S: Publisher + fmt::Debug, Sch> fmt::Debug for TimeoutOp<S, Sch> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TimeoutOp")
      .field("source", &self.source)
      .field("interval", &self.interval)
      .field("custom_error", &self.error.is_some())
      .finish()
  }
}

impl<S, Sch> Publisher for TimeoutOp<S, Sch>
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
    let inner = Arc::new(TimeoutInner {
      state: Mutex::new(TimeoutState {
        upstream: SubscriptionStatus::Awaiting,
        generation: 0,
        watchdog: None,
        outbox: VecDeque::new(),
        pending: None,
        gate: DeliveryGate::new(),
        done: false,
      }),
      downstream: Downstream::new(subscriber),
      interval: self.interval,
      scheduler: self.scheduler.clone(),
      error: self.error.clone(),
    });
    self.source.receive(TimeoutSubscriber { inner, _p: PhantomData });
  }
}

struct TimeoutState<T, F> {
  upstream: SubscriptionStatus,
  generation: u64,
  watchdog: Option<TaskHandle>,
  outbox: VecDeque<T>,
  pending: Option<Completion<F>>,
  gate: DeliveryGate,
  done: bool,
}

struct TimeoutInner<T, F, D, Sch> {
  state: Mutex<TimeoutState<T, F>>,
  downstream: Downstream<D>,
  interval: Duration,
  scheduler: Sch,
  error: Option<TimeoutError<F>>,
}

impl<T, F, D, Sch> TimeoutInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  /// Starts a fresh watchdog for the current generation, cancelling the
  /// previous one.
  fn restart_watchdog(self: &Arc<Self>) {
    let (generation, previous) = {
      let mut state = self.state.lock();
      if state.done || state.pending.is_some() {
        return;
      }
      state.generation += 1;
      (state.generation, state.watchdog.take())
    };
    if let Some(previous) = previous {
      previous.cancel();
    }
    let weak: Weak<Self> = Arc::downgrade(self);
    let handle = self.scheduler.schedule_repeating(
      self.scheduler.now() + self.interval,
      self.interval,
      self.scheduler.minimum_tolerance(),
      Box::new(move || {
        if let Some(inner) = weak.upgrade() {
          inner.timed_out(generation);
        }
      }),
    );
    let mut state = self.state.lock();
    if state.generation == generation && !state.done && state.pending.is_none() {
      state.watchdog = Some(handle);
    } else {
      drop(state);
      handle.cancel();
    }
  }

  fn timed_out(&self, generation: u64) {
    let (upstream, watchdog) = {
      let mut state = self.state.lock();
      if state.done || state.pending.is_some() || state.generation != generation {
        return;
      }
      let completion = match &self.error {
        Some(error) => Completion::Failure(error()),
        None => Completion::Finished,
      };
      state.pending = Some(completion);
      state.outbox.clear();
      (state.upstream.terminate(), state.watchdog.take())
    };
    log_debug!("timeout fired after {:?} without a value", self.interval);
    if let Some(watchdog) = watchdog {
      watchdog.cancel();
    }
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
    self.drain();
  }

  /// Delivers queued values, then any completion. Returns the demand the
  /// downstream handed back while this thread was delivering.
  fn drain(&self) -> Demand {
    let mut more = Demand::NONE;
    let mut state = self.state.lock();
    let Some(ticket) = state.gate.try_begin() else { return more };
    let mut unused = Demand::NONE;
    loop {
      if state.done {
        break;
      }
      if let Some(completion) = state.pending.take() {
        state.done = true;
        state.outbox.clear();
        state.gate.finish(ticket, &mut unused);
        drop(state);
        self.downstream.with(|d| d.receive_completion(completion));
        return Demand::NONE;
      }
      let Some(value) = state.outbox.pop_front() else { break };
      drop(state);
      more += self.downstream.with(|d| d.receive(value));
      state = self.state.lock();
    }
    state.gate.finish(ticket, &mut unused);
    more
  }
}

impl<T, F, D, Sch> Cancellable for TimeoutInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn cancel(&self) {
    let (upstream, watchdog) = {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.done = true;
      state.pending = None;
      state.outbox.clear();
      (state.upstream.terminate(), state.watchdog.take())
    };
    log_trace!("timeout cancelled");
    if let Some(watchdog) = watchdog {
      watchdog.cancel();
    }
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }
}

impl<T, F, D, Sch> Subscription for TimeoutInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let upstream = self.state.lock().upstream.subscription();
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }
}

pub struct TimeoutSubscriber<T, F, D, Sch> {
  inner: Arc<TimeoutInner<T, F, D, Sch>>,
  _p: PhantomData<fn(T, F)>,
}

impl<T, F, D, Sch> Subscriber<T, F> for TimeoutSubscriber<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut state = self.inner.state.lock();
    if !state.upstream.is_awaiting() || state.done {
      drop(state);
      log_warn!("timeout received an unexpected subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription);
    drop(state);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
    self.inner.restart_watchdog();
  }

  fn receive(&self, input: T) -> Demand {
    {
      let mut state = self.inner.state.lock();
      if !state.upstream.is_subscribed() || state.pending.is_some() {
        return Demand::NONE;
      }
      state.outbox.push_back(input);
    }
    self.inner.restart_watchdog();
    self.inner.drain()
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let watchdog = {
      let mut state = self.inner.state.lock();
      if state.upstream.terminate().is_none() || state.done || state.pending.is_some() {
        return;
      }
      state.pending = Some(completion);
      state.watchdog.take()
    };
    if let Some(watchdog) = watchdog {
      watchdog.cancel();
    }
    self.inner.drain();
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    prelude::*,
    testing::{TestPublisher, TestScheduler, TestSubscriber},
  };

  fn ms(n: u64) -> Duration { Duration::from_millis(n) }

  #[rxflow_macro::test]
  fn values_reset_the_watchdog() {
    let upstream = TestPublisher::<i32, Never>::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .timeout(ms(10), scheduler.clone())
      .receive(subscriber.clone());
    assert_eq!(upstream.requests(), vec![Demand::UNLIMITED]);

    scheduler.advance_to(ms(8));
    upstream.send(1);
    scheduler.advance_to(ms(16));
    upstream.send(2);
    assert!(!subscriber.is_completed());

    scheduler.advance_to(ms(26));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
    assert_eq!(upstream.cancel_count(), 1);
    assert_eq!(scheduler.pending_count(), 0);
  }

  #[rxflow_macro::test]
  fn custom_error_on_timeout() {
    let upstream = TestPublisher::<i32, FlowError>::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .timeout_error(ms(5), scheduler.clone())
      .receive(subscriber.clone());

    scheduler.advance_by(ms(5));
    assert_eq!(subscriber.failure(), Some(FlowError::Timeout(ms(5))));
    upstream.send(1);
    assert!(subscriber.values().is_empty());
    assert_eq!(subscriber.completion_count(), 1);
  }

  #[rxflow_macro::test]
  fn upstream_completion_stops_the_watchdog() {
    let upstream = TestPublisher::<i32, Never>::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .timeout(ms(5), scheduler.clone())
      .receive(subscriber.clone());

    upstream.send(1);
    upstream.finish();
    scheduler.advance_by(ms(50));
    assert!(subscriber.is_finished());
    assert_eq!(subscriber.completion_count(), 1);
    assert_eq!(upstream.cancel_count(), 0);
  }

  #[rxflow_macro::test]
  fn returned_demand_reaches_upstream() {
    let upstream = TestPublisher::<i32, Never>::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::max(1)).returning(Demand::max(2));
    upstream
      .clone()
      .timeout(ms(5), scheduler.clone())
      .receive(subscriber.clone());

    assert_eq!(upstream.send(1), Demand::max(2));
    assert_eq!(upstream.requests(), vec![Demand::max(1)]);
  }

  #[rxflow_macro::test]
  fn immediate_watchdog_fires_after_the_subscription() {
    let upstream = TestPublisher::<i32, FlowError>::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .timeout_error(ms(10), ImmediateScheduler)
      .receive(subscriber.clone());
    assert_eq!(subscriber.subscription_count(), 1);
    assert_eq!(subscriber.failure(), Some(FlowError::Timeout(ms(10))));
    assert!(subscriber.subscribed_first());
    assert_eq!(upstream.requests(), vec![Demand::UNLIMITED]);
    assert_eq!(upstream.cancel_count(), 1);
  }
}
