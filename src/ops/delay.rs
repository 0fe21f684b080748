//! Delay operator.
//!
//! Shifts every value and the completion by `interval` on a scheduler,
//! keeping their order. Demand passes straight through to the upstream.

use std::{
  collections::VecDeque,
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

#[derive(Clone)]
pub struct DelayOp<S, Sch> {
  pub(crate) source: S,
  pub(crate) interval: Duration,
  pub(crate) scheduler: Sch,
}

impl<S, Sch> Publisher for DelayOp<S, Sch>
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
    let inner = Arc::new(DelayInner {
      state: Mutex::new(DelayState {
        upstream: SubscriptionStatus::Awaiting,
        queue: VecDeque::new(),
        timers: VecDeque::new(),
        ready: 0,
        gate: DeliveryGate::new(),
        done: false,
      }),
      downstream: Downstream::new(subscriber),
      interval: self.interval,
      scheduler: self.scheduler.clone(),
    });
    self.source.receive(DelaySubscriber { inner, _p: PhantomData });
  }
}

enum Event<T, F> {
  Value(T),
  Completion(Completion<F>),
}

struct DelayState<T, F> {
  upstream: SubscriptionStatus,
  /// Events in arrival order; the first `ready` of them are due.
  queue: VecDeque<Event<T, F>>,
  timers: VecDeque<TaskHandle>,
  ready: usize,
  gate: DeliveryGate,
  done: bool,
}

struct DelayInner<T, F, D, Sch> {
  state: Mutex<DelayState<T, F>>,
  downstream: Downstream<D>,
  interval: Duration,
  scheduler: Sch,
}

impl<T, F, D, Sch> DelayInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn enqueue(self: &Arc<Self>, event: Event<T, F>) {
    {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.queue.push_back(event);
    }
    let weak: Weak<Self> = Arc::downgrade(self);
    let timer = self.scheduler.schedule_after(
      self.scheduler.now() + self.interval,
      Box::new(move || {
        if let Some(inner) = weak.upgrade() {
          inner.due();
        }
      }),
    );
    let mut state = self.state.lock();
    if state.done {
      drop(state);
      timer.cancel();
    } else {
      state.timers.push_back(timer);
    }
  }

  fn due(&self) {
    {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.timers.pop_front();
      state.ready += 1;
    }
    self.drain();
  }

  fn drain(&self) {
    let mut state = self.state.lock();
    let Some(ticket) = state.gate.try_begin() else { return };
    let mut unused = Demand::NONE;
    while !state.done && state.ready > 0 {
      let Some(event) = state.queue.pop_front() else { break };
      state.ready -= 1;
      match event {
        Event::Value(value) => {
          drop(state);
          let more = self.downstream.with(|d| d.receive(value));
          let upstream = self.state.lock().upstream.subscription();
          if let (true, Some(upstream)) = (more.has_demand(), upstream) {
            upstream.request(more);
          }
          state = self.state.lock();
        }
        Event::Completion(completion) => {
          state.done = true;
          state.gate.finish(ticket, &mut unused);
          drop(state);
          self.downstream.with(|d| d.receive_completion(completion));
          return;
        }
      }
    }
    state.gate.finish(ticket, &mut unused);
  }
}

impl<T, F, D, Sch> Cancellable for DelayInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn cancel(&self) {
    let (upstream, timers) = {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.done = true;
      state.queue.clear();
      (state.upstream.terminate(), std::mem::take(&mut state.timers))
    };
    log_trace!("delay cancelled with {} timers pending", timers.len());
    for timer in timers {
      timer.cancel();
    }
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }
}

impl<T, F, D, Sch> Subscription for DelayInner<T, F, D, Sch>
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

pub struct DelaySubscriber<T, F, D, Sch> {
  inner: Arc<DelayInner<T, F, D, Sch>>,
  _p: PhantomData<fn(T, F)>,
}

impl<T, F, D, Sch> Subscriber<T, F> for DelaySubscriber<T, F, D, Sch>
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
      log_warn!("delay received an unexpected subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription);
    drop(state);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
  }

  fn receive(&self, input: T) -> Demand {
    if !self.inner.state.lock().upstream.is_subscribed() {
      return Demand::NONE;
    }
    self.inner.enqueue(Event::Value(input));
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    if self.inner.state.lock().upstream.terminate().is_none() {
      return;
    }
    self.inner.enqueue(Event::Completion(completion));
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
  fn shifts_values_and_completion() {
    let upstream = TestPublisher::<i32, &'static str>::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .delay(ms(10), scheduler.clone())
      .receive(subscriber.clone());
    assert_eq!(upstream.requests(), vec![Demand::UNLIMITED]);

    upstream.send(1);
    scheduler.advance_to(ms(4));
    upstream.send(2);
    upstream.fail("late");

    scheduler.advance_to(ms(10));
    assert_eq!(subscriber.values(), vec![1]);
    scheduler.advance_to(ms(13));
    assert!(!subscriber.is_completed());
    scheduler.advance_to(ms(14));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert_eq!(subscriber.failure(), Some("late"));
  }

  #[rxflow_macro::test]
  fn returned_demand_is_requested_upstream() {
    let upstream = TestPublisher::<i32, Never>::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::max(1)).returning(Demand::max(1));
    upstream
      .clone()
      .delay(ms(1), scheduler.clone())
      .receive(subscriber.clone());

    upstream.send(1);
    scheduler.advance_by(ms(1));
    assert_eq!(upstream.requests(), vec![Demand::max(1), Demand::max(1)]);
  }

  #[rxflow_macro::test]
  fn cancel_drops_scheduled_events() {
    let upstream = TestPublisher::<i32, Never>::new();
    let scheduler = TestScheduler::new();
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    upstream
      .clone()
      .delay(ms(5), scheduler.clone())
      .receive(subscriber.clone());

    upstream.send(1);
    upstream.send(2);
    subscriber.cancel();
    assert_eq!(scheduler.pending_count(), 0);
    scheduler.advance_by(ms(5));
    assert!(subscriber.values().is_empty());
    assert_eq!(upstream.cancel_count(), 1);
  }
}
