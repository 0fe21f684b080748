//! Debounce operator.
//!
//! Emits a value only after the upstream has been quiet for `due`. Every
//! value restarts the timer and replaces the value waiting for it; a timer
//! that fires after it has been superseded finds a newer generation and does
//! nothing.
//!
//! A value whose timer fires while the downstream has no demand is dropped.
//! When the upstream finishes while a timer is running, the pending value is
//! emitted first and the completion follows it. A failure is forwarded
//! immediately and discards the pending value.

use std::{
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
pub struct DebounceOp<S, Sch> {
  pub(crate) source: S,
  pub(crate) due: Duration,
  pub(crate) scheduler: Sch,
}

impl<S, Sch> Publisher for DebounceOp<S, Sch>
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
    let inner = Arc::new(DebounceInner {
      state: Mutex::new(DebounceState {
        upstream: SubscriptionStatus::Awaiting,
        generation: 0,
        current: None,
        timer: None,
        upstream_finished: false,
        demand: Demand::NONE,
        outbox: None,
        pending: None,
        gate: DeliveryGate::new(),
        done: false,
      }),
      downstream: Downstream::new(subscriber),
      due: self.due,
      scheduler: self.scheduler.clone(),
    });
    self.source.receive(DebounceSubscriber { inner, _p: PhantomData });
  }
}

struct DebounceState<T, F> {
  upstream: SubscriptionStatus,
  generation: u64,
  /// The newest value, waiting for its timer.
  current: Option<T>,
  timer: Option<TaskHandle>,
  upstream_finished: bool,
  demand: Demand,
  /// A value whose timer fired, waiting to be handed downstream.
  outbox: Option<T>,
  pending: Option<Completion<F>>,
  gate: DeliveryGate,
  done: bool,
}

struct DebounceInner<T, F, D, Sch> {
  state: Mutex<DebounceState<T, F>>,
  downstream: Downstream<D>,
  due: Duration,
  scheduler: Sch,
}

impl<T, F, D, Sch> DebounceInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn schedule(self: &Arc<Self>, generation: u64) -> TaskHandle {
    let weak: Weak<Self> = Arc::downgrade(self);
    let when = self.scheduler.now() + self.due;
    self.scheduler.schedule_after(
      when,
      Box::new(move || {
        if let Some(inner) = weak.upgrade() {
          inner.fire(generation);
        }
      }),
    )
  }

  fn fire(&self, generation: u64) {
    {
      let mut state = self.state.lock();
      if state.done || state.generation != generation {
        return;
      }
      state.timer = None;
      let Some(value) = state.current.take() else { return };
      if state.demand.take_one() {
        state.outbox = Some(value);
      } else {
        log_trace!("debounce dropped a value, downstream has no demand");
      }
      if state.upstream_finished {
        state.pending = Some(Completion::Finished);
      }
    }
    self.drain();
  }

  fn drain(&self) {
    let mut state = self.state.lock();
    let Some(ticket) = state.gate.try_begin() else { return };
    loop {
      let st = &mut *state;
      st.gate.settle(&ticket, &mut st.demand);
      if st.done {
        break;
      }
      if let Some(value) = st.outbox.take() {
        drop(state);
        let more = self.downstream.with(|d| d.receive(value));
        state = self.state.lock();
        let st = &mut *state;
        st.gate.credit(&mut st.demand, more);
        continue;
      }
      if let Some(completion) = st.pending.take() {
        st.done = true;
        st.gate.finish(ticket, &mut st.demand);
        drop(state);
        self.downstream.with(|d| d.receive_completion(completion));
        return;
      }
      break;
    }
    let st = &mut *state;
    st.gate.finish(ticket, &mut st.demand);
  }
}

impl<T, F, D, Sch> Cancellable for DebounceInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn cancel(&self) {
    let (upstream, timer) = {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.done = true;
      state.current = None;
      state.outbox = None;
      state.pending = None;
      (state.upstream.terminate(), state.timer.take())
    };
    log_trace!("debounce cancelled");
    if let Some(timer) = timer {
      timer.cancel();
    }
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }
}

impl<T, F, D, Sch> Subscription for DebounceInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let mut state = self.state.lock();
    if !state.done {
      let st = &mut *state;
      st.gate.credit(&mut st.demand, demand);
    }
  }
}

pub struct DebounceSubscriber<T, F, D, Sch> {
  inner: Arc<DebounceInner<T, F, D, Sch>>,
  _p: PhantomData<fn(T, F)>,
}

impl<T, F, D, Sch> Subscriber<T, F> for DebounceSubscriber<T, F, D, Sch>
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
      log_warn!("debounce received an unexpected subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription.clone());
    drop(state);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
    subscription.request(Demand::UNLIMITED);
  }

  fn receive(&self, input: T) -> Demand {
    let (generation, previous) = {
      let mut state = self.inner.state.lock();
      if !state.upstream.is_subscribed() {
        return Demand::NONE;
      }
      state.generation += 1;
      state.current = Some(input);
      (state.generation, state.timer.take())
    };
    if let Some(previous) = previous {
      previous.cancel();
    }
    let timer = self.inner.schedule(generation);
    let mut state = self.inner.state.lock();
    if state.generation == generation && state.current.is_some() && !state.done {
      state.timer = Some(timer);
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let timer = {
      let mut state = self.inner.state.lock();
      if state.upstream.terminate().is_none() || state.done {
        return;
      }
      match completion {
        Completion::Finished if state.current.is_some() => {
          state.upstream_finished = true;
          return;
        }
        completion => {
          state.current = None;
          state.pending = Some(completion);
          state.timer.take()
        }
      }
    };
    if let Some(timer) = timer {
      timer.cancel();
    }
    self.inner.drain();
  }
}
