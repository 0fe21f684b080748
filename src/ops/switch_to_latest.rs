//! SwitchToLatest operator.
//!
//! Flattens a publisher of publishers by following only the most recent
//! one: every new inner publisher from the upstream cancels the previous
//! inner subscription before being subscribed itself.
//!
//! Each inner subscription is tagged with a generation number, so anything a
//! cancelled inner publisher still sends afterwards is recognised as stale
//! and dropped. The outstanding downstream demand is requested from each new
//! inner subscription as it attaches; demand requested while no inner
//! subscription is active is held until one is.
//!
//! The stream finishes once the upstream has finished and the active inner
//! publisher (if any) has finished too. A failure from either side cancels
//! the other and is forwarded once.

use std::{collections::VecDeque, marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::{DeliveryGate, Downstream},
  publisher::Publisher,
  status::SubscriptionStatus,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

#[derive(Clone, Debug)]
pub struct SwitchToLatestOp<S> {
  pub(crate) source: S,
}

impl<S> Publisher for SwitchToLatestOp<S>
where
  S: Publisher,
  S::Output: Publisher<Failure = S::Failure>,
{
  type Output = <S::Output as Publisher>::Output;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<Self::Output, S::Failure>,
  {
    let inner = Arc::new(SwitchInner {
      state: Mutex::new(SwitchState {
        outer: SubscriptionStatus::Awaiting,
        outer_finished: false,
        generation: 0,
        current: None,
        child: None,
        demand: Demand::NONE,
        buffer: VecDeque::new(),
        gate: DeliveryGate::new(),
        phase: Phase::Running,
        pending: None,
      }),
      downstream: Downstream::new(subscriber),
    });
    self.source.receive(SwitchOuter { inner, _p: PhantomData });
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
  Running,
  Terminating,
  Done,
}

struct SwitchState<T, F> {
  outer: SubscriptionStatus,
  outer_finished: bool,
  generation: u64,
  /// Generation of the inner publisher currently followed.
  current: Option<u64>,
  /// Its subscription, once handed over.
  child: Option<SharedSubscription>,
  demand: Demand,
  buffer: VecDeque<T>,
  gate: DeliveryGate,
  phase: Phase,
  pending: Option<Completion<F>>,
}

impl<T, F> SwitchState<T, F> {
  fn is_current(&self, generation: u64) -> bool {
    self.phase == Phase::Running && self.current == Some(generation)
  }
}

struct SwitchInner<T, F, D> {
  state: Mutex<SwitchState<T, F>>,
  downstream: Downstream<D>,
}

impl<T, F, D> SwitchInner<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn fail(&self, err: F) {
    let released = {
      let mut state = self.state.lock();
      if state.phase != Phase::Running {
        return;
      }
      state.phase = Phase::Terminating;
      state.pending = Some(Completion::Failure(err));
      state.buffer.clear();
      state.current = None;
      [state.outer.terminate(), state.child.take()]
    };
    log_debug!("switch_to_latest failed, cancelling the other side");
    for subscription in released.into_iter().flatten() {
      subscription.cancel();
    }
    self.drain();
  }

  fn drain(&self) {
    let mut state = self.state.lock();
    let Some(ticket) = state.gate.try_begin() else { return };
    loop {
      let st = &mut *state;
      st.gate.settle(&ticket, &mut st.demand);

      if let Some(completion) = st.pending.take() {
        st.phase = Phase::Done;
        st.gate.finish(ticket, &mut st.demand);
        drop(state);
        self.downstream.with(|d| d.receive_completion(completion));
        return;
      }
      if st.phase != Phase::Running {
        break;
      }

      if st.demand.has_demand() {
        if let Some(value) = st.buffer.pop_front() {
          st.demand.take_one();
          drop(state);
          let more = self.downstream.with(|d| d.receive(value));
          state = self.state.lock();
          if more.has_demand() && state.phase == Phase::Running {
            let st = &mut *state;
            st.gate.credit(&mut st.demand, more);
            if let Some(child) = st.child.clone() {
              drop(state);
              child.request(more);
              state = self.state.lock();
            }
          }
          continue;
        }
      }

      if st.outer_finished && st.current.is_none() && st.buffer.is_empty() {
        st.phase = Phase::Terminating;
        st.pending = Some(Completion::Finished);
        continue;
      }
      break;
    }
    let st = &mut *state;
    st.gate.finish(ticket, &mut st.demand);
  }
}

impl<T, F, D> Cancellable for SwitchInner<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn cancel(&self) {
    let released = {
      let mut state = self.state.lock();
      if state.phase == Phase::Done {
        return;
      }
      state.phase = Phase::Done;
      state.pending = None;
      state.buffer.clear();
      state.current = None;
      [state.outer.terminate(), state.child.take()]
    };
    log_trace!("switch_to_latest cancelled");
    for subscription in released.into_iter().flatten() {
      subscription.cancel();
    }
  }
}

impl<T, F, D> Subscription for SwitchInner<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let child = {
      let mut state = self.state.lock();
      if state.phase != Phase::Running {
        return;
      }
      let st = &mut *state;
      st.gate.credit(&mut st.demand, demand);
      st.child.clone()
    };
    if let Some(child) = child {
      child.request(demand);
    }
    self.drain();
  }
}

// ==================== Outer ====================

pub struct SwitchOuter<T, F, D> {
  inner: Arc<SwitchInner<T, F, D>>,
  _p: PhantomData<fn(T, F)>,
}

impl<P, D> Subscriber<P, P::Failure> for SwitchOuter<P::Output, P::Failure, D>
where
  P: Publisher,
  D: Subscriber<P::Output, P::Failure>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut state = self.inner.state.lock();
    if !state.outer.is_awaiting() || state.phase != Phase::Running {
      drop(state);
      log_warn!("switch_to_latest received an unexpected upstream subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.outer = SubscriptionStatus::Subscribed(subscription.clone());
    drop(state);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
    if self.inner.state.lock().outer.is_subscribed() {
      subscription.request(Demand::UNLIMITED);
    }
  }

  fn receive(&self, publisher: P) -> Demand {
    let (generation, previous) = {
      let mut state = self.inner.state.lock();
      if state.phase != Phase::Running || state.outer_finished {
        return Demand::NONE;
      }
      state.generation += 1;
      let generation = state.generation;
      state.current = Some(generation);
      state.buffer.clear();
      (generation, state.child.take())
    };
    if let Some(previous) = previous {
      log_trace!("switch_to_latest switching to inner {}", generation);
      previous.cancel();
    }
    publisher.receive(SwitchChild { generation, inner: self.inner.clone() });
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<P::Failure>) {
    match completion {
      Completion::Finished => {
        {
          let mut state = self.inner.state.lock();
          if state.phase != Phase::Running || state.outer_finished {
            return;
          }
          state.outer_finished = true;
          state.outer.terminate();
        }
        self.inner.drain();
      }
      Completion::Failure(err) => self.inner.fail(err),
    }
  }
}

// ==================== Inner side ====================

pub struct SwitchChild<T, F, D> {
  generation: u64,
  inner: Arc<SwitchInner<T, F, D>>,
}

impl<T, F, D> Subscriber<T, F> for SwitchChild<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let demand = {
      let mut state = self.inner.state.lock();
      if !state.is_current(self.generation) || state.child.is_some() {
        None
      } else {
        state.child = Some(subscription.clone());
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
    {
      let mut state = self.inner.state.lock();
      if !state.is_current(self.generation) {
        return Demand::NONE;
      }
      state.buffer.push_back(input);
    }
    self.inner.drain();
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    match completion {
      Completion::Finished => {
        {
          let mut state = self.inner.state.lock();
          if !state.is_current(self.generation) {
            return;
          }
          state.current = None;
          state.child = None;
        }
        self.inner.drain();
      }
      Completion::Failure(err) => {
        if self.inner.state.lock().is_current(self.generation) {
          self.inner.fail(err);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    prelude::*,
    testing::{TestPublisher, TestSubscriber},
  };

  type Inner = TestPublisher<i32, &'static str>;

  fn setup(demand: Demand) -> (TestPublisher<Inner, &'static str>, TestSubscriber<i32, &'static str>) {
    let outer = TestPublisher::<Inner, &'static str>::new();
    let subscriber = TestSubscriber::with_demand(demand);
    outer.clone().switch_to_latest().receive(subscriber.clone());
    (outer, subscriber)
  }

  #[rxflow_macro::test]
  fn follows_only_the_latest_inner() {
    let (outer, subscriber) = setup(Demand::UNLIMITED);
    let (first, second) = (Inner::new(), Inner::new());

    outer.send(first.clone());
    first.send(1);
    outer.send(second.clone());
    assert_eq!(first.cancel_count(), 1);

    first.send(2);
    second.send(3);
    first.finish();
    assert_eq!(subscriber.values(), vec![1, 3]);
    assert!(!subscriber.is_completed());
  }

  #[rxflow_macro::test]
  fn held_demand_is_applied_on_attach() {
    let (outer, subscriber) = setup(Demand::NONE);
    subscriber.request(Demand::max(2));

    let inner = Inner::new();
    outer.send(inner.clone());
    assert_eq!(inner.requests(), vec![Demand::max(2)]);

    inner.send(1);
    let next = Inner::new();
    outer.send(next.clone());
    assert_eq!(next.requests(), vec![Demand::max(1)]);
  }

  #[rxflow_macro::test]
  fn outer_finish_waits_for_active_inner() {
    let (outer, subscriber) = setup(Demand::UNLIMITED);
    let inner = Inner::new();
    outer.send(inner.clone());
    outer.finish();
    assert!(!subscriber.is_completed());

    inner.send(9);
    inner.finish();
    assert_eq!(subscriber.values(), vec![9]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn outer_finish_without_inner_finishes() {
    let (outer, subscriber) = setup(Demand::UNLIMITED);
    outer.finish();
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn inner_failure_cancels_outer() {
    let (outer, subscriber) = setup(Demand::UNLIMITED);
    let inner = Inner::new();
    outer.send(inner.clone());
    inner.fail("inner");
    outer.fail("outer");
    assert_eq!(subscriber.failure(), Some("inner"));
    assert_eq!(subscriber.completion_count(), 1);
    assert_eq!(outer.cancel_count(), 1);
  }

  #[rxflow_macro::test]
  fn outer_failure_cancels_inner() {
    let (outer, subscriber) = setup(Demand::UNLIMITED);
    let inner = Inner::new();
    outer.send(inner.clone());
    outer.fail("outer");
    inner.send(1);
    assert_eq!(subscriber.failure(), Some("outer"));
    assert_eq!(inner.cancel_count(), 1);
    assert!(subscriber.values().is_empty());
  }
}
