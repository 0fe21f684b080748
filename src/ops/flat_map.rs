//! FlatMap operator.
//!
//! Maps every upstream value to a publisher and merges the values of all
//! those inner publishers into one stream.
//!
//! # Concurrency bound
//!
//! At most `max_publishers` inner publishers are subscribed at once: the
//! upstream is asked for `max_publishers` values up front and, when the bound
//! is finite, for one more each time an inner publisher finishes.
//!
//! # Demand
//!
//! Each inner subscription is asked for one value at a time (or an unlimited
//! amount once the downstream has asked for that). A value that arrives
//! while the downstream has no demand waits in a FIFO buffer, and its inner
//! subscription is paused until that value has been delivered.
//!
//! # Completion
//!
//! Finishes once the upstream has finished, every inner publisher has
//! finished and the buffer is empty. The first failure, from the upstream
//! or any inner publisher, cancels everything else and is forwarded once.

use std::{
  collections::{BTreeMap, VecDeque},
  marker::PhantomData,
  sync::Arc,
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
  demand::Demand,
  lock::{DeliveryGate, Downstream},
  publisher::Publisher,
  status::SubscriptionStatus,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

type Subscriptions = SmallVec<[SharedSubscription; 4]>;

pub struct FlatMapOp<S, M> {
  pub(crate) source: S,
  pub(crate) max_publishers: Demand,
  pub(crate) func: Arc<M>,
}

impl<S: Clone, M> Clone for FlatMapOp<S, M> {
  fn clone(&self) -> Self {
    FlatMapOp {
      source: self.source.clone(),
      max_publishers: self.max_publishers,
      func: self.func.clone(),
    }
  }
}

impl<S, M, P> Publisher for FlatMapOp<S, M>
where
  S: Publisher,
  M: Fn(S::Output) -> P + Send + Sync + 'static,
  P: Publisher<Failure = S::Failure>,
{
  type Output = P::Output;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<P::Output, S::Failure>,
  {
    let inner = Arc::new(FlatMapInner {
      state: Mutex::new(FlatMapState {
        outer: SubscriptionStatus::Awaiting,
        outer_finished: false,
        children: BTreeMap::new(),
        next_index: 0,
        demand: Demand::NONE,
        unbounded: false,
        buffer: VecDeque::new(),
        gate: DeliveryGate::new(),
        phase: Phase::Running,
        pending: None,
      }),
      max_publishers: self.max_publishers,
      downstream: Downstream::new(subscriber),
    });
    self.source.receive(FlatMapOuter { inner, func: self.func.clone(), _p: PhantomData });
  }
}

// ==================== State ====================

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
  Running,
  Terminating,
  Done,
}

struct Buffered<T> {
  value: T,
  /// The inner subscription to resume once this value is delivered.
  paused: Option<usize>,
}

struct FlatMapState<T, F> {
  outer: SubscriptionStatus,
  outer_finished: bool,
  /// Live inner subscriptions; `None` until the inner publisher hands over
  /// its subscription.
  children: BTreeMap<usize, Option<SharedSubscription>>,
  next_index: usize,
  demand: Demand,
  unbounded: bool,
  buffer: VecDeque<Buffered<T>>,
  gate: DeliveryGate,
  phase: Phase,
  pending: Option<Completion<F>>,
}

impl<T, F> FlatMapState<T, F> {
  fn children(&self) -> Subscriptions { self.children.values().flatten().cloned().collect() }

  fn release_all(&mut self) -> Subscriptions {
    let mut released: Subscriptions = std::mem::take(&mut self.children).into_values().flatten().collect();
    released.extend(self.outer.terminate());
    self.buffer.clear();
    released
  }

  /// Records downstream demand; returns the inner subscriptions to switch
  /// to unlimited demand, if this is the request that made it unlimited.
  fn add_demand(&mut self, demand: Demand) -> Subscriptions {
    self.gate.credit(&mut self.demand, demand);
    if demand.is_unlimited() && !self.unbounded {
      self.unbounded = true;
      self.children()
    } else {
      Subscriptions::new()
    }
  }
}

struct FlatMapInner<T, F, D> {
  state: Mutex<FlatMapState<T, F>>,
  max_publishers: Demand,
  downstream: Downstream<D>,
}

impl<T, F, D> FlatMapInner<T, F, D>
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
      state.release_all()
    };
    log_debug!("flat_map failed, cancelling {} subscriptions", released.len());
    for subscription in released {
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
        if let Some(Buffered { value, paused }) = st.buffer.pop_front() {
          st.demand.take_one();
          let resume = paused.and_then(|index| st.children.get(&index).cloned().flatten());
          drop(state);
          let more = self.downstream.with(|d| d.receive(value));
          if let Some(child) = resume {
            child.request(Demand::max(1));
          }
          state = self.state.lock();
          if more.has_demand() && state.phase == Phase::Running {
            // The ticket is still held, so this lands in the gate and is
            // settled on the next turn of the loop.
            let unbounded = state.add_demand(more);
            if !unbounded.is_empty() {
              drop(state);
              for child in unbounded {
                child.request(Demand::UNLIMITED);
              }
              state = self.state.lock();
            }
          }
          continue;
        }
      }

      if st.outer_finished && st.children.is_empty() && st.buffer.is_empty() {
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

impl<T, F, D> Cancellable for FlatMapInner<T, F, D>
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
      state.release_all()
    };
    log_trace!("flat_map cancelled, releasing {} subscriptions", released.len());
    for subscription in released {
      subscription.cancel();
    }
  }
}

impl<T, F, D> Subscription for FlatMapInner<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let unbounded = {
      let mut state = self.state.lock();
      if state.phase != Phase::Running {
        return;
      }
      state.add_demand(demand)
    };
    for child in unbounded {
      child.request(Demand::UNLIMITED);
    }
    self.drain();
  }
}

// ==================== Outer ====================

pub struct FlatMapOuter<M, T, F, D> {
  inner: Arc<FlatMapInner<T, F, D>>,
  func: Arc<M>,
  _p: PhantomData<fn(T, F)>,
}

impl<I, M, P, D> Subscriber<I, P::Failure> for FlatMapOuter<M, P::Output, P::Failure, D>
where
  I: 'static,
  M: Fn(I) -> P + Send + Sync + 'static,
  P: Publisher,
  D: Subscriber<P::Output, P::Failure>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut state = self.inner.state.lock();
    if !state.outer.is_awaiting() || state.phase != Phase::Running {
      drop(state);
      log_warn!("flat_map received an unexpected upstream subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.outer = SubscriptionStatus::Subscribed(subscription.clone());
    drop(state);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
    if self.inner.state.lock().outer.is_subscribed() {
      subscription.request(self.inner.max_publishers);
    }
  }

  fn receive(&self, input: I) -> Demand {
    let index = {
      let mut state = self.inner.state.lock();
      if state.phase != Phase::Running || state.outer_finished {
        return Demand::NONE;
      }
      let index = state.next_index;
      state.next_index += 1;
      state.children.insert(index, None);
      index
    };
    (self.func)(input).receive(FlatMapChild { index, inner: self.inner.clone() });
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

pub struct FlatMapChild<T, F, D> {
  index: usize,
  inner: Arc<FlatMapInner<T, F, D>>,
}

impl<T, F, D> Subscriber<T, F> for FlatMapChild<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let demand = {
      let mut state = self.inner.state.lock();
      let st = &mut *state;
      let running = st.phase == Phase::Running;
      match st.children.get_mut(&self.index) {
        Some(slot) if running && slot.is_none() => {
          *slot = Some(subscription.clone());
          if st.unbounded { Demand::UNLIMITED } else { Demand::max(1) }
        }
        _ => Demand::NONE,
      }
    };
    if demand.has_demand() {
      subscription.request(demand);
    } else {
      log_warn!("flat_map inner {} received an unexpected subscription, cancelling it", self.index);
      subscription.cancel();
    }
  }

  fn receive(&self, input: T) -> Demand {
    let resume_now = {
      let mut state = self.inner.state.lock();
      if state.phase != Phase::Running || !state.children.contains_key(&self.index) {
        return Demand::NONE;
      }
      let covered = state.unbounded || state.demand > state.buffer.len();
      let paused = if covered { None } else { Some(self.index) };
      state.buffer.push_back(Buffered { value: input, paused });
      covered && !state.unbounded
    };
    self.inner.drain();
    if resume_now { Demand::max(1) } else { Demand::NONE }
  }

  fn receive_completion(&self, completion: Completion<F>) {
    match completion {
      Completion::Finished => {
        let outer = {
          let mut state = self.inner.state.lock();
          if state.phase != Phase::Running || state.children.remove(&self.index).is_none() {
            return;
          }
          if self.inner.max_publishers.is_unlimited() { None } else { state.outer.subscription() }
        };
        if let Some(outer) = outer {
          outer.request(Demand::max(1));
        }
        self.inner.drain();
      }
      Completion::Failure(err) => {
        let live = self.inner.state.lock().children.remove(&self.index).is_some();
        if live {
          self.inner.fail(err);
        }
      }
    }
  }
}
