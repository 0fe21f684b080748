//! The engine shared by every multi-upstream combinator.
//!
//! One [`FanIn`] instance owns all the state of a `combine_latest`, `merge`
//! or `zip` subscription. Each upstream is attached through a [`Side`]: an
//! index plus a handle to the engine plus a setter that stores the value in
//! the slot it belongs to. What differs between the families (how values
//! are stored, when an output is ready, how demand reaches the upstreams and
//! when the whole stream is over) lives behind [`FanInKind`].
//!
//! Delivery follows the crate-wide lock discipline: the state lock is never
//! held while calling out, and whichever thread holds the delivery ticket
//! drains every ready output and any pending completion, so values from
//! different upstreams never race each other into the downstream.

use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
  demand::Demand,
  lock::{DeliveryGate, Downstream},
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

type Subscriptions = SmallVec<[SharedSubscription; 4]>;

/// An output ready for the downstream, and the slot (if any) that must be
/// asked for one more value once it is delivered.
pub(crate) struct Emission<T> {
  pub(crate) output: T,
  pub(crate) refill: Option<usize>,
}

/// The per-family policy plugged into [`FanIn`].
pub(crate) trait FanInKind: Send + 'static {
  type Output: Send + 'static;

  /// Demand for an upstream that attaches once the downstream has requested
  /// `requested` in total.
  fn attach_demand(&self, requested: Demand) -> Demand;

  /// Demand to forward to every live upstream when the downstream adds
  /// `demand`, bringing its total to `requested`.
  fn forward_demand(&mut self, demand: Demand, requested: Demand) -> Demand;

  /// Takes the next output, if one is ready.
  fn next_output(&mut self) -> Option<Emission<Self::Output>>;

  /// Called when the downstream has no demand left. Kinds that do not
  /// hold outputs back discard whatever became ready in the meantime.
  fn starve(&mut self) {}

  /// Whether the stream is over given which slots have finished.
  fn is_exhausted(&self, finished: &[bool]) -> bool;

  /// Drops everything stored, after a failure or cancellation.
  fn clear(&mut self);
}

// ==================== Engine State ====================

enum Slot {
  Awaiting,
  Active(SharedSubscription),
  Finished,
  Cancelled,
}

impl Slot {
  fn subscription(&self) -> Option<SharedSubscription> {
    match self {
      Slot::Active(subscription) => Some(subscription.clone()),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
  Running,
  /// A completion is queued for the ticket holder.
  Terminating,
  /// Completed or cancelled.
  Done,
}

struct FanInState<K, F> {
  kind: K,
  slots: SmallVec<[Slot; 4]>,
  finished: SmallVec<[bool; 4]>,
  demand: Demand,
  requested: Demand,
  gate: DeliveryGate,
  phase: Phase,
  pending: Option<Completion<F>>,
}

impl<K: FanInKind, F> FanInState<K, F> {
  fn live(&self) -> Subscriptions { self.slots.iter().filter_map(Slot::subscription).collect() }

  /// Marks every slot that is not done as cancelled and hands back the
  /// subscriptions to cancel once the lock is released.
  fn cancel_slots(&mut self) -> Subscriptions {
    let mut cancelled = Subscriptions::new();
    for slot in self.slots.iter_mut() {
      match std::mem::replace(slot, Slot::Cancelled) {
        Slot::Active(subscription) => cancelled.push(subscription),
        Slot::Finished => *slot = Slot::Finished,
        Slot::Awaiting | Slot::Cancelled => {}
      }
    }
    cancelled
  }

  /// Records downstream demand and works out what the upstreams must be
  /// asked for.
  fn add_demand(&mut self, demand: Demand) -> (Demand, Subscriptions) {
    self.requested += demand;
    let forward = self.kind.forward_demand(demand, self.requested);
    if forward.has_demand() { (forward, self.live()) } else { (forward, Subscriptions::new()) }
  }
}

// ==================== FanIn ====================

pub(crate) struct FanIn<K, F, D> {
  state: Mutex<FanInState<K, F>>,
  downstream: Downstream<D>,
}

impl<K, F, D> FanIn<K, F, D>
where
  K: FanInKind,
  F: Send + 'static,
  D: Subscriber<K::Output, F>,
{
  /// Builds the engine and hands it to the downstream as its subscription.
  /// The caller then attaches one [`Side`] per upstream.
  pub(crate) fn subscribe(kind: K, arity: usize, downstream: D) -> Arc<Self> {
    let engine = Arc::new(FanIn {
      state: Mutex::new(FanInState {
        kind,
        slots: (0..arity).map(|_| Slot::Awaiting).collect(),
        finished: SmallVec::from_elem(false, arity),
        demand: Demand::NONE,
        requested: Demand::NONE,
        gate: DeliveryGate::new(),
        phase: Phase::Running,
        pending: None,
      }),
      downstream: Downstream::new(downstream),
    });
    engine.downstream.with(|d| d.receive_subscription(engine.clone()));
    engine
  }

  fn attach(&self, index: usize, subscription: SharedSubscription) {
    let mut state = self.state.lock();
    if state.phase != Phase::Running || !matches!(state.slots[index], Slot::Awaiting) {
      let duplicate = !matches!(state.slots[index], Slot::Awaiting | Slot::Cancelled);
      drop(state);
      if duplicate {
        log_warn!("upstream {} of a fan-in stage subscribed twice, cancelling", index);
      }
      subscription.cancel();
      return;
    }
    state.slots[index] = Slot::Active(subscription.clone());
    let demand = state.kind.attach_demand(state.requested);
    drop(state);
    log_trace!("fan-in upstream {} attached, requesting {}", index, demand);
    if demand.has_demand() {
      subscription.request(demand);
    }
  }

  fn accept<I>(&self, index: usize, put: fn(&mut K, usize, I), input: I) -> Demand {
    {
      let mut state = self.state.lock();
      if state.phase != Phase::Running || !matches!(state.slots[index], Slot::Active(_)) {
        return Demand::NONE;
      }
      put(&mut state.kind, index, input);
    }
    self.drain(Some(index))
  }

  fn complete(&self, index: usize, completion: Completion<F>) {
    let mut state = self.state.lock();
    if state.phase != Phase::Running || !matches!(state.slots[index], Slot::Active(_)) {
      return;
    }
    state.slots[index] = Slot::Finished;
    state.finished[index] = true;
    if let Completion::Failure(err) = completion {
      let others = state.cancel_slots();
      state.kind.clear();
      state.phase = Phase::Terminating;
      state.pending = Some(Completion::Failure(err));
      drop(state);
      log_debug!("fan-in upstream {} failed, cancelling {} others", index, others.len());
      for other in others {
        other.cancel();
      }
    } else {
      drop(state);
      log_trace!("fan-in upstream {} finished", index);
    }
    self.drain(None);
  }

  /// Delivers whatever is ready while this thread holds the ticket. Returns
  /// the demand owed to `origin` for values of its own that were delivered.
  fn drain(&self, origin: Option<usize>) -> Demand {
    let mut state = self.state.lock();
    let Some(ticket) = state.gate.try_begin() else { return Demand::NONE };
    let mut owed = Demand::NONE;
    loop {
      let st = &mut *state;
      st.gate.settle(&ticket, &mut st.demand);

      if let Some(completion) = st.pending.take() {
        st.phase = Phase::Done;
        let leftovers = st.cancel_slots();
        st.gate.finish(ticket, &mut st.demand);
        drop(state);
        for subscription in leftovers {
          subscription.cancel();
        }
        self.downstream.with(|d| d.receive_completion(completion));
        return Demand::NONE;
      }
      if st.phase != Phase::Running {
        break;
      }

      if st.demand.has_demand() {
        if let Some(Emission { output, refill }) = st.kind.next_output() {
          st.demand.take_one();
          let refill = match refill {
            Some(slot) if Some(slot) == origin => {
              owed += 1;
              None
            }
            Some(slot) => st.slots[slot].subscription(),
            None => None,
          };
          drop(state);
          if let Some(subscription) = refill {
            subscription.request(Demand::max(1));
          }
          let more = self.downstream.with(|d| d.receive(output));
          state = self.state.lock();
          if more.has_demand() && state.phase == Phase::Running {
            let st = &mut *state;
            st.demand += more;
            let (forward, targets) = st.add_demand(more);
            if !targets.is_empty() {
              drop(state);
              for target in targets {
                target.request(forward);
              }
              state = self.state.lock();
            }
          }
          continue;
        }
      } else {
        st.kind.starve();
      }

      if st.kind.is_exhausted(&st.finished) {
        st.phase = Phase::Terminating;
        st.pending = Some(Completion::Finished);
        continue;
      }
      break;
    }
    let st = &mut *state;
    st.gate.finish(ticket, &mut st.demand);
    owed
  }
}

impl<K, F, D> Cancellable for FanIn<K, F, D>
where
  K: FanInKind,
  F: Send + 'static,
  D: Subscriber<K::Output, F>,
{
  fn cancel(&self) {
    let upstreams = {
      let mut state = self.state.lock();
      if state.phase == Phase::Done {
        return;
      }
      state.phase = Phase::Done;
      state.pending = None;
      state.kind.clear();
      state.cancel_slots()
    };
    log_trace!("fan-in cancelled, releasing {} upstreams", upstreams.len());
    for upstream in upstreams {
      upstream.cancel();
    }
  }
}

impl<K, F, D> Subscription for FanIn<K, F, D>
where
  K: FanInKind,
  F: Send + 'static,
  D: Subscriber<K::Output, F>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let (forward, targets) = {
      let mut state = self.state.lock();
      if state.phase != Phase::Running {
        return;
      }
      let st = &mut *state;
      st.gate.credit(&mut st.demand, demand);
      st.add_demand(demand)
    };
    for target in targets {
      target.request(forward);
    }
    self.drain(None);
  }
}

// ==================== Side ====================

/// Subscriber attached to upstream `index` of a fan-in engine.
pub(crate) struct Side<K, F, D, I> {
  index: usize,
  engine: Arc<FanIn<K, F, D>>,
  put: fn(&mut K, usize, I),
  _p: PhantomData<fn(I)>,
}

impl<K, F, D, I> Side<K, F, D, I> {
  pub(crate) fn new(index: usize, engine: Arc<FanIn<K, F, D>>, put: fn(&mut K, usize, I)) -> Self {
    Side { index, engine, put, _p: PhantomData }
  }
}

impl<K, F, D, I> Subscriber<I, F> for Side<K, F, D, I>
where
  K: FanInKind,
  F: Send + 'static,
  D: Subscriber<K::Output, F>,
  I: 'static,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.engine.attach(self.index, subscription)
  }

  fn receive(&self, input: I) -> Demand { self.engine.accept(self.index, self.put, input) }

  fn receive_completion(&self, completion: Completion<F>) { self.engine.complete(self.index, completion) }
}
