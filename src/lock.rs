//! Lock discipline shared by every stateful stage.
//!
//! Each stage owns two locks:
//!
//! * a plain [`parking_lot::Mutex`] around its own state, never held while
//!   calling out of the stage;
//! * a [`Downstream`] wrapper, a reentrant lock that is the only way to reach
//!   the downstream subscriber, so calls into it are serialized across
//!   threads while a callback may still re-enter the stage on the same thread.
//!
//! Lock order is always: release the state lock, then take the downstream
//! lock. The [`DeliveryGate`] lives inside the state and records which
//! thread is currently delivering, so work produced elsewhere (values from
//! other upstreams, completions, demand) is handed to that thread instead of
//! racing it into the downstream.

use parking_lot::ReentrantMutex;

use crate::demand::Demand;

// ==================== Downstream ====================

/// The downstream subscriber of a stage behind its delivery lock.
pub struct Downstream<D> {
  inner: ReentrantMutex<D>,
}

impl<D> Downstream<D> {
  pub fn new(downstream: D) -> Self { Downstream { inner: ReentrantMutex::new(downstream) } }

  /// Runs `f` with the downstream while holding the delivery lock.
  #[inline]
  pub fn with<R>(&self, f: impl FnOnce(&D) -> R) -> R {
    let guard = self.inner.lock();
    f(&guard)
  }
}

// ==================== DeliveryGate ====================

/// Proof that the holder is the one thread allowed to deliver downstream.
#[must_use = "a delivery ticket must be handed back through `DeliveryGate::finish`"]
#[derive(Debug)]
pub struct DeliveryTicket {
  _private: (),
}

/// Tracks whether a downstream delivery is in flight.
///
/// Demand credited while a delivery is in flight is parked in the gate and
/// handed to the ticket holder once its callback returns, so a downstream
/// that requests more from inside `receive` never mutates the counters the
/// delivering thread is working from.
#[derive(Debug, Default)]
pub struct DeliveryGate {
  delivering: bool,
  deferred: Demand,
}

impl DeliveryGate {
  pub fn new() -> Self { Self::default() }

  /// Claims the right to deliver, or `None` if another delivery is running.
  pub fn try_begin(&mut self) -> Option<DeliveryTicket> {
    if self.delivering {
      None
    } else {
      self.delivering = true;
      Some(DeliveryTicket { _private: () })
    }
  }

  #[inline]
  pub fn is_delivering(&self) -> bool { self.delivering }

  /// Adds `demand` to `target`, or parks it while a delivery is running.
  pub fn credit(&mut self, target: &mut Demand, demand: Demand) {
    if self.delivering {
      self.deferred += demand;
    } else {
      *target += demand;
    }
  }

  /// Moves parked demand into `target` without ending the delivery.
  pub fn settle(&mut self, _ticket: &DeliveryTicket, target: &mut Demand) {
    *target += std::mem::take(&mut self.deferred);
  }

  /// Ends the delivery, moving any parked demand into `target`.
  pub fn finish(&mut self, ticket: DeliveryTicket, target: &mut Demand) {
    self.settle(&ticket, target);
    self.delivering = false;
  }
}
