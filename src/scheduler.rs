//! The scheduling capability used by time-based operators.
//!
//! `rxflow` starts no threads of its own. Operators that need to act later
//! (`debounce`, `throttle`, `timeout`, `delay`) receive a [`Scheduler`] and ask
//! it to run closures now, at a point in time, or repeatedly.
//!
//! Time is measured as a [`Duration`] since the scheduler's own origin, so a
//! virtual clock (see [`TestScheduler`](crate::testing::TestScheduler)) and a
//! wall clock (see `TokioScheduler` behind the `tokio-scheduler` feature)
//! share one interface.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

pub use std::time::Duration;

use crate::subscription::Cancellable;

#[cfg(feature = "tokio-scheduler")]
mod tokio_scheduler;
#[cfg(feature = "tokio-scheduler")]
pub use tokio_scheduler::TokioScheduler;

/// A one-shot scheduled action.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// An action run on every tick of a repeating schedule.
pub type RepeatingAction = Box<dyn FnMut() + Send + 'static>;

/// Runs actions now, later, or repeatedly.
///
/// Implementations must never run an action before the instant it was
/// scheduled for, and must not run it at all once its [`TaskHandle`] has
/// been cancelled.
pub trait Scheduler: Clone + Send + Sync + 'static {
  /// The current time on this scheduler's clock.
  fn now(&self) -> Duration;

  /// The smallest tolerance the scheduler can honour.
  fn minimum_tolerance(&self) -> Duration { Duration::ZERO }

  /// Runs `action` as soon as possible.
  fn schedule(&self, action: Action);

  /// Runs `action` once the clock reaches `when`.
  fn schedule_after(&self, when: Duration, action: Action) -> TaskHandle;

  /// Runs `action` at `after`, then every `interval`, until the returned
  /// handle is cancelled.
  fn schedule_repeating(
    &self, after: Duration, interval: Duration, tolerance: Duration, action: RepeatingAction,
  ) -> TaskHandle;
}

// ==================== TaskHandle ====================

/// Cancellation token for a scheduled action.
///
/// Clones share the same flag; cancelling any of them stops the action.
#[derive(Clone, Default, Debug)]
pub struct TaskHandle {
  cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
  pub fn new() -> Self { Self::default() }

  /// A handle for an action that has already run.
  pub fn finished() -> Self {
    let handle = Self::new();
    handle.cancel();
    handle
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

impl Cancellable for TaskHandle {
  fn cancel(&self) { self.cancelled.store(true, Ordering::Release); }
}

// ==================== ImmediateScheduler ====================

/// Runs every action synchronously on the calling thread.
///
/// Its clock never moves: `schedule_after` runs the action right away and a
/// repeating schedule fires exactly once. Useful for operators whose timing
/// is irrelevant to the caller.
#[derive(Clone, Copy, Default, Debug)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
  fn now(&self) -> Duration { Duration::ZERO }

  fn schedule(&self, action: Action) { action() }

  fn schedule_after(&self, _when: Duration, action: Action) -> TaskHandle {
    action();
    TaskHandle::finished()
  }

  fn schedule_repeating(
    &self, _after: Duration, _interval: Duration, _tolerance: Duration, mut action: RepeatingAction,
  ) -> TaskHandle {
    action();
    TaskHandle::finished()
  }
}
