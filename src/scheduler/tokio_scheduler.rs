use std::time::Duration;

use tokio::{runtime::Handle, time::Instant};

use super::{Action, RepeatingAction, Scheduler, TaskHandle};

/// Runs actions as tasks on a tokio runtime.
///
/// The clock starts at zero when the scheduler is created. Cancelled
/// handles are checked right before each run, so a cancelled action never
/// fires even if its timer has already elapsed.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
  handle: Handle,
  origin: Instant,
}

impl TokioScheduler {
  /// Uses the runtime of the calling context.
  ///
  /// # Panics
  ///
  /// Panics when called outside of a tokio runtime.
  pub fn current() -> Self { Self::new(Handle::current()) }

  pub fn new(handle: Handle) -> Self { TokioScheduler { handle, origin: Instant::now() } }
}

impl Scheduler for TokioScheduler {
  fn now(&self) -> Duration { self.origin.elapsed() }

  fn schedule(&self, action: Action) {
    self.handle.spawn(async move { action() });
  }

  fn schedule_after(&self, when: Duration, action: Action) -> TaskHandle {
    let task = TaskHandle::new();
    let c_task = task.clone();
    let deadline = self.origin + when;
    self.handle.spawn(async move {
      tokio::time::sleep_until(deadline).await;
      if !c_task.is_cancelled() {
        action();
      }
    });
    task
  }

  fn schedule_repeating(
    &self, after: Duration, interval: Duration, _tolerance: Duration, mut action: RepeatingAction,
  ) -> TaskHandle {
    let task = TaskHandle::new();
    let c_task = task.clone();
    let start = self.origin + after;
    self.handle.spawn(async move {
      let mut ticks = tokio::time::interval_at(start, interval.max(Duration::from_nanos(1)));
      loop {
        ticks.tick().await;
        if c_task.is_cancelled() {
          break;
        }
        action();
      }
    });
    task
  }
}
