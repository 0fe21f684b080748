//! Virtual-time scheduler for deterministic tests of time-based operators.
//!
//! Time only moves when the test says so. Tasks run synchronously on the
//! calling thread while time is advanced, in order of their due time and,
//! for equal times, in the order they were scheduled.
//!
//! ```rust
//! use rxflow::{prelude::*, testing::TestScheduler};
//! use std::time::Duration;
//!
//! let scheduler = TestScheduler::new();
//! let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
//! let c_fired = fired.clone();
//! scheduler.schedule_after(
//!   Duration::from_millis(100),
//!   Box::new(move || c_fired.store(true, std::sync::atomic::Ordering::SeqCst)),
//! );
//!
//! scheduler.advance_by(Duration::from_millis(99));
//! assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
//! scheduler.advance_by(Duration::from_millis(1));
//! assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
//! ```
//!
//! Unlike a thread-local clock, clones of a `TestScheduler` share one clock
//! and one queue, and the scheduler may be moved into operators that run on
//! other threads.

use std::{cmp::Ordering, collections::BinaryHeap, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::scheduler::{Action, RepeatingAction, Scheduler, TaskHandle};

// ==================== Internal State ====================

#[derive(Default)]
struct TestSchedulerState {
  virtual_time: Duration,
  task_queue: BinaryHeap<ScheduledTask>,
  next_task_id: usize,
}

enum TaskKind {
  Once(Action),
  Repeating { interval: Duration, action: RepeatingAction },
}

struct ScheduledTask {
  scheduled_time: Duration,
  task_id: usize,
  kind: TaskKind,
  handle: TaskHandle,
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool {
    self.scheduled_time == other.scheduled_time && self.task_id == other.task_id
  }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap: earlier times first, then FIFO by task_id
    other
      .scheduled_time
      .cmp(&self.scheduled_time)
      .then_with(|| other.task_id.cmp(&self.task_id))
  }
}

impl TestSchedulerState {
  fn push(&mut self, at: Duration, kind: TaskKind, handle: TaskHandle) {
    let task_id = self.next_task_id;
    self.next_task_id += 1;
    self
      .task_queue
      .push(ScheduledTask { scheduled_time: at, task_id, kind, handle });
  }
}

// ==================== TestScheduler ====================

/// A virtual clock with a task queue.
#[derive(Clone, Default)]
pub struct TestScheduler {
  state: Arc<Mutex<TestSchedulerState>>,
}

impl TestScheduler {
  pub fn new() -> Self { Self::default() }

  /// Number of queued tasks that have not been cancelled.
  pub fn pending_count(&self) -> usize {
    self
      .state
      .lock()
      .task_queue
      .iter()
      .filter(|task| !task.handle.is_cancelled())
      .count()
  }

  /// Moves the clock forward by `duration`, running every task that becomes
  /// due on the way.
  pub fn advance_by(&self, duration: Duration) {
    let target = self.state.lock().virtual_time + duration;
    self.advance_to(target);
  }

  /// Moves the clock to `target` (never backwards), running every task due
  /// at or before it. Tasks scheduled by running tasks are picked up too.
  pub fn advance_to(&self, target: Duration) {
    loop {
      let task = {
        let mut state = self.state.lock();
        let due = matches!(state.task_queue.peek(), Some(task) if task.scheduled_time <= target);
        if !due {
          state.virtual_time = state.virtual_time.max(target);
          return;
        }
        let Some(task) = state.task_queue.pop() else { return };
        state.virtual_time = state.virtual_time.max(task.scheduled_time);
        task
      };
      self.run(task);
    }
  }

  /// Runs every task that is due at the current time.
  pub fn flush(&self) {
    let now = self.state.lock().virtual_time;
    self.advance_to(now);
  }

  fn run(&self, task: ScheduledTask) {
    let ScheduledTask { scheduled_time, kind, handle, .. } = task;
    if handle.is_cancelled() {
      return;
    }
    match kind {
      TaskKind::Once(action) => action(),
      TaskKind::Repeating { interval, mut action } => {
        action();
        if !handle.is_cancelled() {
          // A zero interval would spin forever inside one advance.
          let next = scheduled_time + interval.max(Duration::from_nanos(1));
          self
            .state
            .lock()
            .push(next, TaskKind::Repeating { interval, action }, handle);
        }
      }
    }
  }
}

impl Scheduler for TestScheduler {
  fn now(&self) -> Duration { self.state.lock().virtual_time }

  fn schedule(&self, action: Action) {
    let mut state = self.state.lock();
    let now = state.virtual_time;
    state.push(now, TaskKind::Once(action), TaskHandle::new());
  }

  fn schedule_after(&self, when: Duration, action: Action) -> TaskHandle {
    let handle = TaskHandle::new();
    self
      .state
      .lock()
      .push(when, TaskKind::Once(action), handle.clone());
    handle
  }

  fn schedule_repeating(
    &self, after: Duration, interval: Duration, _tolerance: Duration, action: RepeatingAction,
  ) -> TaskHandle {
    let handle = TaskHandle::new();
    self
      .state
      .lock()
      .push(after, TaskKind::Repeating { interval, action }, handle.clone());
    handle
  }
}

impl fmt::Debug for TestScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("TestScheduler")
      .field("virtual_time", &state.virtual_time)
      .field("queued", &state.task_queue.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::subscription::Cancellable;

  fn recorder() -> (Arc<Mutex<Vec<(&'static str, Duration)>>>, TestScheduler) {
    (Arc::new(Mutex::new(Vec::new())), TestScheduler::new())
  }

  #[rxflow_macro::test]
  fn runs_in_time_then_fifo_order() {
    let (log, scheduler) = recorder();
    for (name, at) in [("b", 20), ("a", 10), ("c", 20)] {
      let c_log = log.clone();
      let c_scheduler = scheduler.clone();
      scheduler.schedule_after(
        Duration::from_millis(at),
        Box::new(move || c_log.lock().push((name, c_scheduler.now()))),
      );
    }
    assert_eq!(scheduler.pending_count(), 3);

    scheduler.advance_by(Duration::from_millis(15));
    assert_eq!(*log.lock(), vec![("a", Duration::from_millis(10))]);
    assert_eq!(scheduler.now(), Duration::from_millis(15));

    scheduler.advance_by(Duration::from_millis(5));
    assert_eq!(
      *log.lock(),
      vec![
        ("a", Duration::from_millis(10)),
        ("b", Duration::from_millis(20)),
        ("c", Duration::from_millis(20)),
      ]
    );
    assert_eq!(scheduler.pending_count(), 0);
  }

  #[rxflow_macro::test]
  fn repeating_until_cancelled() {
    let (log, scheduler) = recorder();
    let c_log = log.clone();
    let c_scheduler = scheduler.clone();
    let handle = scheduler.schedule_repeating(
      Duration::from_millis(10),
      Duration::from_millis(10),
      Duration::ZERO,
      Box::new(move || c_log.lock().push(("tick", c_scheduler.now()))),
    );

    scheduler.advance_by(Duration::from_millis(35));
    assert_eq!(log.lock().len(), 3);

    handle.cancel();
    scheduler.advance_by(Duration::from_millis(100));
    assert_eq!(log.lock().len(), 3);
    assert_eq!(scheduler.pending_count(), 0);
  }

  #[rxflow_macro::test]
  fn schedule_runs_on_flush() {
    let (log, scheduler) = recorder();
    let c_log = log.clone();
    scheduler.schedule(Box::new(move || c_log.lock().push(("now", Duration::ZERO))));
    assert!(log.lock().is_empty());
    scheduler.flush();
    assert_eq!(log.lock().len(), 1);
  }

  #[rxflow_macro::test]
  fn tasks_scheduled_while_running_are_picked_up() {
    let (log, scheduler) = recorder();
    let c_log = log.clone();
    let c_scheduler = scheduler.clone();
    scheduler.schedule_after(
      Duration::from_millis(5),
      Box::new(move || {
        let inner_log = c_log.clone();
        let clock = c_scheduler.clone();
        c_scheduler.schedule_after(
          c_scheduler.now() + Duration::from_millis(5),
          Box::new(move || inner_log.lock().push(("nested", clock.now()))),
        );
      }),
    );
    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(*log.lock(), vec![("nested", Duration::from_millis(10))]);
  }
}
