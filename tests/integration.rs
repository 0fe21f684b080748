use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

use rxflow::{
  prelude::*,
  testing::{TestPublisher, TestScheduler, TestSubscriber},
};

fn ms(millis: u64) -> Duration { Duration::from_millis(millis) }

/// Fails `failures` times, then emits `[10, 20]` and finishes.
fn flaky(failures: usize) -> (Arc<AtomicUsize>, AnyPublisher<i32, &'static str>) {
  let attempts = Arc::new(AtomicUsize::new(0));
  let c_attempts = attempts.clone();
  let source = Deferred::new(move || {
    let attempt = c_attempts.fetch_add(1, Ordering::SeqCst);
    if attempt < failures {
      Fail::new("unavailable").erase()
    } else {
      Sequence::new(vec![10, 20]).set_failure().erase()
    }
  });
  (attempts, source.erase())
}

#[rxflow_macro::test]
fn double_cancel_reaches_every_upstream_once() {
  let a = TestPublisher::<i32, Never>::new();
  let b = TestPublisher::<i32, Never>::new();
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  a.clone()
    .merge(b.clone())
    .map(|v| v + 1)
    .receive(subscriber.clone());

  subscriber.cancel();
  subscriber.cancel();
  assert_eq!(a.cancel_count(), 1);
  assert_eq!(b.cancel_count(), 1);
}

#[rxflow_macro::test]
fn cancel_after_finish_delivers_nothing_more() {
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  Sequence::new(vec![1, 2])
    .zip(Sequence::new(vec!['a', 'b']))
    .receive(subscriber.clone());
  assert!(subscriber.is_finished());

  subscriber.cancel();
  subscriber.cancel();
  assert_eq!(subscriber.completion_count(), 1);
  assert_eq!(subscriber.values(), vec![(1, 'a'), (2, 'b')]);
}

#[rxflow_macro::test]
fn combine_latest_waits_for_every_slot() {
  let a = PassthroughSubject::<i32, Never>::new();
  let b = PassthroughSubject::<&'static str, Never>::new();
  let c = PassthroughSubject::<bool, Never>::new();
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  a.clone()
    .combine_latest3(b.clone(), c.clone())
    .receive(subscriber.clone());

  a.send(1);
  b.send("x");
  a.send(2);
  assert!(subscriber.values().is_empty());

  c.send(true);
  b.send("y");
  c.send(false);
  assert_eq!(
    subscriber.values(),
    vec![(2, "x", true), (2, "y", true), (2, "y", false)]
  );
}

#[rxflow_macro::test]
fn zip_pairs_in_arrival_order_of_the_slowest_slot() {
  let fast = TestPublisher::<i32, Never>::new();
  let slow = TestPublisher::<char, Never>::new();
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  fast.clone().zip(slow.clone()).receive(subscriber.clone());

  fast.send(1);
  fast.send(2);
  fast.send(3);
  assert!(subscriber.values().is_empty());
  slow.send('a');
  assert_eq!(subscriber.values(), vec![(1, 'a')]);
  slow.send('b');
  assert_eq!(subscriber.values(), vec![(1, 'a'), (2, 'b')]);
}

#[rxflow_macro::test]
fn merge_delivers_each_value_once_and_finishes_with_the_last_upstream() {
  let a = TestPublisher::<i32, Never>::new();
  let b = TestPublisher::<i32, Never>::new();
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  a.clone().merge(b.clone()).receive(subscriber.clone());

  a.send(1);
  b.send(2);
  a.finish();
  b.send(3);
  assert!(!subscriber.is_completed());
  b.finish();

  let mut values = subscriber.values();
  values.sort_unstable();
  assert_eq!(values, vec![1, 2, 3]);
  assert!(subscriber.is_finished());
}

#[rxflow_macro::test]
fn delivered_values_never_exceed_requested_demand() {
  let subscriber = TestSubscriber::with_demand(Demand::max(3));
  Sequence::new(0..100)
    .filter(|v| v % 3 != 0)
    .map(|v| v * 10)
    .merge(Sequence::new(1000..1100))
    .receive(subscriber.clone());
  assert_eq!(subscriber.value_count(), 3);

  subscriber.request(Demand::max(2));
  assert_eq!(subscriber.value_count(), 5);
  assert!(!subscriber.is_completed());
}

#[rxflow_macro::test]
fn flat_map_respects_demand_across_inner_publishers() {
  let subscriber = TestSubscriber::with_demand(Demand::max(4));
  Sequence::new(vec![1, 2, 3])
    .flat_map(Demand::UNLIMITED, |v| Sequence::new(vec![v; 3]))
    .receive(subscriber.clone());
  assert_eq!(subscriber.value_count(), 4);

  subscriber.request(Demand::UNLIMITED);
  assert_eq!(subscriber.value_count(), 9);
  assert!(subscriber.is_finished());
}

#[rxflow_macro::test]
fn debounce_emits_the_last_value_after_silence() {
  let scheduler = TestScheduler::new();
  let upstream = TestPublisher::<i32, Never>::new();
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  upstream
    .clone()
    .debounce(ms(3), scheduler.clone())
    .receive(subscriber.clone());

  upstream.send(1);
  scheduler.advance_to(ms(1));
  upstream.send(2);
  scheduler.advance_to(ms(2));
  upstream.send(3);
  scheduler.advance_to(ms(4));
  assert!(subscriber.values().is_empty());

  scheduler.advance_to(ms(5));
  assert_eq!(subscriber.values(), vec![3]);
  scheduler.advance_by(ms(10));
  assert_eq!(subscriber.values(), vec![3]);
}

#[rxflow_macro::test]
fn buffer_drop_oldest_keeps_the_newest_values() {
  let upstream = TestPublisher::<i32, Never>::new();
  let subscriber = TestSubscriber::<i32, Never>::new();
  upstream
    .clone()
    .buffer(2, PrefetchStrategy::KeepFull, BufferingStrategy::DropOldest)
    .receive(subscriber.clone());

  upstream.send(1);
  upstream.send(2);
  upstream.send(3);
  assert!(subscriber.values().is_empty());

  subscriber.request(Demand::max(1));
  assert_eq!(subscriber.values(), vec![2]);
  subscriber.request(Demand::max(1));
  assert_eq!(subscriber.values(), vec![2, 3]);
}

#[rxflow_macro::test]
fn retry_resubscribes_until_success() {
  let (attempts, source) = flaky(2);
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  source.retry(2).receive(subscriber.clone());

  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  assert_eq!(subscriber.values(), vec![10, 20]);
  assert!(subscriber.is_finished());
}

#[rxflow_macro::test]
fn retry_forwards_the_failure_once_attempts_run_out() {
  let (attempts, source) = flaky(2);
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  source.retry(1).receive(subscriber.clone());

  assert_eq!(attempts.load(Ordering::SeqCst), 2);
  assert_eq!(subscriber.failure(), Some("unavailable"));
  assert!(subscriber.values().is_empty());
}

#[rxflow_macro::test]
fn catch_and_append_compose() {
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  Fail::<i32, &'static str>::new("down")
    .catch(|_| Just::new(0).set_failure::<Never>())
    .append(Sequence::new(vec![1, 2]))
    .receive(subscriber.clone());
  assert_eq!(subscriber.values(), vec![0, 1, 2]);
  assert!(subscriber.is_finished());
}

#[rxflow_macro::test]
fn timeout_finishes_a_silent_stream() {
  let scheduler = TestScheduler::new();
  let upstream = TestPublisher::<i32, FlowError>::new();
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  upstream
    .clone()
    .timeout_error(ms(5), scheduler.clone())
    .receive(subscriber.clone());

  scheduler.advance_to(ms(4));
  upstream.send(1);
  scheduler.advance_to(ms(8));
  assert!(!subscriber.is_completed());
  scheduler.advance_to(ms(9));
  assert_eq!(subscriber.values(), vec![1]);
  assert_eq!(subscriber.failure(), Some(FlowError::Timeout(ms(5))));
  assert_eq!(upstream.cancel_count(), 1);
}

#[rxflow_macro::test]
fn switch_to_latest_over_subjects() {
  let outer = PassthroughSubject::<PassthroughSubject<i32, Never>, Never>::new();
  let first = PassthroughSubject::<i32, Never>::new();
  let second = PassthroughSubject::<i32, Never>::new();
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  outer.clone().switch_to_latest().receive(subscriber.clone());

  outer.send(first.clone());
  first.send(1);
  outer.send(second.clone());
  first.send(2);
  second.send(3);
  assert_eq!(subscriber.values(), vec![1, 3]);
  assert_eq!(first.subscriber_count(), 0);
}

#[rxflow_macro::test]
fn sink_handle_cancels_on_drop() {
  let subject = PassthroughSubject::<i32, Never>::new();
  let seen = Arc::new(AtomicUsize::new(0));
  let c_seen = seen.clone();
  let handle = subject.clone().sink_values(move |v| {
    c_seen.fetch_add(v as usize, Ordering::SeqCst);
  });
  subject.send(2);
  drop(handle);
  subject.send(5);
  assert_eq!(seen.load(Ordering::SeqCst), 2);
  assert_eq!(subject.subscriber_count(), 0);
}

#[rxflow_macro::test]
fn wide_fan_in_helpers_match_the_tuple_constructors() {
  let combined = TestSubscriber::with_demand(Demand::UNLIMITED);
  Just::new(1)
    .combine_latest5(Just::new('b'), Just::new(3u8), Just::new("d"), Sequence::new(vec![5i64, 6]))
    .receive(combined.clone());
  assert_eq!(combined.values(), vec![(1, 'b', 3u8, "d", 5i64), (1, 'b', 3u8, "d", 6i64)]);
  assert!(combined.is_finished());

  let combined7 = TestSubscriber::with_demand(Demand::UNLIMITED);
  Just::new(1)
    .combine_latest7(Just::new(2), Just::new(3), Just::new(4), Just::new(5), Just::new(6), Just::new(7))
    .receive(combined7.clone());
  assert_eq!(combined7.values(), vec![(1, 2, 3, 4, 5, 6, 7)]);

  let merged = TestSubscriber::with_demand(Demand::UNLIMITED);
  Just::new(1)
    .merge5(Just::new(2), Just::new(3), Just::new(4), Just::new(5))
    .receive(merged.clone());
  let mut values = merged.values();
  values.sort_unstable();
  assert_eq!(values, vec![1, 2, 3, 4, 5]);
  assert!(merged.is_finished());

  let merged8 = TestSubscriber::with_demand(Demand::UNLIMITED);
  Sequence::new(0..2)
    .merge8(
      Sequence::new(2..4),
      Sequence::new(4..6),
      Sequence::new(6..8),
      Sequence::new(8..10),
      Sequence::new(10..12),
      Sequence::new(12..14),
      Sequence::new(14..16),
    )
    .receive(merged8.clone());
  let mut values = merged8.values();
  values.sort_unstable();
  assert_eq!(values, (0..16).collect::<Vec<_>>());

  let zipped = TestSubscriber::with_demand(Demand::UNLIMITED);
  Sequence::new(vec![1, 2])
    .zip6(
      Sequence::new(vec!['a', 'b']),
      Sequence::new(vec![true, false]),
      Sequence::new(vec![3u8, 4]),
      Sequence::new(vec!["x", "y"]),
      Sequence::new(vec![5i64, 6]),
    )
    .receive(zipped.clone());
  assert_eq!(
    zipped.values(),
    vec![(1, 'a', true, 3u8, "x", 5i64), (2, 'b', false, 4u8, "y", 6i64)]
  );
  assert!(zipped.is_finished());

  let zipped8 = TestSubscriber::with_demand(Demand::UNLIMITED);
  Just::new(1)
    .zip8(
      Just::new(2),
      Just::new(3),
      Just::new(4),
      Just::new(5),
      Just::new(6),
      Just::new(7),
      Sequence::new(vec![8, 9]),
    )
    .receive(zipped8.clone());
  assert_eq!(zipped8.values(), vec![(1, 2, 3, 4, 5, 6, 7, 8)]);
  assert!(zipped8.is_finished());
}

#[rxflow_macro::test]
fn receive_on_and_subscribe_on_compose_over_a_current_value() {
  let scheduler = TestScheduler::new();
  let subject = CurrentValueSubject::<i32, Never>::new(1);
  let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
  subject
    .clone()
    .subscribe_on(scheduler.clone())
    .map(|v| v * 10)
    .receive_on(scheduler.clone())
    .receive(subscriber.clone());
  assert_eq!(subject.subscriber_count(), 0);

  scheduler.flush();
  assert_eq!(subject.subscriber_count(), 1);
  assert_eq!(subscriber.values(), vec![10]);

  subject.send(2);
  assert_eq!(subscriber.values(), vec![10]);
  scheduler.flush();
  assert_eq!(subscriber.values(), vec![10, 20]);

  subject.send_completion(Completion::Finished);
  scheduler.flush();
  assert!(subscriber.is_finished());
  assert!(subscriber.subscribed_first());
}
