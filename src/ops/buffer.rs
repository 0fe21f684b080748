//! Buffer operator.
//!
//! Holds up to `size` upstream values until the downstream asks for them.
//!
//! * [`PrefetchStrategy::KeepFull`] requests `size` values up front and one
//!   more for every value handed downstream.
//! * [`PrefetchStrategy::ByRequest`] requests an unlimited amount and lets
//!   the buffer absorb whatever the downstream does not want yet.
//!
//! What happens to a value arriving at a full buffer is decided by the
//! [`BufferingStrategy`].

use std::{collections::VecDeque, fmt, marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  error::FlowError,
  lock::{DeliveryGate, Downstream},
  publisher::Publisher,
  status::SubscriptionStatus,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

/// How a buffer pulls values from its upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrefetchStrategy {
  KeepFull,
  ByRequest,
}

/// What a full buffer does with an incoming value.
pub enum BufferingStrategy<F> {
  /// Discards the incoming value.
  DropNewest,
  /// Discards the oldest buffered value to make room.
  DropOldest,
  /// Cancels the upstream and fails with the error built by the closure.
  CustomError(Arc<dyn Fn() -> F + Send + Sync>),
}

impl<F> BufferingStrategy<F> {
  pub fn custom_error(make: impl Fn() -> F + Send + Sync + 'static) -> Self {
    BufferingStrategy::CustomError(Arc::new(make))
  }
}

impl<F: From<FlowError>> BufferingStrategy<F> {
  /// Fails with [`FlowError::BufferOverflow`] once `capacity` is exceeded.
  pub fn overflow(capacity: usize) -> Self {
    Self::custom_error(move || F::from(FlowError::BufferOverflow { capacity }))
  }
}

impl<F> Clone for BufferingStrategy<F> {
  fn clone(&self) -> Self {
    match self {
      BufferingStrategy::DropNewest => BufferingStrategy::DropNewest,
      BufferingStrategy::DropOldest => BufferingStrategy::DropOldest,
      BufferingStrategy::CustomError(make) => BufferingStrategy::CustomError(make.clone()),
    }
  }
}

impl<F> fmt::Debug for BufferingStrategy<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BufferingStrategy::DropNewest => f.write_str("DropNewest"),
      BufferingStrategy::DropOldest => f.write_str("DropOldest"),
      BufferingStrategy::CustomError(_) => f.write_str("CustomError"),
    }
  }
}

pub struct BufferOp<S: Publisher> {
  pub(crate) source: S,
  pub(crate) size: usize,
  pub(crate) prefetch: PrefetchStrategy,
  pub(crate) when_full: BufferingStrategy<S::Failure>,
}

impl<S: Publisher + Clone> Clone for BufferOp<S> {
  fn clone(&self) -> Self {
    BufferOp {
      source: self.source.clone(),
      size: self.size,
      prefetch: self.prefetch,
      when_full: self.when_full.clone(),
    }
  }
}

impl<S> Publisher for BufferOp<S>
where
  S: Publisher,
{
  type Output = S::Output;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<S::Output, S::Failure>,
  {
    let inner = Arc::new(BufferInner {
      state: Mutex::new(BufferState {
        upstream: SubscriptionStatus::Awaiting,
        values: VecDeque::with_capacity(self.size),
        demand: Demand::NONE,
        terminal: None,
        gate: DeliveryGate::new(),
        done: false,
      }),
      downstream: Downstream::new(subscriber),
      size: self.size,
      prefetch: self.prefetch,
      when_full: self.when_full.clone(),
    });
    self.source.receive(BufferSubscriber { inner, _p: PhantomData });
  }
}

struct BufferState<T, F> {
  upstream: SubscriptionStatus,
  values: VecDeque<T>,
  demand: Demand,
  /// Upstream completion, delivered once the buffer allows it.
  terminal: Option<Completion<F>>,
  gate: DeliveryGate,
  done: bool,
}

struct BufferInner<T, F, D> {
  state: Mutex<BufferState<T, F>>,
  downstream: Downstream<D>,
  size: usize,
  prefetch: PrefetchStrategy,
  when_full: BufferingStrategy<F>,
}

impl<T, F, D> BufferInner<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  /// Hands buffered values downstream while it has demand. A finish is
  /// delivered once the buffer is empty, a failure as soon as no value can
  /// be delivered ahead of it. Returns how much to replenish upstream.
  fn drain(&self) -> Demand {
    let mut replenish = Demand::NONE;
    let mut state = self.state.lock();
    let Some(ticket) = state.gate.try_begin() else { return replenish };
    loop {
      let st = &mut *state;
      st.gate.settle(&ticket, &mut st.demand);
      if st.done {
        break;
      }
      if st.demand.has_demand() {
        if let Some(value) = st.values.pop_front() {
          st.demand.take_one();
          drop(state);
          let more = self.downstream.with(|d| d.receive(value));
          if self.prefetch == PrefetchStrategy::KeepFull {
            replenish += 1;
          }
          state = self.state.lock();
          let st = &mut *state;
          st.gate.credit(&mut st.demand, more);
          continue;
        }
      }
      let deliver = match &st.terminal {
        Some(Completion::Finished) => st.values.is_empty(),
        Some(Completion::Failure(_)) => st.values.is_empty() || !st.demand.has_demand(),
        None => false,
      };
      if let (true, Some(completion)) = (deliver, st.terminal.take()) {
        st.done = true;
        st.values.clear();
        st.upstream.terminate();
        st.gate.finish(ticket, &mut st.demand);
        drop(state);
        self.downstream.with(|d| d.receive_completion(completion));
        return Demand::NONE;
      }
      break;
    }
    let st = &mut *state;
    st.gate.finish(ticket, &mut st.demand);
    if st.terminal.is_some() { Demand::NONE } else { replenish }
  }
}

impl<T, F, D> Cancellable for BufferInner<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn cancel(&self) {
    let upstream = {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.done = true;
      state.values.clear();
      state.terminal = None;
      state.upstream.terminate()
    };
    if let Some(upstream) = upstream {
      log_trace!("buffer cancelled");
      upstream.cancel();
    }
  }
}

impl<T, F, D> Subscription for BufferInner<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      let st = &mut *state;
      st.gate.credit(&mut st.demand, demand);
    }
    let more = self.drain();
    if more.has_demand() {
      let upstream = self.state.lock().upstream.subscription();
      if let Some(upstream) = upstream {
        upstream.request(more);
      }
    }
  }
}

pub struct BufferSubscriber<T, F, D> {
  inner: Arc<BufferInner<T, F, D>>,
  _p: PhantomData<fn(T, F)>,
}

impl<T, F, D> Subscriber<T, F> for BufferSubscriber<T, F, D>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut state = self.inner.state.lock();
    if !state.upstream.is_awaiting() || state.done {
      drop(state);
      log_warn!("buffer received an unexpected subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription.clone());
    drop(state);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
    if !self.inner.state.lock().upstream.is_subscribed() {
      return;
    }
    let prefetch = match self.inner.prefetch {
      PrefetchStrategy::KeepFull => Demand::max(self.inner.size),
      PrefetchStrategy::ByRequest => Demand::UNLIMITED,
    };
    if prefetch.has_demand() {
      subscription.request(prefetch);
    }
  }

  fn receive(&self, input: T) -> Demand {
    let overflow = {
      let mut state = self.inner.state.lock();
      if !state.upstream.is_subscribed() || state.terminal.is_some() || state.done {
        return Demand::NONE;
      }
      let mut overflow = None;
      if state.values.len() >= self.inner.size {
        match &self.inner.when_full {
          BufferingStrategy::DropNewest => {
            log_debug!("buffer full at {}, dropping the newest value", self.inner.size);
            drop(state);
            return self.inner.drain();
          }
          BufferingStrategy::DropOldest => {
            log_debug!("buffer full at {}, dropping the oldest value", self.inner.size);
            state.values.pop_front();
            state.values.push_back(input);
          }
          BufferingStrategy::CustomError(make) => {
            log_debug!("buffer overflowed its capacity of {}", self.inner.size);
            state.terminal = Some(Completion::Failure(make()));
            overflow = state.upstream.terminate();
          }
        }
      } else {
        state.values.push_back(input);
      }
      overflow
    };
    if let Some(upstream) = overflow {
      upstream.cancel();
    }
    self.inner.drain()
  }

  fn receive_completion(&self, completion: Completion<F>) {
    {
      let mut state = self.inner.state.lock();
      if !state.upstream.is_subscribed() || state.terminal.is_some() || state.done {
        return;
      }
      state.terminal = Some(completion);
    }
    self.inner.drain();
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    prelude::*,
    testing::{TestPublisher, TestSubscriber},
  };

  fn buffered(
    size: usize, prefetch: PrefetchStrategy, when_full: BufferingStrategy<FlowError>,
  ) -> (TestPublisher<i32, FlowError>, TestSubscriber<i32, FlowError>) {
    let upstream = TestPublisher::new();
    let subscriber = TestSubscriber::new();
    upstream
      .clone()
      .buffer(size, prefetch, when_full)
      .receive(subscriber.clone());
    (upstream, subscriber)
  }

  #[rxflow_macro::test]
  fn drop_oldest_keeps_the_newest_values() {
    let (upstream, subscriber) = buffered(2, PrefetchStrategy::ByRequest, BufferingStrategy::DropOldest);
    assert_eq!(upstream.requests(), vec![Demand::UNLIMITED]);
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
  fn drop_newest_keeps_the_first_values() {
    let (upstream, subscriber) = buffered(2, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest);
    for v in 1..=4 {
      upstream.send(v);
    }
    subscriber.request(Demand::UNLIMITED);
    assert_eq!(subscriber.values(), vec![1, 2]);
  }

  #[rxflow_macro::test]
  fn custom_error_fails_and_cancels() {
    let (upstream, subscriber) = buffered(1, PrefetchStrategy::ByRequest, BufferingStrategy::overflow(1));
    upstream.send(1);
    upstream.send(2);
    assert_eq!(upstream.cancel_count(), 1);
    assert_eq!(subscriber.failure(), Some(FlowError::BufferOverflow { capacity: 1 }));
    assert!(subscriber.values().is_empty());
  }

  #[rxflow_macro::test]
  fn keep_full_replenishes_per_delivered_value() {
    let (upstream, subscriber) = buffered(3, PrefetchStrategy::KeepFull, BufferingStrategy::DropNewest);
    assert_eq!(upstream.requests(), vec![Demand::max(3)]);
    upstream.send(1);
    upstream.send(2);
    subscriber.request(Demand::max(2));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert_eq!(upstream.requests(), vec![Demand::max(3), Demand::max(2)]);

    assert_eq!(upstream.send(3), Demand::NONE);
    subscriber.request(Demand::max(2));
    assert_eq!(
      upstream.requests(),
      vec![Demand::max(3), Demand::max(2), Demand::max(1)]
    );
    assert_eq!(upstream.send(4), Demand::max(1));
    assert_eq!(subscriber.values(), vec![1, 2, 3, 4]);
  }

  #[rxflow_macro::test]
  fn finish_waits_for_the_buffer_to_empty() {
    let (upstream, subscriber) = buffered(4, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest);
    upstream.send(1);
    upstream.finish();
    assert!(!subscriber.is_completed());
    subscriber.request(Demand::max(1));
    assert_eq!(subscriber.values(), vec![1]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn failure_without_demand_skips_buffered_values() {
    let (upstream, subscriber) = buffered(4, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest);
    upstream.send(1);
    upstream.fail(FlowError::transform("broken"));
    assert!(subscriber.values().is_empty());
    assert_eq!(subscriber.failure(), Some(FlowError::Transform("broken".into())));
  }

  #[rxflow_macro::test]
  fn empty_upstream_finishes_after_the_subscription() {
    let subscriber = TestSubscriber::<i32, Never>::new();
    Sequence::new(Vec::<i32>::new())
      .buffer(4, PrefetchStrategy::KeepFull, BufferingStrategy::DropNewest)
      .receive(subscriber.clone());
    assert_eq!(subscriber.subscription_count(), 1);
    assert!(subscriber.is_finished());
    assert!(subscriber.subscribed_first());
  }

  #[rxflow_macro::test]
  fn synchronous_upstream_fills_the_buffer_after_the_subscription() {
    let subscriber = TestSubscriber::<i32, Never>::new();
    Sequence::new(vec![1, 2, 3])
      .buffer(2, PrefetchStrategy::ByRequest, BufferingStrategy::DropOldest)
      .receive(subscriber.clone());
    assert!(subscriber.values().is_empty());
    assert!(!subscriber.is_completed());

    subscriber.request(Demand::UNLIMITED);
    assert_eq!(subscriber.values(), vec![2, 3]);
    assert!(subscriber.is_finished());
    assert!(subscriber.subscribed_first());
  }
}
