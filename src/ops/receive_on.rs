//! ReceiveOn operator.
//!
//! Delivers values and the completion through `Scheduler::schedule` instead
//! of on the thread the upstream used. The subscription itself is handed
//! over synchronously, and demand travels upstream unchanged: values wait
//! in the scheduler's queue, never in the stage.

use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::Downstream,
  publisher::Publisher,
  scheduler::Scheduler,
  status::SubscriptionStatus,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

#[derive(Clone)]
pub struct ReceiveOnOp<S, Sch> {
  pub(crate) source: S,
  pub(crate) scheduler: Sch,
}

impl<S, Sch> Publisher for ReceiveOnOp<S, Sch>
where
  S: Publisher,
  Sch: Scheduler,
{
  type Output = S::Output;
  type Failure = S::Failure;

  fn receive<D>(&self, subscriber: D)
  where
    D: Subscriber<S::Output, S::Failure>,
  {
    let inner = Arc::new(ReceiveOnInner {
      state: Mutex::new(ReceiveOnState { upstream: SubscriptionStatus::Awaiting, live: true }),
      downstream: Downstream::new(subscriber),
      scheduler: self.scheduler.clone(),
      _p: PhantomData,
    });
    self.source.receive(ReceiveOnSubscriber { inner });
  }
}

struct ReceiveOnState {
  upstream: SubscriptionStatus,
  /// Cleared by a cancel or once the completion went out; scheduled
  /// deliveries that run afterwards do nothing.
  live: bool,
}

struct ReceiveOnInner<T, F, D, Sch> {
  state: Mutex<ReceiveOnState>,
  downstream: Downstream<D>,
  scheduler: Sch,
  _p: PhantomData<fn(T, F)>,
}

impl<T, F, D, Sch> ReceiveOnInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn deliver(&self, value: T) {
    if !self.state.lock().live {
      return;
    }
    let more = self.downstream.with(|d| d.receive(value));
    if more.has_demand() {
      let upstream = self.state.lock().upstream.subscription();
      if let Some(upstream) = upstream {
        upstream.request(more);
      }
    }
  }

  fn deliver_completion(&self, completion: Completion<F>) {
    {
      let mut state = self.state.lock();
      if !state.live {
        return;
      }
      state.live = false;
    }
    self.downstream.with(|d| d.receive_completion(completion));
  }
}

impl<T, F, D, Sch> Cancellable for ReceiveOnInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn cancel(&self) {
    let upstream = {
      let mut state = self.state.lock();
      state.live = false;
      state.upstream.terminate()
    };
    if let Some(upstream) = upstream {
      log_trace!("receive_on cancelled");
      upstream.cancel();
    }
  }
}

impl<T, F, D, Sch> Subscription for ReceiveOnInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let upstream = self.state.lock().upstream.subscription();
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }
}

pub struct ReceiveOnSubscriber<T, F, D, Sch> {
  inner: Arc<ReceiveOnInner<T, F, D, Sch>>,
}

impl<T, F, D, Sch> Subscriber<T, F> for ReceiveOnSubscriber<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut state = self.inner.state.lock();
    if !state.upstream.is_awaiting() {
      drop(state);
      log_warn!("receive_on received a second subscription, cancelling it");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription);
    drop(state);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
  }

  fn receive(&self, input: T) -> Demand {
    if !self.inner.state.lock().upstream.is_subscribed() {
      return Demand::NONE;
    }
    let inner = self.inner.clone();
    self.inner.scheduler.schedule(Box::new(move || inner.deliver(input)));
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    if self.inner.state.lock().upstream.terminate().is_none() {
      return;
    }
    let inner = self.inner.clone();
    self
      .inner
      .scheduler
      .schedule(Box::new(move || inner.deliver_completion(completion)));
  }
}
