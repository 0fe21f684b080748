//! SubscribeOn operator.
//!
//! Subscribes to the upstream from inside `Scheduler::schedule`, and sends
//! every later `request` and `cancel` through the scheduler as well. Values
//! and the completion come back on whatever thread the upstream uses.

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

pub struct SubscribeOnOp<S, Sch> {
  pub(crate) source: Arc<S>,
  pub(crate) scheduler: Sch,
}

impl<S, Sch: Clone> Clone for SubscribeOnOp<S, Sch> {
  fn clone(&self) -> Self {
    SubscribeOnOp { source: self.source.clone(), scheduler: self.scheduler.clone() }
  }
}

impl<S, Sch> Publisher for SubscribeOnOp<S, Sch>
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
    let inner = Arc::new(SubscribeOnInner {
      status: Mutex::new(SubscriptionStatus::Awaiting),
      upstream_lock: Arc::new(Mutex::new(())),
      downstream: Downstream::new(subscriber),
      scheduler: self.scheduler.clone(),
      _p: PhantomData,
    });
    let source = self.source.clone();
    self
      .scheduler
      .schedule(Box::new(move || source.receive(SubscribeOnSubscriber { inner })));
  }
}

struct SubscribeOnInner<T, F, D, Sch> {
  status: Mutex<SubscriptionStatus>,
  /// Serializes the scheduled calls into the upstream subscription.
  upstream_lock: Arc<Mutex<()>>,
  downstream: Downstream<D>,
  scheduler: Sch,
  _p: PhantomData<fn(T, F)>,
}

impl<T, F, D, Sch: Scheduler> SubscribeOnInner<T, F, D, Sch> {
  /// Runs `call` against the upstream subscription on the scheduler.
  fn schedule_upstream(
    &self, upstream: SharedSubscription, call: impl FnOnce(&SharedSubscription) + Send + 'static,
  ) {
    let serial = self.upstream_lock.clone();
    self.scheduler.schedule(Box::new(move || {
      let _serial = serial.lock();
      call(&upstream);
    }));
  }
}

impl<T, F, D, Sch> Cancellable for SubscribeOnInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn cancel(&self) {
    let upstream = self.status.lock().terminate();
    if let Some(upstream) = upstream {
      log_trace!("subscribe_on cancelled");
      self.schedule_upstream(upstream, |upstream| upstream.cancel());
    }
  }
}

impl<T, F, D, Sch> Subscription for SubscribeOnInner<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let upstream = self.status.lock().subscription();
    if let Some(upstream) = upstream {
      self.schedule_upstream(upstream, move |upstream| upstream.request(demand));
    }
  }
}

pub struct SubscribeOnSubscriber<T, F, D, Sch> {
  inner: Arc<SubscribeOnInner<T, F, D, Sch>>,
}

impl<T, F, D, Sch> Subscriber<T, F> for SubscribeOnSubscriber<T, F, D, Sch>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
  Sch: Scheduler,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut status = self.inner.status.lock();
    if !status.is_awaiting() {
      drop(status);
      log_warn!("subscribe_on received a second subscription, cancelling it");
      subscription.cancel();
      return;
    }
    *status = SubscriptionStatus::Subscribed(subscription);
    drop(status);
    self.inner.downstream.with(|d| d.receive_subscription(self.inner.clone()));
  }

  fn receive(&self, input: T) -> Demand {
    if !self.inner.status.lock().is_subscribed() {
      return Demand::NONE;
    }
    self.inner.downstream.with(|d| d.receive(input))
  }

  fn receive_completion(&self, completion: Completion<F>) {
    if self.inner.status.lock().terminate().is_some() {
      self.inner.downstream.with(|d| d.receive_completion(completion));
    }
  }
}
