//! PrefixUntilOutput operator.
//!
//! Forwards upstream values until a second publisher (the trigger) produces
//! its first value, then finishes and cancels both. The trigger completing
//! without a value changes nothing; the upstream simply runs on.

use std::{marker::PhantomData, sync::Arc};

use crate::{
  demand::Demand,
  ops::drop_until_output::{cancel_all, UntilInner},
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::SharedSubscription,
};

#[derive(Clone, Debug)]
pub struct PrefixUntilOutputOp<S, P> {
  pub(crate) source: S,
  pub(crate) trigger: P,
}

impl<S, P> Publisher for PrefixUntilOutputOp<S, P>
where
  S: Publisher,
  P: Publisher,
{
  type Output = S::Output;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<S::Output, S::Failure>,
  {
    let inner = Arc::new(UntilInner::new(subscriber));
    inner.downstream.with(|d| d.receive_subscription(inner.clone()));
    self.trigger.receive(PrefixTrigger::<O, S::Output, S::Failure> {
      inner: inner.clone(),
      _p: PhantomData,
    });
    self.source.receive(PrefixUpstream { inner, _p: PhantomData });
  }
}

pub struct PrefixUpstream<D, F> {
  inner: Arc<UntilInner<D>>,
  _p: PhantomData<fn(F)>,
}

impl<T, F, D> Subscriber<T, F> for PrefixUpstream<D, F>
where
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.inner.attach_upstream(subscription);
  }

  fn receive(&self, input: T) -> Demand {
    if self.inner.state.lock().done {
      return Demand::NONE;
    }
    self.inner.downstream.with(|d| d.receive(input))
  }

  fn receive_completion(&self, completion: Completion<F>) {
    if let Some(subscriptions) = self.inner.finish() {
      cancel_all(subscriptions);
      self.inner.downstream.with(|d| d.receive_completion(completion));
    }
  }
}

/// `T` and `F` are the downstream's value and failure types, pinned here
/// because the trigger's own types are unrelated to them.
pub struct PrefixTrigger<D, T, F> {
  inner: Arc<UntilInner<D>>,
  _p: PhantomData<fn(T, F)>,
}

impl<O, E, T, F, D> Subscriber<O, E> for PrefixTrigger<D, T, F>
where
  O: Send + 'static,
  E: Send + 'static,
  T: Send + 'static,
  F: Send + 'static,
  D: Subscriber<T, F>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.inner.attach_trigger(subscription);
  }

  fn receive(&self, _input: O) -> Demand {
    if let Some(subscriptions) = self.inner.finish() {
      log_trace!("prefix_until_output triggered");
      cancel_all(subscriptions);
      self.inner.downstream.with(|d| d.receive_completion(Completion::Finished));
    }
    Demand::NONE
  }

  fn receive_completion(&self, _completion: Completion<E>) {
    self.inner.state.lock().trigger = None;
  }
}
