use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  subscriber::{Completion, Subscriber},
  subscription::SharedSubscription,
};

type ValueHook<I> = Arc<dyn Fn(&I) + Send + Sync>;

/// A subscriber that records everything it receives.
///
/// Clones share the same record, so a test keeps one clone and hands the
/// other to the publisher under test. Demand is driven manually through
/// [`request`](Self::request), or automatically with
/// [`with_demand`](Self::with_demand) (requested on subscription) and
/// [`returning`](Self::returning) (returned from every `receive`).
pub struct TestSubscriber<I, F> {
  inner: Arc<Inner<I, F>>,
}

struct Inner<I, F> {
  initial_demand: Demand,
  returned_demand: Mutex<Demand>,
  record: Mutex<Record<I, F>>,
  subscription: Mutex<Option<SharedSubscription>>,
  hook: Mutex<Option<ValueHook<I>>>,
}

struct Record<I, F> {
  values: Vec<I>,
  completion: Option<Completion<F>>,
  subscriptions: usize,
  completions: usize,
  /// Values and completions that arrived before any subscription.
  early_events: usize,
}

impl<I, F> Clone for TestSubscriber<I, F> {
  fn clone(&self) -> Self { TestSubscriber { inner: self.inner.clone() } }
}

impl<I, F> Default for TestSubscriber<I, F> {
  fn default() -> Self { Self::with_demand(Demand::NONE) }
}

impl<I, F> TestSubscriber<I, F> {
  /// A subscriber that requests nothing until told to.
  pub fn new() -> Self { Self::default() }

  /// A subscriber that requests `demand` as soon as it is subscribed.
  pub fn with_demand(demand: Demand) -> Self {
    TestSubscriber {
      inner: Arc::new(Inner {
        initial_demand: demand,
        returned_demand: Mutex::new(Demand::NONE),
        record: Mutex::new(Record {
          values: Vec::new(),
          completion: None,
          subscriptions: 0,
          completions: 0,
          early_events: 0,
        }),
        subscription: Mutex::new(None),
        hook: Mutex::new(None),
      }),
    }
  }

  /// Sets the additional demand returned from every `receive`.
  pub fn returning(self, demand: Demand) -> Self {
    *self.inner.returned_demand.lock() = demand;
    self
  }

  /// Runs `hook` after every recorded value, outside of any lock.
  pub fn on_value(&self, hook: impl Fn(&I) + Send + Sync + 'static) {
    *self.inner.hook.lock() = Some(Arc::new(hook));
  }

  pub fn subscription(&self) -> Option<SharedSubscription> { self.inner.subscription.lock().clone() }

  pub fn has_subscription(&self) -> bool { self.inner.subscription.lock().is_some() }

  /// Requests more values through the received subscription, if any.
  pub fn request(&self, demand: Demand) {
    if let Some(subscription) = self.subscription() {
      subscription.request(demand);
    }
  }

  /// Cancels the received subscription, if any. The subscription is kept so
  /// that a test can cancel again.
  pub fn cancel(&self) {
    if let Some(subscription) = self.subscription() {
      subscription.cancel();
    }
  }

  pub fn subscription_count(&self) -> usize { self.inner.record.lock().subscriptions }

  pub fn completion_count(&self) -> usize { self.inner.record.lock().completions }

  pub fn value_count(&self) -> usize { self.inner.record.lock().values.len() }

  /// Whether every value and completion so far arrived after the
  /// subscription did.
  pub fn subscribed_first(&self) -> bool { self.inner.record.lock().early_events == 0 }

  pub fn is_finished(&self) -> bool {
    matches!(self.inner.record.lock().completion, Some(Completion::Finished))
  }

  pub fn is_completed(&self) -> bool { self.inner.record.lock().completion.is_some() }
}

impl<I: Clone, F> TestSubscriber<I, F> {
  pub fn values(&self) -> Vec<I> { self.inner.record.lock().values.clone() }

  /// Returns the recorded values and forgets them.
  pub fn take_values(&self) -> Vec<I> { std::mem::take(&mut self.inner.record.lock().values) }
}

impl<I, F: Clone> TestSubscriber<I, F> {
  pub fn completion(&self) -> Option<Completion<F>> { self.inner.record.lock().completion.clone() }

  pub fn failure(&self) -> Option<F> {
    match &self.inner.record.lock().completion {
      Some(Completion::Failure(err)) => Some(err.clone()),
      _ => None,
    }
  }
}

impl<I, F> Subscriber<I, F> for TestSubscriber<I, F>
where
  I: Clone + Send + 'static,
  F: Send + 'static,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.inner.record.lock().subscriptions += 1;
    *self.inner.subscription.lock() = Some(subscription.clone());
    if self.inner.initial_demand.has_demand() {
      subscription.request(self.inner.initial_demand);
    }
  }

  fn receive(&self, input: I) -> Demand {
    let hook = self.inner.hook.lock().clone();
    {
      let mut record = self.inner.record.lock();
      if record.subscriptions == 0 {
        record.early_events += 1;
      }
    }
    match hook {
      Some(hook) => {
        self.inner.record.lock().values.push(input.clone());
        hook(&input);
      }
      None => self.inner.record.lock().values.push(input),
    }
    *self.inner.returned_demand.lock()
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let mut record = self.inner.record.lock();
    if record.subscriptions == 0 {
      record.early_events += 1;
    }
    record.completions += 1;
    if record.completion.is_none() {
      record.completion = Some(completion);
    }
  }
}

impl<I: fmt::Debug, F: fmt::Debug> fmt::Debug for TestSubscriber<I, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let record = self.inner.record.lock();
    f.debug_struct("TestSubscriber")
      .field("values", &record.values)
      .field("completion", &record.completion)
      .finish()
  }
}
