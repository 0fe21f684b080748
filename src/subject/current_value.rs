use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::{Subject, SubjectInner};
use crate::{
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
};

/// A subject that remembers the latest value.
///
/// A new subscriber receives the current value on its first request, then
/// every value sent afterwards that it has demand for. When a value reaches
/// a subscriber without demand, the subscriber gets the newest value on its
/// next request instead of nothing.
///
/// ```rust
/// use rxflow::{prelude::*, testing::TestSubscriber};
///
/// let subject = CurrentValueSubject::<i32, Never>::new(1);
/// subject.send(2);
/// let late = TestSubscriber::with_demand(Demand::UNLIMITED);
/// subject.clone().receive(late.clone());
/// subject.send(3);
/// assert_eq!(late.values(), vec![2, 3]);
/// assert_eq!(subject.value(), 3);
/// ```
pub struct CurrentValueSubject<O, F> {
  inner: Arc<SubjectInner<O, F>>,
  current: Arc<Mutex<O>>,
}

impl<O, F> CurrentValueSubject<O, F> {
  pub fn new(value: O) -> Self {
    CurrentValueSubject { inner: SubjectInner::new(), current: Arc::new(Mutex::new(value)) }
  }

  /// Number of subscribers currently attached.
  pub fn subscriber_count(&self) -> usize { self.inner.subscriber_count() }

  pub fn is_completed(&self) -> bool { self.inner.is_completed() }
}

impl<O: Clone, F> CurrentValueSubject<O, F> {
  /// The latest value sent, or the initial one.
  pub fn value(&self) -> O { self.current.lock().clone() }

  /// Replaces the current value and offers it to every subscriber. Ignored
  /// after completion.
  pub fn send(&self, value: O) { self.inner.broadcast(value, Some(&self.current)) }
}

impl<O, F: Clone> CurrentValueSubject<O, F> {
  /// Completes every subscriber, current and future. Only the first
  /// completion counts.
  pub fn send_completion(&self, completion: Completion<F>) { self.inner.complete(completion) }
}

impl<O, F> Subject for CurrentValueSubject<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  fn send(&self, value: O) { CurrentValueSubject::send(self, value) }

  fn send_completion(&self, completion: Completion<F>) {
    CurrentValueSubject::send_completion(self, completion)
  }
}

impl<O, F> Clone for CurrentValueSubject<O, F> {
  fn clone(&self) -> Self {
    CurrentValueSubject { inner: self.inner.clone(), current: self.current.clone() }
  }
}

impl<O: fmt::Debug, F> fmt::Debug for CurrentValueSubject<O, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("CurrentValueSubject")
      .field("value", &*self.current.lock())
      .field("subscribers", &state.conduits.len())
      .field("completed", &state.completion.is_some())
      .finish()
  }
}

impl<O, F> Publisher for CurrentValueSubject<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  type Output = O;
  type Failure = F;

  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<O, F>,
  {
    self.inner.attach(subscriber, Some(&self.current))
  }
}
