use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription},
};

type ValueHandler<I> = Box<dyn Fn(I) + Send + Sync>;
type CompletionHandler<F> = Box<dyn FnOnce(Completion<F>) + Send>;

/// A subscriber that requests unlimited demand and hands every event to
/// closures.
///
/// Usually created through [`PublisherExt::sink`](crate::publisher::PublisherExt::sink),
/// which wraps it in an [`AnyCancellable`](crate::subscription::AnyCancellable).
/// The subscription is released as soon as the completion arrives, so a
/// finished sink holds no reference to its upstream.
pub struct Sink<I, F> {
  receive_value: ValueHandler<I>,
  receive_completion: Mutex<Option<CompletionHandler<F>>>,
  subscription: Mutex<SinkStatus>,
}

enum SinkStatus {
  Awaiting,
  Subscribed(SharedSubscription),
  Terminal,
}

impl<I, F> Sink<I, F> {
  pub fn new(
    receive_value: impl Fn(I) + Send + Sync + 'static,
    receive_completion: impl FnOnce(Completion<F>) + Send + 'static,
  ) -> Self {
    Sink {
      receive_value: Box::new(receive_value),
      receive_completion: Mutex::new(Some(Box::new(receive_completion))),
      subscription: Mutex::new(SinkStatus::Awaiting),
    }
  }
}

impl<I, F> Cancellable for Sink<I, F>
where
  I: 'static,
  F: Send + 'static,
{
  fn cancel(&self) {
    let status = std::mem::replace(&mut *self.subscription.lock(), SinkStatus::Terminal);
    if let SinkStatus::Subscribed(subscription) = status {
      log_trace!("sink cancelled");
      subscription.cancel();
    }
  }
}

impl<I, F> Subscriber<I, F> for Sink<I, F>
where
  I: 'static,
  F: Send + 'static,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut status = self.subscription.lock();
    if !matches!(*status, SinkStatus::Awaiting) {
      drop(status);
      log_warn!("sink received a second subscription, cancelling it");
      subscription.cancel();
      return;
    }
    *status = SinkStatus::Subscribed(subscription.clone());
    drop(status);
    subscription.request(Demand::UNLIMITED);
  }

  fn receive(&self, input: I) -> Demand {
    if matches!(*self.subscription.lock(), SinkStatus::Terminal) {
      return Demand::NONE;
    }
    (self.receive_value)(input);
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    *self.subscription.lock() = SinkStatus::Terminal;
    let handler = self.receive_completion.lock().take();
    if let Some(handler) = handler {
      handler(completion);
    }
  }
}

impl<I, F> fmt::Debug for Sink<I, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match *self.subscription.lock() {
      SinkStatus::Awaiting => "awaiting",
      SinkStatus::Subscribed(_) => "subscribed",
      SinkStatus::Terminal => "terminal",
    };
    f.debug_struct("Sink").field("status", &state).finish()
  }
}

/// Shared handle used by `PublisherExt::sink`.
pub(crate) type SharedSink<I, F> = Arc<Sink<I, F>>;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    error::Never,
    publisher::{Publisher, PublisherExt, Sequence},
    subscription::Cancellable,
    testing::TestPublisher,
  };

  #[rxflow_macro::test]
  fn requests_unlimited_and_collects() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(Mutex::new(None));
    let (c_seen, c_done) = (seen.clone(), done.clone());
    let _handle = Sequence::new(vec![1, 2, 3]).sink(
      move |v| c_seen.lock().push(v),
      move |c| *c_done.lock() = Some(c),
    );
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
    assert_eq!(*done.lock(), Some(Completion::<Never>::Finished));
  }

  #[rxflow_macro::test]
  fn cancel_reaches_upstream_once() {
    let upstream = TestPublisher::<i32, Never>::new();
    let sink = Arc::new(Sink::new(|_: i32| {}, |_| {}));
    upstream.receive(sink.clone());
    assert_eq!(upstream.requests(), vec![Demand::UNLIMITED]);

    sink.cancel();
    sink.cancel();
    assert_eq!(upstream.cancel_count(), 1);
  }

  #[rxflow_macro::test]
  fn completion_releases_subscription() {
    let upstream = TestPublisher::<i32, Never>::new();
    let sink = Arc::new(Sink::new(|_: i32| {}, |_| {}));
    upstream.receive(sink.clone());
    upstream.finish();
    sink.cancel();
    assert_eq!(upstream.cancel_count(), 0);
  }
}
