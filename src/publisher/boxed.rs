use std::{fmt, sync::Arc};

use crate::{
  publisher::Publisher,
  subscriber::{BoxedSubscriber, Subscriber},
};

/// Object-safe face of [`Publisher`].
trait DynPublisher<O, F>: Send + Sync {
  fn receive_boxed(&self, subscriber: BoxedSubscriber<O, F>);
}

impl<P> DynPublisher<P::Output, P::Failure> for P
where
  P: Publisher,
{
  fn receive_boxed(&self, subscriber: BoxedSubscriber<P::Output, P::Failure>) { self.receive(subscriber) }
}

/// A publisher whose concrete type has been erased.
///
/// Lets differently-built pipelines share one type, e.g. the branches a
/// [`Deferred`](crate::publisher::Deferred) factory or a `catch` handler
/// choose between.
pub struct AnyPublisher<O, F> {
  inner: Arc<dyn DynPublisher<O, F>>,
}

impl<O, F> AnyPublisher<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  pub fn new<P>(publisher: P) -> Self
  where
    P: Publisher<Output = O, Failure = F>,
  {
    AnyPublisher { inner: Arc::new(publisher) }
  }
}

impl<O, F> Clone for AnyPublisher<O, F> {
  fn clone(&self) -> Self { AnyPublisher { inner: self.inner.clone() } }
}

impl<O, F> fmt::Debug for AnyPublisher<O, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("AnyPublisher") }
}

impl<O, F> Publisher for AnyPublisher<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  type Output = O;
  type Failure = F;

  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<O, F>,
  {
    self.inner.receive_boxed(Box::new(subscriber))
  }
}
