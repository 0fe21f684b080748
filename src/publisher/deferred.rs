use std::{fmt, sync::Arc};

use crate::{publisher::Publisher, subscriber::Subscriber};

/// Builds a fresh publisher for every subscriber.
///
/// Handy when each subscription must observe its own state, e.g. a counter of
/// attempts behind a [`retry`](crate::publisher::PublisherExt::retry).
pub struct Deferred<Fac> {
  factory: Arc<Fac>,
}

impl<Fac> Deferred<Fac> {
  pub fn new(factory: Fac) -> Self { Deferred { factory: Arc::new(factory) } }
}

impl<Fac> Clone for Deferred<Fac> {
  fn clone(&self) -> Self { Deferred { factory: self.factory.clone() } }
}

impl<Fac> fmt::Debug for Deferred<Fac> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Deferred") }
}

impl<Fac, P> Publisher for Deferred<Fac>
where
  Fac: Fn() -> P + Send + Sync + 'static,
  P: Publisher,
{
  type Output = P::Output;
  type Failure = P::Failure;

  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Output, P::Failure>,
  {
    (self.factory)().receive(subscriber)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::{demand::Demand, error::Never, publisher::Just, testing::TestSubscriber};

  #[rxflow_macro::test]
  fn factory_runs_per_subscriber() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c_calls = calls.clone();
    let deferred = Deferred::new(move || Just::new(c_calls.fetch_add(1, Ordering::SeqCst)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let first = TestSubscriber::<usize, Never>::with_demand(Demand::UNLIMITED);
    let second = TestSubscriber::<usize, Never>::with_demand(Demand::UNLIMITED);
    deferred.receive(first.clone());
    deferred.receive(second.clone());
    assert_eq!(first.values(), vec![0]);
    assert_eq!(second.values(), vec![1]);
  }
}
