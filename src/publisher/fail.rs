use std::marker::PhantomData;

use crate::{
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::Subscriptions,
};

/// Fails every subscriber immediately with a clone of `error`.
#[derive(Debug)]
pub struct Fail<O, E> {
  error: E,
  _output: PhantomData<fn() -> O>,
}

impl<O, E> Fail<O, E> {
  pub fn new(error: E) -> Self { Fail { error, _output: PhantomData } }
}

impl<O, E: Clone> Clone for Fail<O, E> {
  fn clone(&self) -> Self { Fail::new(self.error.clone()) }
}

impl<O, E> Publisher for Fail<O, E>
where
  O: Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  type Output = O;
  type Failure = E;

  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<O, E>,
  {
    subscriber.receive_subscription(Subscriptions::empty());
    subscriber.receive_completion(Completion::Failure(self.error.clone()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::TestSubscriber;

  #[rxflow_macro::test]
  fn fails_on_subscribe() {
    let subscriber = TestSubscriber::<u8, &'static str>::new();
    Fail::new("nope").receive(subscriber.clone());
    assert!(subscriber.has_subscription());
    assert_eq!(subscriber.completion(), Some(Completion::Failure("nope")));
  }
}
