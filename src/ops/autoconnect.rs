//! Autoconnect operator.
//!
//! Counts the subscribers attached to a connectable publisher. The first
//! one connects it; the connection is cancelled once every subscriber has
//! cancelled. A subscriber arriving after that connects it again.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use parking_lot::Mutex;

use super::multicast::MakeConnectableOp;
use crate::{
  demand::Demand,
  publisher::{ConnectablePublisher, Publisher},
  subscriber::{Completion, Subscriber},
  subscription::{AnyCancellable, Cancellable, SharedSubscription, Subscription},
};

/// [`share`](crate::publisher::PublisherExt::share) of a publisher.
pub type ShareOp<S> = AutoconnectOp<MakeConnectableOp<S>>;

pub struct AutoconnectOp<C> {
  shared: Arc<AutoconnectShared<C>>,
}

struct AutoconnectShared<C> {
  source: C,
  state: Mutex<Connection>,
}

#[derive(Default)]
struct Connection {
  subscribers: usize,
  handle: Option<AnyCancellable>,
}

impl<C> AutoconnectOp<C> {
  pub(crate) fn new(source: C) -> Self {
    AutoconnectOp {
      shared: Arc::new(AutoconnectShared { source, state: Mutex::new(Connection::default()) }),
    }
  }
}

impl<C> Clone for AutoconnectOp<C> {
  fn clone(&self) -> Self { AutoconnectOp { shared: self.shared.clone() } }
}

impl<C: ConnectablePublisher> AutoconnectShared<C> {
  fn release(&self) {
    let handle = {
      let mut state = self.state.lock();
      state.subscribers = state.subscribers.saturating_sub(1);
      if state.subscribers == 0 { state.handle.take() } else { None }
    };
    if let Some(handle) = handle {
      log_debug!("autoconnect lost its last subscriber, disconnecting");
      handle.cancel();
    }
  }
}

impl<C: ConnectablePublisher> Publisher for AutoconnectOp<C> {
  type Output = C::Output;
  type Failure = C::Failure;

  fn receive<D>(&self, subscriber: D)
  where
    D: Subscriber<C::Output, C::Failure>,
  {
    let first = {
      let mut state = self.shared.state.lock();
      state.subscribers += 1;
      state.subscribers == 1
    };
    self
      .shared
      .source
      .receive(AutoconnectSubscriber { downstream: subscriber, shared: self.shared.clone() });
    if !first {
      return;
    }

    let handle = self.shared.source.connect();
    let mut state = self.shared.state.lock();
    if state.subscribers > 0 && state.handle.is_none() {
      state.handle = Some(handle);
    } else {
      drop(state);
      handle.cancel();
    }
  }
}

pub struct AutoconnectSubscriber<D, C> {
  downstream: D,
  shared: Arc<AutoconnectShared<C>>,
}

impl<I, F, D, C> Subscriber<I, F> for AutoconnectSubscriber<D, C>
where
  D: Subscriber<I, F>,
  C: ConnectablePublisher,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    self.downstream.receive_subscription(Arc::new(CountedSubscription {
      upstream: subscription,
      shared: self.shared.clone(),
      released: AtomicBool::new(false),
    }))
  }

  fn receive(&self, input: I) -> Demand { self.downstream.receive(input) }

  fn receive_completion(&self, completion: Completion<F>) {
    self.downstream.receive_completion(completion)
  }
}

/// Gives back its subscriber's share of the connection on the first cancel.
struct CountedSubscription<C> {
  upstream: SharedSubscription,
  shared: Arc<AutoconnectShared<C>>,
  released: AtomicBool,
}

impl<C: ConnectablePublisher> Cancellable for CountedSubscription<C> {
  fn cancel(&self) {
    self.upstream.cancel();
    if !self.released.swap(true, Ordering::AcqRel) {
      self.shared.release();
    }
  }
}

impl<C: ConnectablePublisher> Subscription for CountedSubscription<C> {
  fn request(&self, demand: Demand) { self.upstream.request(demand) }
}
