//! Multicast operator.
//!
//! Routes every subscriber into one subject and feeds that subject from a
//! single upstream subscription, opened by [`ConnectablePublisher::connect`].
//! The subject is created lazily, the first time anybody subscribes or
//! connects, and is kept for the lifetime of the operator.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  publisher::{ConnectablePublisher, Publisher},
  status::SubscriptionStatus,
  subject::{PassthroughSubject, Subject},
  subscriber::{Completion, Subscriber},
  subscription::{AnyCancellable, Cancellable, SharedSubscription},
};

/// [`multicast`](crate::publisher::PublisherExt::multicast) over a fresh
/// [`PassthroughSubject`].
pub type MakeConnectableOp<S> =
  MulticastOp<S, PassthroughSubject<<S as Publisher>::Output, <S as Publisher>::Failure>>;

pub struct MulticastOp<S, Sub> {
  shared: Arc<MulticastShared<S, Sub>>,
}

struct MulticastShared<S, Sub> {
  source: S,
  create: Box<dyn Fn() -> Sub + Send + Sync>,
  subject: Mutex<Option<Sub>>,
}

impl<S, Sub: Clone> MulticastOp<S, Sub> {
  pub(crate) fn new(source: S, create: impl Fn() -> Sub + Send + Sync + 'static) -> Self {
    MulticastOp {
      shared: Arc::new(MulticastShared { source, create: Box::new(create), subject: Mutex::new(None) }),
    }
  }

  fn subject(&self) -> Sub {
    let mut subject = self.shared.subject.lock();
    subject.get_or_insert_with(|| (self.shared.create)()).clone()
  }
}

impl<S, Sub> Clone for MulticastOp<S, Sub> {
  fn clone(&self) -> Self { MulticastOp { shared: self.shared.clone() } }
}

impl<S, Sub> Publisher for MulticastOp<S, Sub>
where
  S: Publisher,
  Sub: Subject<Output = S::Output, Failure = S::Failure>,
{
  type Output = S::Output;
  type Failure = S::Failure;

  fn receive<D>(&self, subscriber: D)
  where
    D: Subscriber<S::Output, S::Failure>,
  {
    self.subject().receive(subscriber)
  }
}

impl<S, Sub> ConnectablePublisher for MulticastOp<S, Sub>
where
  S: Publisher,
  Sub: Subject<Output = S::Output, Failure = S::Failure>,
{
  fn connect(&self) -> AnyCancellable {
    let link = Arc::new(SubjectLink {
      status: Mutex::new(SubscriptionStatus::Awaiting),
      subject: self.subject(),
    });
    log_debug!("multicast connecting");
    self.shared.source.receive(link.clone());
    AnyCancellable::from_cancellable(link)
  }
}

/// The one subscriber a connection attaches upstream. It asks for
/// everything and relays it into the subject.
struct SubjectLink<Sub> {
  status: Mutex<SubscriptionStatus>,
  subject: Sub,
}

impl<Sub: Subject> Cancellable for SubjectLink<Sub> {
  fn cancel(&self) {
    let upstream = self.status.lock().terminate();
    if let Some(upstream) = upstream {
      log_debug!("multicast connection cancelled");
      upstream.cancel();
    }
  }
}

impl<Sub: Subject> Subscriber<Sub::Output, Sub::Failure> for SubjectLink<Sub> {
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let mut status = self.status.lock();
    if !status.is_awaiting() {
      drop(status);
      subscription.cancel();
      return;
    }
    *status = SubscriptionStatus::Subscribed(subscription.clone());
    drop(status);
    subscription.request(Demand::UNLIMITED);
  }

  fn receive(&self, input: Sub::Output) -> Demand {
    if self.status.lock().is_subscribed() {
      self.subject.send(input);
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<Sub::Failure>) {
    if self.status.lock().terminate().is_some() {
      self.subject.send_completion(completion);
    }
  }
}
