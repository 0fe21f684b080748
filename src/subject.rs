//! Hot multicast source driven by hand.
//!
//! A [`PassthroughSubject`] keeps one conduit per subscriber. Every conduit
//! tracks that subscriber's own demand: a value sent while a subscriber has
//! no outstanding demand is dropped for it, but still reaches the others.
//! The completion is remembered and replayed to anyone subscribing later.
//!
//! A [`CurrentValueSubject`] shares the same conduits but also holds the
//! latest value, which every subscriber receives on its first request.

use std::{
  fmt,
  sync::{Arc, Weak},
};

use parking_lot::Mutex;
use smallvec::SmallVec;

mod current_value;

pub use current_value::CurrentValueSubject;

use crate::{
  demand::Demand,
  lock::Downstream,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, Subscription, Subscriptions},
};

/// A publisher that values and a completion can be pushed into by hand.
///
/// Both subjects implement it, which lets [`multicast`] feed one from an
/// upstream publisher.
///
/// [`multicast`]: crate::publisher::PublisherExt::multicast
pub trait Subject: Publisher + Clone {
  /// Offers `value` to every subscriber. Ignored after completion.
  fn send(&self, value: Self::Output);

  /// Completes every subscriber, current and future.
  fn send_completion(&self, completion: Completion<Self::Failure>);
}

/// Broadcasts sent values to every current subscriber.
///
/// Clones share the same subscribers.
///
/// ```rust
/// use rxflow::{prelude::*, testing::TestSubscriber};
///
/// let subject = PassthroughSubject::<i32, Never>::new();
/// let eager = TestSubscriber::with_demand(Demand::UNLIMITED);
/// let idle = TestSubscriber::new();
/// subject.clone().receive(eager.clone());
/// subject.clone().receive(idle.clone());
///
/// subject.send(1);
/// subject.send_completion(Completion::Finished);
/// assert_eq!(eager.values(), vec![1]);
/// assert!(idle.values().is_empty());
/// assert!(idle.is_finished());
/// ```
pub struct PassthroughSubject<O, F> {
  inner: Arc<SubjectInner<O, F>>,
}

struct SubjectInner<O, F> {
  state: Mutex<SubjectState<O, F>>,
}

struct SubjectState<O, F> {
  next_id: usize,
  conduits: SmallVec<[(usize, Arc<dyn Conduit<O, F>>); 2]>,
  completion: Option<Completion<F>>,
}

impl<O, F> PassthroughSubject<O, F> {
  pub fn new() -> Self { PassthroughSubject { inner: SubjectInner::new() } }

  /// Number of subscribers currently attached.
  pub fn subscriber_count(&self) -> usize { self.inner.subscriber_count() }

  pub fn is_completed(&self) -> bool { self.inner.is_completed() }
}

impl<O: Clone, F> PassthroughSubject<O, F> {
  /// Offers `value` to every subscriber. Ignored after completion.
  pub fn send(&self, value: O) { self.inner.broadcast(value, None) }
}

impl<O, F: Clone> PassthroughSubject<O, F> {
  /// Completes every subscriber, current and future. Only the first
  /// completion counts.
  pub fn send_completion(&self, completion: Completion<F>) { self.inner.complete(completion) }
}

impl<O, F> Subject for PassthroughSubject<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  fn send(&self, value: O) { PassthroughSubject::send(self, value) }

  fn send_completion(&self, completion: Completion<F>) {
    PassthroughSubject::send_completion(self, completion)
  }
}

impl<O, F> Default for PassthroughSubject<O, F> {
  fn default() -> Self { Self::new() }
}

impl<O, F> Clone for PassthroughSubject<O, F> {
  fn clone(&self) -> Self { PassthroughSubject { inner: self.inner.clone() } }
}

impl<O, F> fmt::Debug for PassthroughSubject<O, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("PassthroughSubject")
      .field("subscribers", &state.conduits.len())
      .field("completed", &state.completion.is_some())
      .finish()
  }
}

impl<O, F> SubjectInner<O, F> {
  fn new() -> Arc<Self> {
    Arc::new(SubjectInner {
      state: Mutex::new(SubjectState { next_id: 0, conduits: SmallVec::new(), completion: None }),
    })
  }

  fn subscriber_count(&self) -> usize { self.state.lock().conduits.len() }

  fn is_completed(&self) -> bool { self.state.lock().completion.is_some() }

  fn remove(&self, id: usize) {
    self.state.lock().conduits.retain(|(conduit_id, _)| *conduit_id != id);
  }
}

impl<O: Clone, F> SubjectInner<O, F> {
  /// Offers `value` to every conduit. `latest`, when given, is replaced
  /// under the state lock so that it never disagrees with what subscribers
  /// attaching concurrently are offered.
  fn broadcast(&self, value: O, latest: Option<&Mutex<O>>) {
    let conduits: SmallVec<[Arc<dyn Conduit<O, F>>; 2]> = {
      let state = self.state.lock();
      if state.completion.is_some() {
        return;
      }
      if let Some(latest) = latest {
        *latest.lock() = value.clone();
      }
      state.conduits.iter().map(|(_, c)| c.clone()).collect()
    };
    if let Some((last, rest)) = conduits.split_last() {
      for conduit in rest {
        conduit.offer(value.clone());
      }
      last.offer(value);
    }
  }
}

impl<O, F: Clone> SubjectInner<O, F> {
  fn complete(&self, completion: Completion<F>) {
    let conduits = {
      let mut state = self.state.lock();
      if state.completion.is_some() {
        return;
      }
      state.completion = Some(completion.clone());
      std::mem::take(&mut state.conduits)
    };
    log_trace!("subject completing {} subscribers", conduits.len());
    for (_, conduit) in conduits {
      conduit.finish(completion.clone());
    }
  }
}

impl<O, F> SubjectInner<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  /// Attaches `subscriber` through a new conduit. With `latest`, the
  /// conduit replays its value on the first request and keeps the newest
  /// value it had no demand for.
  fn attach<S>(self: &Arc<Self>, subscriber: S, latest: Option<&Mutex<O>>)
  where
    S: Subscriber<O, F>,
  {
    let mut state = self.state.lock();
    if let Some(completion) = state.completion.clone() {
      drop(state);
      subscriber.receive_subscription(Subscriptions::empty());
      subscriber.receive_completion(completion);
      return;
    }
    let id = state.next_id;
    state.next_id += 1;
    let conduit = Arc::new(SubjectConduit {
      id,
      subject: Arc::downgrade(self),
      keeps_latest: latest.is_some(),
      state: Mutex::new(ConduitState {
        demand: Demand::NONE,
        done: false,
        missed: latest.map(|latest| latest.lock().clone()),
      }),
      downstream: Downstream::new(subscriber),
    });
    let erased: Arc<dyn Conduit<O, F>> = conduit.clone();
    state.conduits.push((id, erased));
    drop(state);
    conduit.downstream.with(|d| d.receive_subscription(conduit.clone()));
  }
}

impl<O, F> Publisher for PassthroughSubject<O, F>
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
    self.inner.attach(subscriber, None)
  }
}

// ==================== Conduit ====================

trait Conduit<O, F>: Send + Sync {
  fn offer(&self, value: O);

  fn finish(&self, completion: Completion<F>);
}

struct ConduitState<O> {
  demand: Demand,
  done: bool,
  /// The latest value this subscriber had no demand for, delivered on its
  /// next request. Only kept by conduits of a current-value subject.
  missed: Option<O>,
}

struct SubjectConduit<D, O, F> {
  id: usize,
  subject: Weak<SubjectInner<O, F>>,
  keeps_latest: bool,
  state: Mutex<ConduitState<O>>,
  downstream: Downstream<D>,
}

impl<D, O, F> SubjectConduit<D, O, F>
where
  D: Subscriber<O, F>,
  O: Send + 'static,
  F: Send + 'static,
{
  fn deliver(&self, value: O) {
    let more = self.downstream.with(|d| d.receive(value));
    if more.has_demand() {
      let mut state = self.state.lock();
      if !state.done {
        state.demand += more;
      }
    }
  }
}

impl<D, O, F> Conduit<O, F> for SubjectConduit<D, O, F>
where
  D: Subscriber<O, F>,
  O: Send + 'static,
  F: Send + 'static,
{
  fn offer(&self, value: O) {
    {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      if !state.demand.take_one() {
        if self.keeps_latest {
          state.missed = Some(value);
        }
        return;
      }
      state.missed = None;
    }
    self.deliver(value);
  }

  fn finish(&self, completion: Completion<F>) {
    {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.done = true;
      state.missed = None;
    }
    self.downstream.with(|d| d.receive_completion(completion));
  }
}

impl<D, O, F> Cancellable for SubjectConduit<D, O, F>
where
  D: Subscriber<O, F>,
  O: Send + 'static,
  F: Send + 'static,
{
  fn cancel(&self) {
    {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.done = true;
      state.missed = None;
    }
    log_trace!("subject subscriber cancelled");
    if let Some(subject) = self.subject.upgrade() {
      subject.remove(self.id);
    }
  }
}

impl<D, O, F> Subscription for SubjectConduit<D, O, F>
where
  D: Subscriber<O, F>,
  O: Send + 'static,
  F: Send + 'static,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let replay = {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.demand += demand;
      let replay = state.missed.take();
      if replay.is_some() {
        state.demand.take_one();
      }
      replay
    };
    if let Some(value) = replay {
      self.deliver(value);
    }
  }
}
