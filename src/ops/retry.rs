//! Retry operator implementation
//!
//! Resubscribes to the same upstream publisher when it fails, as long as
//! the [`RetryPolicy`] allows another attempt. Values and the final
//! completion reach the downstream through one subscription that lives
//! across attempts, and demand that is still outstanding when an attempt
//! fails is requested again from the next one.
//!
//! Upstreams that fail synchronously from inside `receive` do not grow the
//! stack: a failure that arrives while an attempt is still being subscribed
//! only marks the next attempt as due, and the subscribing loop starts it
//! once the current call returns.
//!
//! # Examples
//!
//! ```rust
//! use rxflow::prelude::*;
//! use std::sync::{
//!   atomic::{AtomicUsize, Ordering},
//!   Arc,
//! };
//!
//! let attempts = Arc::new(AtomicUsize::new(0));
//! let c_attempts = attempts.clone();
//! let flaky = Deferred::new(move || {
//!   if c_attempts.fetch_add(1, Ordering::SeqCst) < 2 {
//!     Fail::new("unavailable").erase()
//!   } else {
//!     Just::new(42).set_failure().erase()
//!   }
//! });
//!
//! let _handle = flaky.retry(RetryConfig::new().count(3)).sink_values(|v| assert_eq!(v, 42));
//! assert_eq!(attempts.load(Ordering::SeqCst), 3);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  lock::Downstream,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SharedSubscription, Subscription},
};

/// Decides whether a failure is retried.
///
/// `attempt` counts the retries already made, starting at 0 for the first
/// failure.
///
/// ```rust
/// use rxflow::prelude::*;
///
/// #[derive(Clone)]
/// struct ServerErrors;
///
/// impl RetryPolicy<u16> for ServerErrors {
///   fn should_retry(&self, status: &u16, attempt: usize) -> bool {
///     attempt < 3 && (500..600).contains(status)
///   }
/// }
/// ```
pub trait RetryPolicy<Err>: Send + Sync + 'static {
  fn should_retry(&self, err: &Err, attempt: usize) -> bool;

  /// Whether a delivered value resets the attempt counter to 0.
  fn reset_on_success(&self) -> bool { false }
}

/// Retries up to the given number of times.
impl<Err> RetryPolicy<Err> for usize {
  fn should_retry(&self, _err: &Err, attempt: usize) -> bool { attempt < *self }
}

/// `None` retries forever.
impl<Err> RetryPolicy<Err> for Option<usize> {
  fn should_retry(&self, _err: &Err, attempt: usize) -> bool {
    self.map_or(true, |count| attempt < count)
  }
}

/// Builder for a counted retry policy.
///
/// ```rust
/// use rxflow::prelude::*;
///
/// let config = RetryConfig::new().count(5).reset_on_success();
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryConfig {
  count: Option<usize>,
  reset_on_success: bool,
}

impl RetryConfig {
  /// Unlimited retries, counter never reset.
  pub fn new() -> Self { Self::default() }

  /// Sets the maximum number of retries. `count(3)` allows up to 4
  /// subscriptions in total.
  pub fn count(mut self, count: usize) -> Self {
    self.count = Some(count);
    self
  }

  /// Resets the retry counter whenever a value is delivered, so a source
  /// that keeps making progress between failures is retried indefinitely.
  pub fn reset_on_success(mut self) -> Self {
    self.reset_on_success = true;
    self
  }
}

impl<Err> RetryPolicy<Err> for RetryConfig {
  fn should_retry(&self, _err: &Err, attempt: usize) -> bool {
    self.count.map_or(true, |count| attempt < count)
  }

  fn reset_on_success(&self) -> bool { self.reset_on_success }
}

/// The Retry operator struct.
#[derive(Clone, Debug)]
pub struct RetryOp<S, P> {
  pub(crate) source: S,
  pub(crate) policy: Arc<P>,
}

impl<S, P> Publisher for RetryOp<S, P>
where
  S: Publisher + Clone,
  P: RetryPolicy<S::Failure>,
{
  type Output = S::Output;
  type Failure = S::Failure;

  fn receive<O>(&self, subscriber: O)
  where
    O: Subscriber<S::Output, S::Failure>,
  {
    let inner = Arc::new(RetryInner {
      state: Mutex::new(RetryState {
        upstream: None,
        downstream_needs_subscription: true,
        demand: Demand::NONE,
        attempts: 0,
        subscribing: false,
        needs_subscribe: false,
        done: false,
      }),
      downstream: Downstream::new(subscriber),
      source: self.source.clone(),
      policy: self.policy.clone(),
    });
    inner.resubscribe();
  }
}

struct RetryState {
  upstream: Option<SharedSubscription>,
  downstream_needs_subscription: bool,
  demand: Demand,
  attempts: usize,
  /// A thread is inside `source.receive`.
  subscribing: bool,
  /// Another attempt became due while `subscribing` was set.
  needs_subscribe: bool,
  done: bool,
}

struct RetryInner<S, P, D> {
  state: Mutex<RetryState>,
  downstream: Downstream<D>,
  source: S,
  policy: Arc<P>,
}

impl<S, P, D> RetryInner<S, P, D>
where
  S: Publisher,
  P: RetryPolicy<S::Failure>,
  D: Subscriber<S::Output, S::Failure>,
{
  fn resubscribe(self: &Arc<Self>) {
    {
      let mut state = self.state.lock();
      if state.subscribing {
        state.needs_subscribe = true;
        return;
      }
      state.subscribing = true;
    }
    loop {
      {
        let mut state = self.state.lock();
        state.needs_subscribe = false;
        if state.done {
          state.subscribing = false;
          return;
        }
      }
      self.source.receive(RetrySubscriber(self.clone()));
      let mut state = self.state.lock();
      if !state.needs_subscribe || state.done {
        state.subscribing = false;
        return;
      }
    }
  }
}

impl<S, P, D> Cancellable for RetryInner<S, P, D>
where
  S: Publisher,
  P: RetryPolicy<S::Failure>,
  D: Subscriber<S::Output, S::Failure>,
{
  fn cancel(&self) {
    let upstream = {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.done = true;
      state.upstream.take()
    };
    log_trace!("retry cancelled");
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }
}

impl<S, P, D> Subscription for RetryInner<S, P, D>
where
  S: Publisher,
  P: RetryPolicy<S::Failure>,
  D: Subscriber<S::Output, S::Failure>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let upstream = {
      let mut state = self.state.lock();
      if state.done {
        return;
      }
      state.demand += demand;
      state.upstream.clone()
    };
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }
}

pub struct RetrySubscriber<S, P, D>(Arc<RetryInner<S, P, D>>);

impl<S, P, D> Subscriber<S::Output, S::Failure> for RetrySubscriber<S, P, D>
where
  S: Publisher,
  P: RetryPolicy<S::Failure>,
  D: Subscriber<S::Output, S::Failure>,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let attach = {
      let mut state = self.0.state.lock();
      if state.done || state.upstream.is_some() {
        None
      } else {
        state.upstream = Some(subscription.clone());
        let needs = std::mem::take(&mut state.downstream_needs_subscription);
        Some((needs, state.demand))
      }
    };
    let Some((needs_subscription, demand)) = attach else {
      log_warn!("retry received an unexpected subscription, cancelling it");
      subscription.cancel();
      return;
    };
    if needs_subscription {
      self.0.downstream.with(|d| d.receive_subscription(self.0.clone()));
    }
    if demand.has_demand() {
      subscription.request(demand);
    }
  }

  fn receive(&self, input: S::Output) -> Demand {
    {
      let mut state = self.0.state.lock();
      if state.done {
        return Demand::NONE;
      }
      state.demand.take_one();
      if self.0.policy.reset_on_success() {
        state.attempts = 0;
      }
    }
    let more = self.0.downstream.with(|d| d.receive(input));
    self.0.state.lock().demand += more;
    more
  }

  fn receive_completion(&self, completion: Completion<S::Failure>) {
    let completion = {
      let mut state = self.0.state.lock();
      if state.done {
        return;
      }
      state.upstream = None;
      match completion {
        Completion::Failure(err) if self.0.policy.should_retry(&err, state.attempts) => {
          state.attempts += 1;
          let attempt = state.attempts;
          drop(state);
          log_debug!("retry resubscribing, attempt {}", attempt);
          self.0.resubscribe();
          return;
        }
        completion => {
          state.done = true;
          completion
        }
      }
    };
    self.0.downstream.with(|d| d.receive_completion(completion));
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::{prelude::*, testing::TestSubscriber};

  /// Fails `failures` times, then emits 1, 2 and finishes.
  fn flaky(failures: usize) -> (Arc<AtomicUsize>, AnyPublisher<i32, &'static str>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let c_attempts = attempts.clone();
    let source = Deferred::new(move || {
      let attempt = c_attempts.fetch_add(1, Ordering::SeqCst);
      if attempt < failures {
        Fail::new("failed").erase()
      } else {
        Sequence::new(vec![1, 2]).set_failure().erase()
      }
    });
    (attempts, source.erase())
  }

  #[rxflow_macro::test]
  fn retries_until_success() {
    let (attempts, source) = flaky(2);
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    source.retry(2).receive(subscriber.clone());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
    assert_eq!(subscriber.subscription_count(), 1);
  }

  #[rxflow_macro::test]
  fn gives_up_after_the_budget() {
    let (attempts, source) = flaky(2);
    let subscriber = TestSubscriber::<i32, &'static str>::with_demand(Demand::UNLIMITED);
    source.retry(1).receive(subscriber.clone());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(subscriber.failure(), Some("failed"));
  }

  #[rxflow_macro::test]
  fn immediate_failures_do_not_recurse() {
    let (attempts, source) = flaky(10_000);
    let subscriber = TestSubscriber::<i32, &'static str>::with_demand(Demand::UNLIMITED);
    source.retry(Some(10_000)).receive(subscriber.clone());
    assert_eq!(attempts.load(Ordering::SeqCst), 10_001);
    assert_eq!(subscriber.values(), vec![1, 2]);
  }

  #[rxflow_macro::test]
  fn outstanding_demand_carries_over() {
    let (_, source) = flaky(1);
    let subscriber = TestSubscriber::<i32, &'static str>::with_demand(Demand::max(1));
    source.retry(RetryConfig::new().count(1)).receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![1]);
    subscriber.request(Demand::max(1));
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_finished());
  }

  #[rxflow_macro::test]
  fn reset_on_success_restores_the_budget() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let c_attempts = attempts.clone();
    // Emits a value and fails, three times, then finishes.
    let source = Deferred::new(move || {
      if c_attempts.fetch_add(1, Ordering::SeqCst) < 3 {
        Just::new(7).set_failure().append(Fail::new("hiccup")).erase()
      } else {
        Empty::new().erase()
      }
    });
    let subscriber = TestSubscriber::with_demand(Demand::UNLIMITED);
    source
      .retry(RetryConfig::new().count(1).reset_on_success())
      .receive(subscriber.clone());
    assert_eq!(subscriber.values(), vec![7, 7, 7]);
    assert!(subscriber.is_finished());
  }
}
