//! Values: a publisher consumed as an async stream.
//!
//! Turns any publisher into a `futures::Stream` of `Result<O, F>`, so a
//! pipeline can be driven from `async` code:
//!
//! ```rust
//! use futures::StreamExt;
//! use rxflow::prelude::*;
//!
//! # futures::executor::block_on(async {
//! let mut values = Sequence::new(vec![1, 2]).values();
//! assert_eq!(values.next().await, Some(Ok(1)));
//! assert_eq!(values.next().await, Some(Ok(2)));
//! assert_eq!(values.next().await, None);
//! # });
//! ```
//!
//! The stream is demand-driven: one value is requested each time it is
//! polled with nothing buffered. A failure is yielded as `Err` and ends the
//! stream. Dropping the stream cancels the upstream.

use std::{
  collections::VecDeque,
  fmt,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll, Waker},
};

use futures::stream::Stream;
use parking_lot::Mutex;

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::SharedSubscription,
};

struct ValuesState<O, F> {
  queue: VecDeque<Result<O, F>>,
  waker: Option<Waker>,
  subscription: Option<SharedSubscription>,
  /// A request of one is outstanding and its value has not arrived yet.
  requested: bool,
  closed: bool,
}

type SharedState<O, F> = Arc<Mutex<ValuesState<O, F>>>;

/// Stream returned by [`PublisherExt::values`](crate::publisher::PublisherExt::values).
pub struct Values<O, F> {
  state: SharedState<O, F>,
}

impl<O, F> Values<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  pub fn new<P>(publisher: &P) -> Self
  where
    P: Publisher<Output = O, Failure = F>,
  {
    let state = Arc::new(Mutex::new(ValuesState {
      queue: VecDeque::new(),
      waker: None,
      subscription: None,
      requested: false,
      closed: false,
    }));
    publisher.receive(ValuesSubscriber(state.clone()));
    Values { state }
  }
}

impl<O, F> Stream for Values<O, F> {
  type Item = Result<O, F>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let subscription = {
      let mut state = self.state.lock();
      if let Some(item) = state.queue.pop_front() {
        return Poll::Ready(Some(item));
      }
      if state.closed {
        return Poll::Ready(None);
      }
      state.waker = Some(cx.waker().clone());
      if state.requested {
        return Poll::Pending;
      }
      match state.subscription.clone() {
        Some(subscription) => {
          state.requested = true;
          subscription
        }
        None => return Poll::Pending,
      }
    };
    subscription.request(Demand::max(1));

    // The upstream may have answered synchronously.
    let mut state = self.state.lock();
    match state.queue.pop_front() {
      Some(item) => Poll::Ready(Some(item)),
      None if state.closed => Poll::Ready(None),
      None => Poll::Pending,
    }
  }
}

impl<O, F> Drop for Values<O, F> {
  fn drop(&mut self) {
    let subscription = {
      let mut state = self.state.lock();
      state.closed = true;
      state.waker = None;
      state.subscription.take()
    };
    if let Some(subscription) = subscription {
      log_trace!("values stream dropped, cancelling upstream");
      subscription.cancel();
    }
  }
}

impl<O, F> fmt::Debug for Values<O, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("Values")
      .field("buffered", &state.queue.len())
      .field("closed", &state.closed)
      .finish()
  }
}

pub struct ValuesSubscriber<O, F>(SharedState<O, F>);

impl<O, F> ValuesSubscriber<O, F> {
  fn wake(waker: Option<Waker>) {
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

impl<O, F> Subscriber<O, F> for ValuesSubscriber<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  fn receive_subscription(&self, subscription: SharedSubscription) {
    let request = {
      let mut state = self.0.lock();
      if state.closed || state.subscription.is_some() {
        drop(state);
        log_warn!("values stream received an unexpected subscription, cancelling it");
        subscription.cancel();
        return;
      }
      state.subscription = Some(subscription.clone());
      // Polled before the subscription arrived.
      let waiting = state.waker.is_some() && !state.requested;
      if waiting {
        state.requested = true;
      }
      waiting
    };
    if request {
      subscription.request(Demand::max(1));
    }
  }

  fn receive(&self, input: O) -> Demand {
    let waker = {
      let mut state = self.0.lock();
      if state.closed {
        return Demand::NONE;
      }
      state.queue.push_back(Ok(input));
      state.requested = false;
      state.waker.take()
    };
    Self::wake(waker);
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let waker = {
      let mut state = self.0.lock();
      if state.closed {
        return;
      }
      if let Completion::Failure(err) = completion {
        state.queue.push_back(Err(err));
      }
      state.closed = true;
      state.subscription = None;
      state.waker.take()
    };
    Self::wake(waker);
  }
}
