//! The producing side of the protocol and the combinator surface.
//!
//! A [`Publisher`] is a description of a stream: every call to
//! [`Publisher::receive`] starts a fresh, independent run of it for one
//! subscriber. [`PublisherExt`] adds the combinators to every publisher.

use std::{sync::Arc, time::Duration};

use crate::{
  demand::Demand,
  error::FlowError,
  ops::{
    autoconnect::{AutoconnectOp, ShareOp},
    buffer::{BufferOp, BufferingStrategy, PrefetchStrategy},
    catch::CatchOp,
    combine_latest::CombineLatestOp,
    concatenate::ConcatenateOp,
    debounce::DebounceOp,
    delay::DelayOp,
    drop_until_output::DropUntilOutputOp,
    filter::FilterOp,
    flat_map::FlatMapOp,
    map::MapOp,
    merge::MergeOp,
    multicast::{MakeConnectableOp, MulticastOp},
    prefix_until_output::PrefixUntilOutputOp,
    receive_on::ReceiveOnOp,
    retry::{RetryOp, RetryPolicy},
    subscribe_on::SubscribeOnOp,
    switch_to_latest::SwitchToLatestOp,
    throttle::ThrottleOp,
    timeout::TimeoutOp,
    try_map::TryMapOp,
    zip::ZipOp,
  },
  scheduler::Scheduler,
  subject::{PassthroughSubject, Subject},
  subscriber::{sink::Sink, Completion, Subscriber},
  subscription::AnyCancellable,
};

mod boxed;
mod deferred;
mod empty;
mod fail;
mod just;
mod sequence;

pub use boxed::AnyPublisher;
pub use deferred::Deferred;
pub use empty::Empty;
pub use fail::Fail;
pub use just::Just;
pub use sequence::Sequence;

/// Produces values of type `Output` and ends with a `Completion<Failure>`.
///
/// An implementation hands the subscriber exactly one subscription, then
/// never pushes more values than the subscriber has requested through it.
pub trait Publisher: Send + Sync + 'static {
  type Output: Send + 'static;
  type Failure: Send + 'static;

  /// Attaches `subscriber`, starting a new run of the stream for it.
  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Output, Self::Failure>;
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
  type Output = P::Output;
  type Failure = P::Failure;

  #[inline]
  fn receive<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Output, Self::Failure>,
  {
    (**self).receive(subscriber)
  }
}

/// A publisher whose upstream work starts only when asked to.
///
/// Subscribers may attach at any time; values flow once [`connect`] has
/// been called, and stop when the returned handle is cancelled or dropped.
///
/// [`connect`]: ConnectablePublisher::connect
pub trait ConnectablePublisher: Publisher {
  /// Opens the single upstream subscription.
  fn connect(&self) -> AnyCancellable;

  /// Connects when the first subscriber arrives and disconnects when the
  /// last one cancels.
  fn autoconnect(self) -> AutoconnectOp<Self>
  where
    Self: Sized,
  {
    AutoconnectOp::new(self)
  }
}

/// Combinators available on every [`Publisher`].
pub trait PublisherExt: Publisher + Sized {
  /// Same as [`Publisher::receive`], consuming the publisher.
  #[inline]
  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Self::Output, Self::Failure>,
  {
    self.receive(subscriber)
  }

  /// Requests unlimited demand and hands every event to the closures.
  ///
  /// The stream runs for as long as the returned handle lives.
  fn sink(
    self, on_value: impl Fn(Self::Output) + Send + Sync + 'static,
    on_completion: impl FnOnce(Completion<Self::Failure>) + Send + 'static,
  ) -> AnyCancellable {
    let sink = Arc::new(Sink::new(on_value, on_completion));
    self.receive(sink.clone());
    AnyCancellable::from_cancellable(sink)
  }

  /// [`sink`](PublisherExt::sink) ignoring the completion.
  fn sink_values(self, on_value: impl Fn(Self::Output) + Send + Sync + 'static) -> AnyCancellable {
    self.sink(on_value, |_| {})
  }

  /// Erases the concrete type of the pipeline.
  fn erase(self) -> AnyPublisher<Self::Output, Self::Failure> { AnyPublisher::new(self) }

  // ==================== Transforms ====================

  fn map<B, M>(self, func: M) -> MapOp<Self, M>
  where
    M: Fn(Self::Output) -> B + Send + Sync + 'static,
  {
    MapOp { source: self, func: Arc::new(func) }
  }

  fn filter<F>(self, filter: F) -> FilterOp<Self, F>
  where
    F: Fn(&Self::Output) -> bool + Send + Sync + 'static,
  {
    FilterOp { source: self, filter: Arc::new(filter) }
  }

  /// Like [`map`](PublisherExt::map), but an `Err` from `func` cancels the
  /// upstream and fails the stream.
  fn try_map<B, M>(self, func: M) -> TryMapOp<Self, M>
  where
    M: Fn(Self::Output) -> Result<B, Self::Failure> + Send + Sync + 'static,
  {
    TryMapOp { source: self, func: Arc::new(func) }
  }

  // ==================== Fan-in ====================

  fn combine_latest<P>(self, other: P) -> CombineLatestOp<(Self, P)> {
    CombineLatestOp::new((self, other))
  }

  fn combine_latest3<B, C>(self, b: B, c: C) -> CombineLatestOp<(Self, B, C)> {
    CombineLatestOp::new((self, b, c))
  }

  fn combine_latest4<B, C, D>(self, b: B, c: C, d: D) -> CombineLatestOp<(Self, B, C, D)> {
    CombineLatestOp::new((self, b, c, d))
  }

  fn combine_latest5<B, C, D, E>(
    self, b: B, c: C, d: D, e: E,
  ) -> CombineLatestOp<(Self, B, C, D, E)> {
    CombineLatestOp::new((self, b, c, d, e))
  }

  fn combine_latest6<B, C, D, E, G>(
    self, b: B, c: C, d: D, e: E, g: G,
  ) -> CombineLatestOp<(Self, B, C, D, E, G)> {
    CombineLatestOp::new((self, b, c, d, e, g))
  }

  fn combine_latest7<B, C, D, E, G, H>(
    self, b: B, c: C, d: D, e: E, g: G, h: H,
  ) -> CombineLatestOp<(Self, B, C, D, E, G, H)> {
    CombineLatestOp::new((self, b, c, d, e, g, h))
  }

  fn combine_latest8<B, C, D, E, G, H, J>(
    self, b: B, c: C, d: D, e: E, g: G, h: H, j: J,
  ) -> CombineLatestOp<(Self, B, C, D, E, G, H, J)> {
    CombineLatestOp::new((self, b, c, d, e, g, h, j))
  }

  fn merge<P>(self, other: P) -> MergeOp<(Self, P)> { MergeOp::new((self, other)) }

  fn merge3<B, C>(self, b: B, c: C) -> MergeOp<(Self, B, C)> { MergeOp::new((self, b, c)) }

  fn merge4<B, C, D>(self, b: B, c: C, d: D) -> MergeOp<(Self, B, C, D)> {
    MergeOp::new((self, b, c, d))
  }

  fn merge5<B, C, D, E>(
    self, b: B, c: C, d: D, e: E,
  ) -> MergeOp<(Self, B, C, D, E)> {
    MergeOp::new((self, b, c, d, e))
  }

  fn merge6<B, C, D, E, G>(
    self, b: B, c: C, d: D, e: E, g: G,
  ) -> MergeOp<(Self, B, C, D, E, G)> {
    MergeOp::new((self, b, c, d, e, g))
  }

  fn merge7<B, C, D, E, G, H>(
    self, b: B, c: C, d: D, e: E, g: G, h: H,
  ) -> MergeOp<(Self, B, C, D, E, G, H)> {
    MergeOp::new((self, b, c, d, e, g, h))
  }

  fn merge8<B, C, D, E, G, H, J>(
    self, b: B, c: C, d: D, e: E, g: G, h: H, j: J,
  ) -> MergeOp<(Self, B, C, D, E, G, H, J)> {
    MergeOp::new((self, b, c, d, e, g, h, j))
  }

  fn zip<P>(self, other: P) -> ZipOp<(Self, P)> { ZipOp::new((self, other)) }

  fn zip3<B, C>(self, b: B, c: C) -> ZipOp<(Self, B, C)> { ZipOp::new((self, b, c)) }

  fn zip4<B, C, D>(self, b: B, c: C, d: D) -> ZipOp<(Self, B, C, D)> { ZipOp::new((self, b, c, d)) }

  fn zip5<B, C, D, E>(
    self, b: B, c: C, d: D, e: E,
  ) -> ZipOp<(Self, B, C, D, E)> {
    ZipOp::new((self, b, c, d, e))
  }

  fn zip6<B, C, D, E, G>(
    self, b: B, c: C, d: D, e: E, g: G,
  ) -> ZipOp<(Self, B, C, D, E, G)> {
    ZipOp::new((self, b, c, d, e, g))
  }

  fn zip7<B, C, D, E, G, H>(
    self, b: B, c: C, d: D, e: E, g: G, h: H,
  ) -> ZipOp<(Self, B, C, D, E, G, H)> {
    ZipOp::new((self, b, c, d, e, g, h))
  }

  fn zip8<B, C, D, E, G, H, J>(
    self, b: B, c: C, d: D, e: E, g: G, h: H, j: J,
  ) -> ZipOp<(Self, B, C, D, E, G, H, J)> {
    ZipOp::new((self, b, c, d, e, g, h, j))
  }

  // ==================== Flattening ====================

  /// Maps every value to a publisher and merges their values, with at most
  /// `max_publishers` of them subscribed at once.
  ///
  /// # Panics
  ///
  /// Panics when `max_publishers` is [`Demand::NONE`].
  fn flat_map<P, M>(self, max_publishers: Demand, func: M) -> FlatMapOp<Self, M>
  where
    M: Fn(Self::Output) -> P + Send + Sync + 'static,
    P: Publisher<Failure = Self::Failure>,
  {
    assert!(max_publishers.has_demand(), "flat_map needs room for at least one publisher");
    FlatMapOp { source: self, max_publishers, func: Arc::new(func) }
  }

  /// Forwards the values of the most recent inner publisher only.
  fn switch_to_latest(self) -> SwitchToLatestOp<Self>
  where
    Self::Output: Publisher<Failure = Self::Failure>,
  {
    SwitchToLatestOp { source: self }
  }

  // ==================== Timing ====================

  /// Emits a value only after `due` has passed without a newer one.
  fn debounce<Sch: Scheduler>(self, due: Duration, scheduler: Sch) -> DebounceOp<Self, Sch> {
    DebounceOp { source: self, due, scheduler }
  }

  /// Emits at most one value per `interval`: the first of the window, or
  /// the newest when `latest` is set.
  fn throttle<Sch: Scheduler>(
    self, interval: Duration, scheduler: Sch, latest: bool,
  ) -> ThrottleOp<Self, Sch> {
    ThrottleOp { source: self, interval, scheduler, latest }
  }

  /// Finishes the stream when `interval` passes without a value.
  fn timeout<Sch: Scheduler>(self, interval: Duration, scheduler: Sch) -> TimeoutOp<Self, Sch> {
    TimeoutOp { source: self, interval, scheduler, error: None }
  }

  /// Fails the stream with the error built by `make_error` when `interval`
  /// passes without a value.
  fn timeout_with<Sch, E>(
    self, interval: Duration, scheduler: Sch, make_error: E,
  ) -> TimeoutOp<Self, Sch>
  where
    Sch: Scheduler,
    E: Fn() -> Self::Failure + Send + Sync + 'static,
  {
    TimeoutOp { source: self, interval, scheduler, error: Some(Arc::new(make_error)) }
  }

  /// Fails the stream with [`FlowError::Timeout`] when `interval` passes
  /// without a value.
  fn timeout_error<Sch>(self, interval: Duration, scheduler: Sch) -> TimeoutOp<Self, Sch>
  where
    Sch: Scheduler,
    Self::Failure: From<FlowError>,
  {
    self.timeout_with(interval, scheduler, move || FlowError::Timeout(interval).into())
  }

  /// Shifts every value and the completion by `interval`.
  fn delay<Sch: Scheduler>(self, interval: Duration, scheduler: Sch) -> DelayOp<Self, Sch> {
    DelayOp { source: self, interval, scheduler }
  }

  // ==================== Scheduling ====================

  /// Delivers values and the completion through `scheduler`.
  fn receive_on<Sch: Scheduler>(self, scheduler: Sch) -> ReceiveOnOp<Self, Sch> {
    ReceiveOnOp { source: self, scheduler }
  }

  /// Subscribes, requests and cancels through `scheduler`.
  fn subscribe_on<Sch: Scheduler>(self, scheduler: Sch) -> SubscribeOnOp<Self, Sch> {
    SubscribeOnOp { source: Arc::new(self), scheduler }
  }

  // ==================== Sharing ====================

  /// Feeds `subject` from one upstream subscription opened by `connect`.
  fn multicast<Sub>(self, subject: Sub) -> MulticastOp<Self, Sub>
  where
    Sub: Subject<Output = Self::Output, Failure = Self::Failure>,
  {
    MulticastOp::new(self, move || subject.clone())
  }

  /// Like [`multicast`](PublisherExt::multicast), building the subject on
  /// first use.
  fn multicast_with<Sub, C>(self, create: C) -> MulticastOp<Self, Sub>
  where
    Sub: Subject<Output = Self::Output, Failure = Self::Failure>,
    C: Fn() -> Sub + Send + Sync + 'static,
  {
    MulticastOp::new(self, create)
  }

  /// Multicasts through a [`PassthroughSubject`].
  fn make_connectable(self) -> MakeConnectableOp<Self>
  where
    Self::Output: Clone,
    Self::Failure: Clone,
  {
    self.multicast_with(PassthroughSubject::new)
  }

  /// Shares one upstream subscription among every current subscriber.
  fn share(self) -> ShareOp<Self>
  where
    Self::Output: Clone,
    Self::Failure: Clone,
  {
    self.make_connectable().autoconnect()
  }

  // ==================== Flow control ====================

  /// Holds up to `size` values the downstream has not asked for yet.
  fn buffer(
    self, size: usize, prefetch: PrefetchStrategy, when_full: BufferingStrategy<Self::Failure>,
  ) -> BufferOp<Self> {
    BufferOp { source: self, size, prefetch, when_full }
  }

  /// Delivers this publisher's values, then those of `suffix`.
  fn append<S>(self, suffix: S) -> ConcatenateOp<Self, S>
  where
    S: Publisher<Output = Self::Output, Failure = Self::Failure> + Clone,
  {
    ConcatenateOp::new(self, suffix)
  }

  /// Resubscribes after a failure for as long as `policy` allows.
  fn retry<P>(self, policy: P) -> RetryOp<Self, P>
  where
    Self: Clone,
    P: RetryPolicy<Self::Failure>,
  {
    RetryOp { source: self, policy: Arc::new(policy) }
  }

  /// Replaces a failed stream with the publisher `handler` returns.
  fn catch<P, H>(self, handler: H) -> CatchOp<Self, H>
  where
    H: Fn(Self::Failure) -> P + Send + Sync + 'static,
    P: Publisher<Output = Self::Output>,
  {
    CatchOp { source: self, handler: Arc::new(handler) }
  }

  /// Ignores values until `trigger` emits one.
  fn drop_until_output<P>(self, trigger: P) -> DropUntilOutputOp<Self, P>
  where
    P: Publisher<Failure = Self::Failure>,
  {
    DropUntilOutputOp { source: self, trigger }
  }

  /// Forwards values until `trigger` emits one, then finishes.
  fn prefix_until_output<P: Publisher>(self, trigger: P) -> PrefixUntilOutputOp<Self, P> {
    PrefixUntilOutputOp { source: self, trigger }
  }

  /// Consumes the stream as an async [`Stream`](futures::stream::Stream) of
  /// results, one value requested per empty poll.
  #[cfg(feature = "values")]
  fn values(self) -> crate::ops::values::Values<Self::Output, Self::Failure> {
    crate::ops::values::Values::new(&self)
  }
}

impl<P: Publisher> PublisherExt for P {}
