//! Prelude module for convenient imports.
//!
//! Brings the protocol traits, the built-in publishers, the combinator
//! trait and the operator configuration types into scope.

pub use crate::{
  demand::Demand,
  error::{FlowError, Never},
  ops::{
    AutoconnectOp, BufferOp, BufferingStrategy, CatchOp, CombineLatestOp, ConcatenateOp,
    DebounceOp, DelayOp, DropUntilOutputOp, FilterOp, FlatMapOp, MakeConnectableOp, MapOp,
    MergeManyOp, MergeOp, MulticastOp, PrefetchStrategy, PrefixUntilOutputOp, ReceiveOnOp,
    RetryConfig, RetryOp, RetryPolicy, ShareOp, SubscribeOnOp, SwitchToLatestOp, ThrottleOp,
    TimeoutOp, TryMapOp, ZipOp,
  },
  publisher::{
    AnyPublisher, ConnectablePublisher, Deferred, Empty, Fail, Just, Publisher, PublisherExt,
    Sequence,
  },
  scheduler::{Duration, ImmediateScheduler, Scheduler, TaskHandle},
  subject::{CurrentValueSubject, PassthroughSubject, Subject},
  subscriber::{Completion, Sink, Subscriber},
  subscription::{AnyCancellable, Cancellable, SharedSubscription, Subscription, Subscriptions},
};

#[cfg(feature = "values")]
pub use crate::ops::Values;
#[cfg(feature = "tokio-scheduler")]
pub use crate::scheduler::TokioScheduler;
