//! Operator implementations.
//!
//! Each module holds one operator: its publisher type (`XxxOp`), the
//! subscriber it inserts into the upstream and, for stateful stages, the
//! shared state behind both. The operators are usually reached through
//! [`PublisherExt`](crate::publisher::PublisherExt) rather than built by hand.

mod fan_in;

pub mod autoconnect;
pub mod buffer;
pub mod catch;
pub mod combine_latest;
pub mod concatenate;
pub mod debounce;
pub mod delay;
pub mod drop_until_output;
pub mod filter;
pub mod flat_map;
pub mod map;
pub mod merge;
pub mod multicast;
pub mod prefix_until_output;
pub mod receive_on;
pub mod retry;
pub mod subscribe_on;
pub mod switch_to_latest;
pub mod throttle;
pub mod timeout;
pub mod try_map;
#[cfg(feature = "values")]
pub mod values;
pub mod zip;

pub use autoconnect::{AutoconnectOp, ShareOp};
pub use buffer::{BufferOp, BufferingStrategy, PrefetchStrategy};
pub use catch::CatchOp;
pub use combine_latest::CombineLatestOp;
pub use concatenate::ConcatenateOp;
pub use debounce::DebounceOp;
pub use delay::DelayOp;
pub use drop_until_output::DropUntilOutputOp;
pub use filter::FilterOp;
pub use flat_map::FlatMapOp;
pub use map::MapOp;
pub use merge::{MergeManyOp, MergeOp};
pub use multicast::{MakeConnectableOp, MulticastOp};
pub use prefix_until_output::PrefixUntilOutputOp;
pub use receive_on::ReceiveOnOp;
pub use retry::{RetryConfig, RetryOp, RetryPolicy};
pub use subscribe_on::SubscribeOnOp;
pub use switch_to_latest::SwitchToLatestOp;
pub use throttle::ThrottleOp;
pub use timeout::{TimeoutError, TimeoutOp};
pub use try_map::TryMapOp;
#[cfg(feature = "values")]
pub use values::Values;
pub use zip::ZipOp;
