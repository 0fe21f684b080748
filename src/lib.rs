//! # rxflow: demand-driven reactive streams
//!
//! Publishers describe streams, subscribers consume them, and every value
//! travels only after the subscriber asked for it through its
//! [`Subscription`](subscription::Subscription). Combinators keep that
//! contract across fan-in, flattening and time-based stages.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxflow::prelude::*;
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let c_seen = seen.clone();
//! let _handle = Sequence::new(0..10)
//!   .filter(|v| v % 2 == 0)
//!   .map(|v| v * 2)
//!   .sink_values(move |v| c_seen.lock().unwrap().push(v));
//!
//! assert_eq!(*seen.lock().unwrap(), vec![0, 4, 8, 12, 16]);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Publisher`] | Describes a stream; every `receive` starts a new run |
//! | [`Subscriber`] | Receives a subscription, values, then one completion |
//! | [`Subscription`] | Requests [`Demand`] or cancels the stream |
//! | [`Scheduler`] | Runs the delayed work of time-based operators |
//!
//! ## Feature Flags
//!
//! - **`tracing`** (default): operators log through the `tracing` crate
//! - **`values`** (default): `PublisherExt::values`, an async `Stream` bridge
//! - **`tokio-scheduler`**: a [`Scheduler`] backed by a tokio runtime
//!
//! [`Publisher`]: publisher::Publisher
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`Demand`]: demand::Demand
//! [`Scheduler`]: scheduler::Scheduler

#[macro_use]
mod logging;

mod status;

pub mod demand;
pub mod error;
pub mod lock;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod scheduler;
pub mod subject;
pub mod subscriber;
pub mod subscription;
pub mod testing;

pub use prelude::*;
