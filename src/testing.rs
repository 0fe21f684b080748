//! Tools for testing pipelines and custom stages.
//!
//! * [`TestScheduler`]: a virtual clock for time-based operators.
//! * [`TestSubscriber`]: records what a stage delivers and drives its demand.
//! * [`TestPublisher`]: an upstream pushed by hand that records the demand
//!   and cancellations it receives.

mod test_publisher;
mod test_scheduler;
mod test_subscriber;

pub use test_publisher::TestPublisher;
pub use test_scheduler::TestScheduler;
pub use test_subscriber::TestSubscriber;
