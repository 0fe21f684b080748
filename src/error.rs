//! Ready-made failure types.
//!
//! Failures in `rxflow` are user-typed: every publisher names its own
//! `Failure`. [`FlowError`] covers the conditions the library itself can
//! raise (timeouts, buffer overflow, failing transforms) for pipelines that
//! have no domain error of their own, and [`Never`] marks publishers that
//! cannot fail at all.

use std::time::Duration;

use thiserror::Error;

/// Failure type of publishers that never fail.
pub type Never = std::convert::Infallible;

/// Failures produced by the library's own operators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
  /// No value or completion arrived within the configured interval.
  #[error("no value received within {0:?}")]
  Timeout(Duration),

  /// A buffer configured with a failing overflow strategy was full.
  #[error("buffer overflow: capacity of {capacity} exceeded")]
  BufferOverflow { capacity: usize },

  /// A user transform rejected a value.
  #[error("transform failed: {0}")]
  Transform(String),
}

impl FlowError {
  /// Builds a [`FlowError::Transform`] from any displayable error.
  pub fn transform(err: impl std::fmt::Display) -> Self { FlowError::Transform(err.to_string()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxflow_macro::test]
  fn messages() {
    assert_eq!(
      FlowError::Timeout(Duration::from_millis(5)).to_string(),
      "no value received within 5ms"
    );
    assert_eq!(
      FlowError::BufferOverflow { capacity: 2 }.to_string(),
      "buffer overflow: capacity of 2 exceeded"
    );
    assert_eq!(FlowError::transform("bad input").to_string(), "transform failed: bad input");
  }
}
