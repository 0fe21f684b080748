//! Crate-internal logging macros.
//!
//! With the `tracing` feature on they forward to the `tracing` crate. With it
//! off the arguments are still type-checked but nothing is emitted, so call
//! sites never need their own `cfg` guards. Only plain format strings are
//! accepted; structured fields are not used inside the library.

#[cfg(feature = "tracing")]
macro_rules! log_trace {
  ($($arg:tt)*) => { ::tracing::trace!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_trace {
  ($($arg:tt)*) => {{
    let _ = format_args!($($arg)*);
  }};
}

#[cfg(feature = "tracing")]
macro_rules! log_debug {
  ($($arg:tt)*) => { ::tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_debug {
  ($($arg:tt)*) => {{
    let _ = format_args!($($arg)*);
  }};
}

#[cfg(feature = "tracing")]
macro_rules! log_warn {
  ($($arg:tt)*) => { ::tracing::warn!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_warn {
  ($($arg:tt)*) => {{
    let _ = format_args!($($arg)*);
  }};
}
