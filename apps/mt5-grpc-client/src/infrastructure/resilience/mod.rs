//! Resilience
//!
//! Exponential backoff with jitter, and the classification that decides
//! whether a failure is retried, triggers a session reconnect, or is
//! surfaced immediately.

pub mod backoff;
pub mod classify;

pub use backoff::{ReconnectConfig, ReconnectPolicy};
pub use classify::{ErrorClass, TERMINAL_LOOKUP_CODES, classify};
