//! Infrastructure Layer - Execution core and ambient adapters.
//!
//! The reconnecting executor and the subscription pump live here, together
//! with the session adapters they drive and the configuration, metrics, and
//! logging they share.

/// Backoff policy and error classification.
pub mod resilience;

/// Shared session (single-flight reconnect) and the tonic session adapter.
pub mod session;

/// Reconnecting unary executor.
pub mod executor;

/// Stream subscription pump.
pub mod stream;

/// Configuration loaded from the environment.
pub mod config;

/// Metric recording through the `metrics` facade.
pub mod metrics;

/// `tracing` subscriber initialization.
pub mod telemetry;
