#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::items_after_statements
    )
)]

//! MT5 gRPC Client - Reconnect-Aware Execution Core
//!
//! Runs unary and server-streaming calls against a MetaTrader 5 terminal
//! gateway while hiding transient network failures and terminal session
//! loss from callers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Connection and subscription types
//!   - `connection`: credentials, session token, connection state
//!   - `subscription`: pump state and progress counters
//!
//! - **Application**: Ports and the account facade
//!   - `ports`: session handle, authenticator, message stream, reply inspection
//!   - `services`: `Mt5Account`
//!
//! - **Infrastructure**: Execution core and ambient adapters
//!   - `executor`: reconnecting unary executor
//!   - `stream`: subscription pump
//!   - `session`: single-flight reconnect gate, tonic session handle
//!   - `resilience`: backoff and error classification
//!   - `config`, `metrics`, `telemetry`
//!
//! # Call Flow
//!
//! ```text
//! caller ──► Mt5Account ──┬──► ReconnectingExecutor ──┐
//!                         │                           ├──► SharedSession ──► SessionHandle
//!                         └──► SubscriptionPump ──────┘        (one reconnect in flight)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Crate-wide error type.
pub mod error;

/// Domain layer - Connection and subscription types.
pub mod domain;

/// Application layer - Ports and the account facade.
pub mod application;

/// Infrastructure layer - Executor, pump, sessions, and ambient concerns.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Errors
pub use error::{ApiError, Mt5Error, Result};

// Domain types
pub use domain::connection::{ConnectionState, Credentials, SESSION_METADATA_KEY, SessionToken};
pub use domain::subscription::{PumpState, SubscriptionStats};

// Ports and services
pub use application::ports::{ApiReply, Authenticator, MessageStream, SessionHandle};
pub use application::services::Mt5Account;

// Execution core
pub use infrastructure::executor::{CallClass, CallContext, ExecutorConfig, ReconnectingExecutor};
pub use infrastructure::resilience::{ErrorClass, ReconnectConfig, ReconnectPolicy};
pub use infrastructure::session::{GrpcSession, SharedSession};
pub use infrastructure::stream::{
    PumpConfig, StreamAdapter, Subscription, SubscriptionHandle, SubscriptionPump,
};

// Configuration
pub use infrastructure::config::{
    ClientConfig, ConfigError, EndpointSettings, RetrySettings, StreamSettings, TimeoutSettings,
};
