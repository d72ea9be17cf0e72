//! Client Error Types
//!
//! A single error enum covers transport failures, gRPC statuses, errors
//! embedded in terminal replies, and the terminal outcomes of the retry loops.
//! It is `Clone` so that one reconnect outcome can be handed to every caller
//! that was waiting on it.

use std::time::Duration;

use thiserror::Error;
use tonic::Code;

/// Result type alias using [`Mt5Error`].
pub type Result<T> = std::result::Result<T, Mt5Error>;

/// Errors produced by the execution core.
#[derive(Debug, Clone, Error)]
pub enum Mt5Error {
    /// Transport-level failure (connect refused, reset, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The gateway reported itself unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The terminal session is gone and must be re-authenticated.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Any other gRPC status returned by the gateway.
    #[error("rpc failed ({code:?}): {message}")]
    Rpc {
        /// gRPC status code.
        code: Code,
        /// Status message from the server.
        message: String,
    },

    /// Application error carried inside an otherwise successful reply.
    #[error("api error {code}: {message}")]
    Api {
        /// Terminal error code (e.g. `TERMINAL_INSTANCE_NOT_FOUND`).
        code: String,
        /// Human readable description.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed before any attempt completed.
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Retry or reconnect budget ran out.
    #[error("reconnect failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last transient cause.
        #[source]
        source: Box<Mt5Error>,
    },

    /// No live session is available.
    #[error("session is not connected")]
    NotConnected,

    /// The session was closed by its owner and will not be re-established.
    #[error("session closed")]
    SessionClosed,

    /// Server-side stream was torn down unexpectedly.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    /// Invalid client configuration or missing credentials.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Mt5Error {
    /// The root cause, unwrapping any `RetriesExhausted` layers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<tonic::Status> for Mt5Error {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::Unavailable => Self::Unavailable(message),
            Code::Unauthenticated => Self::SessionExpired(message),
            code => Self::Rpc { code, message },
        }
    }
}

impl From<tonic::transport::Error> for Mt5Error {
    fn from(err: tonic::transport::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Error object embedded in a terminal reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Terminal error code.
    pub code: String,
    /// Human readable description.
    pub message: String,
}

impl ApiError {
    /// Create a new API error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ApiError> for Mt5Error {
    fn from(err: ApiError) -> Self {
        Self::Api {
            code: err.code,
            message: err.message,
        }
    }
}
