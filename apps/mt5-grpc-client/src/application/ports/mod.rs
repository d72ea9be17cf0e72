//! Port Interfaces
//!
//! Contracts for the external collaborators of the execution core.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SessionHandle`: authenticated connection that can be re-established
//!   from stored credentials
//! - `Authenticator`: the single RPC that turns credentials into a token
//! - `MessageStream`: one server-streaming call's receive side
//!
//! ## Reply Inspection
//!
//! - `ApiReply`: terminal replies that may carry an embedded error

use async_trait::async_trait;
use tonic::transport::Channel;

use crate::domain::connection::{ConnectionState, Credentials, SessionToken};
use crate::error::{ApiError, Mt5Error};

/// Authenticated connection to a terminal, shared by every call.
///
/// Implementations own their [`ConnectionState`]; callers only read it.
/// `reconnect` is never invoked concurrently by this crate: callers go
/// through [`SharedSession`](crate::SharedSession), which serializes it.
#[async_trait]
pub trait SessionHandle: Send + Sync + 'static {
    /// Establish a session and remember the credentials for later reconnects.
    async fn connect(&self, credentials: &Credentials) -> Result<SessionToken, Mt5Error>;

    /// Tear down and re-establish the session from stored credentials.
    async fn reconnect(&self) -> Result<(), Mt5Error>;

    /// Token of the live session, if any.
    fn current_token(&self) -> Option<SessionToken>;

    /// Current connection classification.
    fn state(&self) -> ConnectionState;

    /// Release the connection.
    async fn close(&self);
}

/// Performs the terminal's connect RPC over a freshly opened channel.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Authenticate and return the terminal instance token.
    async fn authenticate(
        &self,
        channel: Channel,
        credentials: &Credentials,
    ) -> Result<SessionToken, Mt5Error>;
}

/// Receive side of one server-streaming call.
///
/// `Ok(None)` signals a clean end of stream.
#[async_trait]
pub trait MessageStream<T: Send>: Send {
    /// Wait for the next message.
    async fn next_message(&mut self) -> Result<Option<T>, Mt5Error>;

    /// Release the underlying stream. Dropping has the same effect by default.
    async fn close(&mut self) {}
}

/// A terminal reply that may carry an application error instead of data.
pub trait ApiReply {
    /// The embedded error, if the terminal rejected the request.
    fn api_error(&self) -> Option<ApiError>;
}
