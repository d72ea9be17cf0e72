//! Connection Types
//!
//! Credentials for a terminal account, the session token the gateway hands
//! back after authentication, and the connection state classification that
//! a session handle reports.

use std::fmt;

use tonic::metadata::AsciiMetadataValue;
use uuid::Uuid;

use crate::Mt5Error;

// =============================================================================
// Connection State
// =============================================================================

/// Classification of a session handle's connection.
///
/// Owned by the session handle; the executor and pump only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected, or closed by the owner.
    #[default]
    Disconnected,
    /// Authenticated session is live.
    Connected,
    /// Last connection attempt failed in a way that may recover.
    TransientlyFailed,
    /// Last connection attempt was rejected (bad credentials, account disabled).
    TerminallyFailed,
}

impl ConnectionState {
    /// Check if the session is usable.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if reconnecting could help.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::TerminallyFailed)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::TransientlyFailed => "transiently_failed",
            Self::TerminallyFailed => "terminally_failed",
        }
    }
}

// =============================================================================
// Session Token
// =============================================================================

/// Metadata key the gateway uses to route a call to a terminal instance.
pub const SESSION_METADATA_KEY: &str = "id";

/// Identity of an authenticated terminal instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    /// Wrap a terminal instance id.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Create a random token (useful for tests and fakes).
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying terminal instance id.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Attach this token to an outgoing request as `id` metadata.
    pub fn attach<T>(&self, request: &mut tonic::Request<T>) {
        match AsciiMetadataValue::try_from(self.0.hyphenated().to_string()) {
            Ok(value) => {
                request.metadata_mut().insert(SESSION_METADATA_KEY, value);
            }
            Err(e) => tracing::warn!(error = %e, "Session token is not valid metadata"),
        }
    }

    /// Wrap a message in a request carrying this token.
    #[must_use]
    pub fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        self.attach(&mut request);
        request
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// MT5 account credentials.
///
/// The `Debug` implementation redacts the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    login: u64,
    password: String,
    server: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the password or server name is empty.
    pub fn new(
        login: u64,
        password: impl Into<String>,
        server: impl Into<String>,
    ) -> Result<Self, Mt5Error> {
        let password = password.into();
        let server = server.into();

        if password.is_empty() {
            return Err(Mt5Error::InvalidConfig("password cannot be empty".to_string()));
        }
        if server.is_empty() {
            return Err(Mt5Error::InvalidConfig("server name cannot be empty".to_string()));
        }

        Ok(Self {
            login,
            password,
            server,
        })
    }

    /// Account login number.
    #[must_use]
    pub const fn login(&self) -> u64 {
        self.login
    }

    /// Account password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Broker server (cluster) name.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("server", &self.server)
            .finish()
    }
}
