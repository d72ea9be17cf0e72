//! Tonic session handle.
//!
//! Owns the gRPC channel to the gateway and the terminal token returned by
//! the authenticate RPC. A reconnect opens a fresh channel and
//! re-authenticates with the credentials from the last `connect`. The old
//! channel stays in place until the new one is authenticated. After `close`
//! the session refuses to reconnect until `connect` is called again.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::application::ports::{Authenticator, SessionHandle};
use crate::domain::connection::{ConnectionState, Credentials, SessionToken};
use crate::error::Mt5Error;
use crate::infrastructure::config::EndpointSettings;
use crate::infrastructure::resilience::ErrorClass;

/// Session handle backed by a tonic channel.
pub struct GrpcSession<A> {
    endpoint: Endpoint,
    authenticator: A,
    credentials: RwLock<Option<Credentials>>,
    channel: RwLock<Option<Channel>>,
    token: RwLock<Option<SessionToken>>,
    state: RwLock<ConnectionState>,
    closed: AtomicBool,
}

impl<A> std::fmt::Debug for GrpcSession<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcSession")
            .field("uri", self.endpoint.uri())
            .field("state", &*self.state.read())
            .field("token", &*self.token.read())
            .finish_non_exhaustive()
    }
}

impl<A: Authenticator> GrpcSession<A> {
    /// Create a disconnected session for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the URL or TLS setup is invalid.
    pub fn new(settings: &EndpointSettings, authenticator: A) -> Result<Self, Mt5Error> {
        Ok(Self {
            endpoint: Self::create_endpoint(settings)?,
            authenticator,
            credentials: RwLock::new(None),
            channel: RwLock::new(None),
            token: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            closed: AtomicBool::new(false),
        })
    }

    /// Channel of the live session, for building service clients.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` before the first successful connect.
    pub fn channel(&self) -> Result<Channel, Mt5Error> {
        self.channel.read().clone().ok_or(Mt5Error::NotConnected)
    }

    /// Create a configured endpoint from the settings.
    ///
    /// No per-request timeout is set; deadlines belong to each call.
    fn create_endpoint(settings: &EndpointSettings) -> Result<Endpoint, Mt5Error> {
        let endpoint = Channel::from_shared(settings.url.clone())
            .map_err(|e| Mt5Error::InvalidConfig(format!("invalid endpoint: {e}")))?
            .connect_timeout(settings.connect_timeout)
            .tcp_keepalive(Some(settings.tcp_keepalive))
            .http2_keep_alive_interval(settings.http2_keepalive_interval)
            .keep_alive_timeout(settings.keepalive_timeout)
            .keep_alive_while_idle(true)
            .tcp_nodelay(true);

        if settings.use_tls {
            return endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| Mt5Error::InvalidConfig(format!("invalid tls config: {e}")));
        }

        Ok(endpoint)
    }

    /// Open a fresh channel and authenticate on it.
    async fn establish(&self, credentials: &Credentials) -> Result<SessionToken, Mt5Error> {
        let channel = match self.endpoint.connect().await {
            Ok(channel) => channel,
            Err(e) => {
                self.drop_session(ConnectionState::TransientlyFailed);
                tracing::warn!(uri = %self.endpoint.uri(), error = %e, "Failed to open channel");
                return Err(e.into());
            }
        };

        match self
            .authenticator
            .authenticate(channel.clone(), credentials)
            .await
        {
            Ok(_) if self.closed.load(Ordering::Acquire) => {
                tracing::debug!("Session closed while authenticating");
                Err(Mt5Error::SessionClosed)
            }
            Ok(token) => {
                *self.channel.write() = Some(channel);
                *self.token.write() = Some(token);
                *self.state.write() = ConnectionState::Connected;
                tracing::info!(
                    uri = %self.endpoint.uri(),
                    login = credentials.login(),
                    server = credentials.server(),
                    "Authenticated with terminal"
                );
                Ok(token)
            }
            Err(e) => {
                let state = if e.class() == ErrorClass::Permanent {
                    ConnectionState::TerminallyFailed
                } else {
                    ConnectionState::TransientlyFailed
                };
                self.drop_session(state);
                tracing::warn!(
                    login = credentials.login(),
                    state = state.as_str(),
                    error = %e,
                    "Authentication failed"
                );
                Err(e)
            }
        }
    }

    fn drop_session(&self, state: ConnectionState) {
        self.channel.write().take();
        self.token.write().take();
        *self.state.write() = state;
    }
}

#[async_trait]
impl<A: Authenticator> SessionHandle for GrpcSession<A> {
    async fn connect(&self, credentials: &Credentials) -> Result<SessionToken, Mt5Error> {
        *self.credentials.write() = Some(credentials.clone());
        self.closed.store(false, Ordering::Release);
        self.establish(credentials).await
    }

    async fn reconnect(&self) -> Result<(), Mt5Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Mt5Error::SessionClosed);
        }
        let credentials = self.credentials.read().clone().ok_or_else(|| {
            Mt5Error::InvalidConfig("reconnect requested before connect".to_string())
        })?;
        self.establish(&credentials).await.map(|_| ())
    }

    fn current_token(&self) -> Option<SessionToken> {
        *self.token.read()
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.credentials.write().take();
        self.drop_session(ConnectionState::Disconnected);
        tracing::debug!(uri = %self.endpoint.uri(), "Session closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct NeverCalled;

    #[async_trait]
    impl Authenticator for NeverCalled {
        async fn authenticate(
            &self,
            _channel: Channel,
            _credentials: &Credentials,
        ) -> Result<SessionToken, Mt5Error> {
            panic!("authenticate must not be reached without a channel");
        }
    }

    fn plaintext(url: &str) -> EndpointSettings {
        EndpointSettings {
            url: url.to_string(),
            connect_timeout: Duration::from_millis(500),
            use_tls: false,
            ..EndpointSettings::default()
        }
    }

    #[test]
    fn invalid_url_is_rejected() {
        let result = GrpcSession::new(&plaintext("not a uri"), NeverCalled);
        assert!(matches!(result, Err(Mt5Error::InvalidConfig(_))));
    }

    #[test]
    fn new_session_is_disconnected() {
        let session = GrpcSession::new(&plaintext("http://127.0.0.1:1"), NeverCalled).unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.current_token().is_none());
        assert!(matches!(session.channel(), Err(Mt5Error::NotConnected)));
    }

    #[tokio::test]
    async fn reconnect_before_connect_is_permanent() {
        let session = GrpcSession::new(&plaintext("http://127.0.0.1:1"), NeverCalled).unwrap();
        let err = session.reconnect().await.unwrap_err();
        assert!(matches!(err, Mt5Error::InvalidConfig(_)));
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let session = GrpcSession::new(&plaintext("http://127.0.0.1:1"), NeverCalled).unwrap();
        let credentials = Credentials::new(1, "pw", "srv").unwrap();

        let err = session.connect(&credentials).await.unwrap_err();

        assert!(matches!(err, Mt5Error::Transport(_)));
        assert_eq!(err.class(), ErrorClass::Reconnect);
        assert_eq!(session.state(), ConnectionState::TransientlyFailed);
    }

    #[tokio::test]
    async fn close_resets_state() {
        let session = GrpcSession::new(&plaintext("http://127.0.0.1:1"), NeverCalled).unwrap();
        let credentials = Credentials::new(1, "pw", "srv").unwrap();
        let _ = session.connect(&credentials).await;

        session.close().await;

        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_after_close_is_refused() {
        let session = GrpcSession::new(&plaintext("http://127.0.0.1:1"), NeverCalled).unwrap();
        let credentials = Credentials::new(1, "pw", "srv").unwrap();
        let _ = session.connect(&credentials).await;
        session.close().await;

        let err = session.reconnect().await.unwrap_err();

        assert!(matches!(err, Mt5Error::SessionClosed));
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
