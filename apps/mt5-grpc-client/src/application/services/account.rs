//! Account facade.
//!
//! One `Mt5Account` per terminal account. It owns the shared session and
//! builds the executor and pump over it, so that every unary call and
//! subscription made through it shares one reconnect gate. Per-RPC wrappers
//! are one-liners on top of [`execute`](Mt5Account::execute) and
//! [`subscribe`](Mt5Account::subscribe).
//!
//! # Example
//!
//! ```ignore
//! let config = ClientConfig::from_env()?;
//! let session = GrpcSession::new(&config.endpoint, ConnectAuthenticator)?;
//! let account = Mt5Account::new(session, &config);
//! account.connect(&config.credentials).await?;
//!
//! let summary = account
//!     .execute_reply(&CallContext::new(), CallClass::Query, |session| async move {
//!         let token = session.current_token().ok_or(Mt5Error::NotConnected)?;
//!         let mut client = AccountHelperClient::new(session.channel()?);
//!         Ok(client.account_summary(token.request(AccountSummaryRequest {})).await?.into_inner())
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ApiReply, MessageStream, SessionHandle};
use crate::domain::connection::{ConnectionState, Credentials, SessionToken};
use crate::error::Mt5Error;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::executor::{
    CallClass, CallContext, ExecutorConfig, ReconnectingExecutor,
};
use crate::infrastructure::session::SharedSession;
use crate::infrastructure::stream::{PumpConfig, Subscription, SubscriptionPump};

/// Public surface for one terminal account.
///
/// Clones share the session and the shutdown signal: closing any clone ends
/// every subscription started through any of them.
pub struct Mt5Account<S> {
    session: SharedSession<S>,
    executor: ReconnectingExecutor<S>,
    pump: SubscriptionPump<S>,
    shutdown: Arc<Mutex<CancellationToken>>,
}

impl<S> Clone for Mt5Account<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            executor: self.executor.clone(),
            pump: self.pump.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<S> std::fmt::Debug for Mt5Account<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mt5Account")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<S: SessionHandle> Mt5Account<S> {
    /// Create an account over a session handle.
    pub fn new(handle: S, config: &ClientConfig) -> Self {
        Self::with_parts(
            SharedSession::new(handle),
            ExecutorConfig::from_client_config(config),
            PumpConfig::from_client_config(config),
        )
    }

    /// Create an account from explicit executor and pump settings.
    pub fn with_parts(
        session: SharedSession<S>,
        executor: ExecutorConfig,
        pump: PumpConfig,
    ) -> Self {
        Self {
            executor: ReconnectingExecutor::new(session.clone(), executor),
            pump: SubscriptionPump::new(session.clone(), pump),
            session,
            shutdown: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Authenticate and establish the session.
    ///
    /// # Errors
    ///
    /// Returns the session handle's connect error.
    pub async fn connect(&self, credentials: &Credentials) -> Result<SessionToken, Mt5Error> {
        {
            let mut shutdown = self.shutdown.lock();
            if shutdown.is_cancelled() {
                *shutdown = CancellationToken::new();
            }
        }
        self.session.connect(credentials).await
    }

    /// Run a unary call with retry and reconnect.
    ///
    /// # Errors
    ///
    /// See [`ReconnectingExecutor::execute`].
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &CallContext,
        class: CallClass,
        call: F,
    ) -> Result<T, Mt5Error>
    where
        F: FnMut(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, Mt5Error>>,
    {
        self.executor.execute(ctx, class, call).await
    }

    /// Run a unary call whose reply may embed an API error.
    ///
    /// # Errors
    ///
    /// See [`ReconnectingExecutor::execute_reply`].
    pub async fn execute_reply<T, F, Fut>(
        &self,
        ctx: &CallContext,
        class: CallClass,
        call: F,
    ) -> Result<T, Mt5Error>
    where
        T: ApiReply,
        F: FnMut(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, Mt5Error>>,
    {
        self.executor.execute_reply(ctx, class, call).await
    }

    /// Start a streaming subscription.
    ///
    /// The subscription ends when `cancel` fires or when the account is
    /// closed, whichever comes first.
    pub fn subscribe<T, M, F, Fut>(
        &self,
        cancel: Option<CancellationToken>,
        open: F,
    ) -> Subscription<T>
    where
        T: Send + 'static,
        M: MessageStream<T> + 'static,
        F: FnMut(Arc<S>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<M, Mt5Error>> + Send + 'static,
    {
        let token = self.shutdown.lock().child_token();
        if let Some(caller) = cancel {
            let linked = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = caller.cancelled() => linked.cancel(),
                    () = linked.cancelled() => {}
                }
            });
        }
        self.pump.subscribe(Some(token), open)
    }

    /// Connection state reported by the session handle.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Token of the live session.
    #[must_use]
    pub fn token(&self) -> Option<SessionToken> {
        self.session.token()
    }

    /// The shared session.
    #[must_use]
    pub const fn session(&self) -> &SharedSession<S> {
        &self.session
    }

    /// Close the session and end every running subscription.
    ///
    /// Subscriptions close without a terminal error. Unary calls in their
    /// retry loop fail with `SessionClosed` at their next reconnect.
    pub async fn close(&self) {
        self.shutdown.lock().cancel();
        self.session.close().await;
    }
}
