//! Reconnecting Unary Executor
//!
//! Runs one logical unary call as a loop of attempts. Each attempt gets the
//! current session handle; a failure is classified and either surfaced,
//! retried after backoff, or retried after a (shared) session reconnect. The
//! whole loop is bounded by the caller's deadline, cancellation token, and the
//! retry budget, whichever fires first.

mod context;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

pub use context::{CallClass, CallContext};

use crate::application::ports::{ApiReply, SessionHandle};
use crate::error::Mt5Error;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics::{self, Outcome};
use crate::infrastructure::resilience::{ErrorClass, ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::session::SharedSession;

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Backoff schedule and retry budget per call.
    pub reconnect: ReconnectConfig,
    /// Deadline for `Trading` and `Default` calls without one.
    pub default_timeout: Duration,
    /// Deadline for `Query` calls without one.
    pub query_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            default_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(3),
        }
    }
}

impl ExecutorConfig {
    /// Build from the client configuration.
    #[must_use]
    pub const fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            reconnect: ReconnectConfig::from_retry_settings(&config.retry),
            default_timeout: config.timeouts.default_timeout,
            query_timeout: config.timeouts.query_timeout,
        }
    }
}

/// How an attempt loop iteration was interrupted.
enum Interrupt {
    Cancelled,
    Deadline,
}

/// Executes unary calls with retry and coalesced reconnect.
pub struct ReconnectingExecutor<S> {
    session: SharedSession<S>,
    config: ExecutorConfig,
}

impl<S> Clone for ReconnectingExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> std::fmt::Debug for ReconnectingExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingExecutor")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: SessionHandle> ReconnectingExecutor<S> {
    /// Create an executor over a shared session.
    #[must_use]
    pub const fn new(session: SharedSession<S>, config: ExecutorConfig) -> Self {
        Self { session, config }
    }

    /// The shared session this executor reconnects.
    #[must_use]
    pub const fn session(&self) -> &SharedSession<S> {
        &self.session
    }

    /// Deadline applied to a call of the given class without one.
    #[must_use]
    pub const fn default_timeout(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Query => self.config.query_timeout,
            CallClass::Trading | CallClass::Default => self.config.default_timeout,
        }
    }

    /// Execute a unary call, retrying transient failures.
    ///
    /// `call` performs exactly one attempt against the handle it is given.
    ///
    /// # Errors
    ///
    /// - the first permanent error, unchanged
    /// - `Cancelled` if the context's token fires
    /// - the last transient error (or `DeadlineExceeded`) once the deadline passes
    /// - `RetriesExhausted` once the retry budget is spent
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &CallContext,
        class: CallClass,
        mut call: F,
    ) -> Result<T, Mt5Error>
    where
        F: FnMut(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, Mt5Error>>,
    {
        let started = Instant::now();
        let deadline = ctx
            .deadline()
            .unwrap_or_else(|| started + self.default_timeout(class));
        let cancel = ctx.cancellation().cloned().unwrap_or_default();
        let budget = deadline.saturating_duration_since(started);

        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut last_error: Option<Mt5Error> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let epoch = self.session.epoch();

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Mt5Error::Cancelled),
                () = sleep_until(deadline) => return Err(deadline_error(last_error, budget)),
                result = call(self.session.handle()) => result,
            };

            let err = match result {
                Ok(value) => {
                    metrics::record_rpc_attempt(Outcome::Success);
                    if attempt > 1 {
                        tracing::debug!(attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            metrics::record_rpc_attempt(Outcome::Failure);

            let error_class = err.class();
            if !error_class.is_transient() {
                tracing::debug!(attempt, class = error_class.as_str(), error = %err, "Call failed");
                return Err(err);
            }

            let Some(delay) = policy.next_delay() else {
                tracing::warn!(attempt, error = %err, "Retry budget exhausted");
                return Err(Mt5Error::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            };

            tracing::warn!(
                attempt,
                class = error_class.as_str(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Transient call failure, retrying"
            );
            metrics::record_rpc_retry(error_class.as_str());
            last_error = Some(err);

            if let Some(interrupt) = wait(&cancel, deadline, sleep(delay)).await {
                return Err(interrupt.into_error(last_error, budget));
            }

            if error_class == ErrorClass::Reconnect {
                let reconnected = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Mt5Error::Cancelled),
                    () = sleep_until(deadline) => return Err(deadline_error(last_error, budget)),
                    result = self.session.reconnect_after(epoch) => result,
                };

                if let Err(e) = reconnected {
                    if e.class() == ErrorClass::Permanent {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }
    }

    /// Execute a unary call whose reply may carry an embedded API error.
    ///
    /// The embedded error is surfaced as [`Mt5Error::Api`] and classified like
    /// any other failure, so terminal-lookup codes trigger a reconnect.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_reply<T, F, Fut>(
        &self,
        ctx: &CallContext,
        class: CallClass,
        mut call: F,
    ) -> Result<T, Mt5Error>
    where
        T: ApiReply,
        F: FnMut(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, Mt5Error>>,
    {
        self.execute(ctx, class, |handle| {
            let attempt = call(handle);
            async move {
                let reply = attempt.await?;
                match reply.api_error() {
                    Some(e) => Err(e.into()),
                    None => Ok(reply),
                }
            }
        })
        .await
    }
}

impl Interrupt {
    fn into_error(self, last_error: Option<Mt5Error>, budget: Duration) -> Mt5Error {
        match self {
            Self::Cancelled => Mt5Error::Cancelled,
            Self::Deadline => deadline_error(last_error, budget),
        }
    }
}

/// Run `fut` unless cancellation or the deadline fires first.
async fn wait(
    cancel: &CancellationToken,
    deadline: Instant,
    fut: impl Future<Output = ()>,
) -> Option<Interrupt> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Some(Interrupt::Cancelled),
        () = sleep_until(deadline) => Some(Interrupt::Deadline),
        () = fut => None,
    }
}

fn deadline_error(last_error: Option<Mt5Error>, budget: Duration) -> Mt5Error {
    last_error.unwrap_or(Mt5Error::DeadlineExceeded(budget))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tonic::Code;

    use super::*;
    use crate::domain::connection::{ConnectionState, Credentials, SessionToken};
    use crate::error::ApiError;

    #[derive(Default)]
    struct StubSession {
        reconnects: AtomicU32,
    }

    #[async_trait]
    impl SessionHandle for StubSession {
        async fn connect(&self, _credentials: &Credentials) -> Result<SessionToken, Mt5Error> {
            Ok(SessionToken::random())
        }

        async fn reconnect(&self) -> Result<(), Mt5Error> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn current_token(&self) -> Option<SessionToken> {
            None
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        async fn close(&self) {}
    }

    fn executor() -> ReconnectingExecutor<StubSession> {
        let config = ExecutorConfig {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..ReconnectConfig::default()
            }
            .without_jitter(),
            ..ExecutorConfig::default()
        };
        ReconnectingExecutor::new(SharedSession::new(StubSession::default()), config)
    }

    struct Reply {
        error: Option<ApiError>,
    }

    impl ApiReply for Reply {
        fn api_error(&self) -> Option<ApiError> {
            self.error.clone()
        }
    }

    #[test]
    fn class_default_timeouts() {
        let executor = executor();
        assert_eq!(executor.default_timeout(CallClass::Query), Duration::from_secs(3));
        assert_eq!(executor.default_timeout(CallClass::Trading), Duration::from_secs(10));
        assert_eq!(executor.default_timeout(CallClass::Default), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retry_class_does_not_reconnect() {
        let executor = executor();
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(&CallContext::new(), CallClass::Default, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Mt5Error::Rpc {
                            code: Code::ResourceExhausted,
                            message: "busy".to_string(),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(executor.session().handle().reconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reconnect_class_reconnects_once_per_failure() {
        let executor = executor();
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(&CallContext::new(), CallClass::Default, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Mt5Error::Unavailable("reset".to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.session().handle().reconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn budget_exhaustion_wraps_last_cause() {
        let executor = ReconnectingExecutor::new(
            SharedSession::new(StubSession::default()),
            ExecutorConfig {
                reconnect: ReconnectConfig {
                    initial_delay: Duration::from_millis(1),
                    ..ReconnectConfig::default()
                }
                .without_jitter()
                .with_max_attempts(2),
                ..ExecutorConfig::default()
            },
        );

        let err = executor
            .execute(&CallContext::new(), CallClass::Default, |_| async {
                Err::<(), _>(Mt5Error::Rpc {
                    code: Code::Aborted,
                    message: "conflict".to_string(),
                })
            })
            .await
            .unwrap_err();

        match &err {
            Mt5Error::RetriesExhausted { attempts, source } => {
                assert_eq!(*attempts, 3);
                assert!(matches!(**source, Mt5Error::Rpc { code: Code::Aborted, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("reconnect failed after 3 attempts"));
    }

    #[tokio::test]
    async fn deadline_before_first_attempt_completes() {
        let executor = executor();
        let ctx = CallContext::new().with_timeout(Duration::from_millis(20));

        let err = executor
            .execute(&ctx, CallClass::Default, |_| async {
                std::future::pending::<Result<(), Mt5Error>>().await
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Mt5Error::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_immediately() {
        let executor = executor();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::new().with_cancellation(token);

        let err = executor
            .execute(&ctx, CallClass::Default, |_| async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, Mt5Error::Cancelled));
    }

    #[tokio::test]
    async fn embedded_api_error_is_permanent() {
        let executor = executor();
        let calls = AtomicU32::new(0);

        let err = executor
            .execute_reply(&CallContext::new(), CallClass::Trading, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Ok(Reply {
                        error: Some(ApiError::new("TRADE_RETCODE_INVALID_VOLUME", "bad volume")),
                    })
                }
            })
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Mt5Error::Api { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_lookup_error_triggers_reconnect() {
        let executor = executor();
        let calls = AtomicU32::new(0);

        let reply = executor
            .execute_reply(&CallContext::new(), CallClass::Query, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let error = (n == 0)
                        .then(|| ApiError::new("TERMINAL_INSTANCE_NOT_FOUND", "no terminal"));
                    Ok(Reply { error })
                }
            })
            .await;

        assert!(reply.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.session().handle().reconnects.load(Ordering::SeqCst), 1);
    }
}
