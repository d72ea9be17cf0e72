//! Single-flight reconnect gate.
//!
//! Every successful or failed reconnect advances the session epoch. A caller
//! records the epoch before an attempt and passes it back when asking for a
//! reconnect; if the epoch has moved on, someone already reconnected after the
//! caller's failure and the cached outcome is returned instead of reconnecting
//! again.
//!
//! The physical reconnect runs on its own task. Callers only wait for its
//! outcome, so a caller whose deadline or token fires stops waiting without
//! interrupting the reconnect the other callers depend on.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::application::ports::SessionHandle;
use crate::domain::connection::{ConnectionState, Credentials, SessionToken};
use crate::error::Mt5Error;
use crate::infrastructure::metrics::{self, Outcome};

type ReconnectOutcome = Result<(), Mt5Error>;

/// A session handle shared by every call and subscription of one account.
pub struct SharedSession<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    handle: Arc<S>,
    epoch: AtomicU64,
    closed: AtomicBool,
    flight: Mutex<Flight>,
}

#[derive(Default)]
struct Flight {
    /// Outcome of the most recent connect or reconnect.
    last: Option<ReconnectOutcome>,
    /// Outcome channel of the reconnect currently running.
    running: Option<watch::Receiver<Option<ReconnectOutcome>>>,
}

impl<S> Clone for SharedSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for SharedSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSession")
            .field("epoch", &self.inner.epoch.load(Ordering::Acquire))
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<S: SessionHandle> SharedSession<S> {
    /// Wrap a session handle.
    pub fn new(handle: S) -> Self {
        Self::from_arc(Arc::new(handle))
    }

    /// Wrap an already shared session handle.
    pub fn from_arc(handle: Arc<S>) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle,
                epoch: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                flight: Mutex::new(Flight::default()),
            }),
        }
    }

    /// The wrapped handle.
    #[must_use]
    pub fn handle(&self) -> Arc<S> {
        Arc::clone(&self.inner.handle)
    }

    /// Number of connects and reconnects performed so far.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    /// Check whether the owner closed the session.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Current connection state of the handle.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.handle.state()
    }

    /// Current session token of the handle.
    #[must_use]
    pub fn token(&self) -> Option<SessionToken> {
        self.inner.handle.current_token()
    }

    /// Establish the session. Re-opens a closed session.
    ///
    /// # Errors
    ///
    /// Returns the handle's connect error.
    pub async fn connect(&self, credentials: &Credentials) -> Result<SessionToken, Mt5Error> {
        self.inner.closed.store(false, Ordering::Release);
        let result = self.inner.handle.connect(credentials).await;
        metrics::record_reconnect(Outcome::of(&result));

        {
            let mut flight = self.inner.flight.lock();
            self.inner.epoch.fetch_add(1, Ordering::AcqRel);
            flight.last = Some(result.as_ref().map(|_| ()).map_err(Mt5Error::clone));
        }

        match &result {
            Ok(token) => tracing::info!(token = %token, "Session established"),
            Err(e) => tracing::warn!(error = %e, "Session connect failed"),
        }
        result
    }

    /// Reconnect unless a reconnect already completed after `observed_epoch`.
    ///
    /// Concurrent callers that observed the same epoch wait on one physical
    /// reconnect and all receive its outcome. Dropping this future only stops
    /// this caller's wait.
    ///
    /// # Errors
    ///
    /// Returns the reconnect error, either from this call or the coalesced
    /// one, and `SessionClosed` once the owner closed the session.
    pub async fn reconnect_after(&self, observed_epoch: u64) -> ReconnectOutcome {
        if self.is_closed() {
            return Err(Mt5Error::SessionClosed);
        }

        let mut outcome = {
            let mut flight = self.inner.flight.lock();

            let current = self.epoch();
            if current > observed_epoch {
                if let Some(outcome) = flight.last.clone() {
                    metrics::record_reconnect_coalesced();
                    tracing::debug!(observed_epoch, current, "Reconnect already performed");
                    return outcome;
                }
            }

            if let Some(running) = flight.running.clone() {
                metrics::record_reconnect_coalesced();
                running
            } else {
                let (tx, rx) = watch::channel(None);
                flight.running = Some(rx.clone());
                tokio::spawn(self.clone().run_reconnect(tx));
                rx
            }
        };

        match outcome.wait_for(Option::is_some).await {
            Ok(done) => (*done)
                .clone()
                .unwrap_or_else(|| Err(Mt5Error::NotConnected)),
            Err(_) => Err(Mt5Error::Transport(
                "reconnect task ended without an outcome".to_string(),
            )),
        }
    }

    /// Perform one physical reconnect and publish its outcome.
    async fn run_reconnect(self, tx: watch::Sender<Option<ReconnectOutcome>>) {
        tracing::info!(epoch = self.epoch(), "Reconnecting session");

        let mut result = AssertUnwindSafe(self.inner.handle.reconnect())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Mt5Error::Transport("session reconnect panicked".to_string())));

        if self.is_closed() {
            if result.is_ok() {
                self.inner.handle.close().await;
            }
            result = Err(Mt5Error::SessionClosed);
        }
        metrics::record_reconnect(Outcome::of(&result));

        let epoch = {
            let mut flight = self.inner.flight.lock();
            flight.last = Some(result.clone());
            flight.running = None;
            self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };
        tx.send_replace(Some(result.clone()));

        match &result {
            Ok(()) => tracing::info!(epoch, "Session reconnected"),
            Err(e) => tracing::warn!(epoch, error = %e, "Session reconnect failed"),
        }
    }

    /// Close the handle. Later reconnect requests fail with `SessionClosed`
    /// until the session is connected again.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.handle.close().await;
        tracing::info!(epoch = self.epoch(), "Session closed by owner");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct CountingSession {
        starts: AtomicU32,
        reconnects: AtomicU32,
        closes: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl SessionHandle for CountingSession {
        async fn connect(&self, _credentials: &Credentials) -> Result<SessionToken, Mt5Error> {
            Ok(SessionToken::random())
        }

        async fn reconnect(&self) -> Result<(), Mt5Error> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Mt5Error::Unavailable("down".to_string()))
            } else {
                Ok(())
            }
        }

        fn current_token(&self) -> Option<SessionToken> {
            None
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn connect_advances_epoch() {
        let session = SharedSession::new(CountingSession::default());
        let credentials = Credentials::new(1, "pw", "srv").unwrap();

        assert_eq!(session.epoch(), 0);
        session.connect(&credentials).await.unwrap();
        assert_eq!(session.epoch(), 1);
        assert!(format!("{session:?}").contains("epoch: 1"));
    }

    #[tokio::test]
    async fn concurrent_reconnects_share_one_attempt() {
        let session = SharedSession::new(CountingSession::default());
        let observed = session.epoch();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move { session.reconnect_after(observed).await }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(session.handle().reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(session.epoch(), observed + 1);
    }

    #[tokio::test]
    async fn fresh_epoch_reconnects_again() {
        let session = SharedSession::new(CountingSession::default());

        session.reconnect_after(0).await.unwrap();
        session.reconnect_after(1).await.unwrap();

        assert_eq!(session.handle().reconnects.load(Ordering::SeqCst), 2);
        assert_eq!(session.epoch(), 2);
    }

    #[tokio::test]
    async fn failed_reconnect_is_shared_and_advances_epoch() {
        let session = SharedSession::new(CountingSession {
            fail: true,
            ..CountingSession::default()
        });

        let first = session.reconnect_after(0).await;
        let coalesced = session.reconnect_after(0).await;

        assert!(matches!(first, Err(Mt5Error::Unavailable(_))));
        assert!(matches!(coalesced, Err(Mt5Error::Unavailable(_))));
        assert_eq!(session.handle().reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(session.epoch(), 1);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_abort_reconnect() {
        let session = SharedSession::new(CountingSession::default());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), session.reconnect_after(0)).await;
        assert!(abandoned.is_err());

        session.reconnect_after(0).await.unwrap();

        let handle = session.handle();
        assert_eq!(handle.starts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(session.epoch(), 1);
    }

    #[tokio::test]
    async fn closed_session_refuses_reconnect_until_connected() {
        let session = SharedSession::new(CountingSession::default());
        let credentials = Credentials::new(1, "pw", "srv").unwrap();
        session.connect(&credentials).await.unwrap();

        session.close().await;
        let refused = session.reconnect_after(session.epoch()).await;

        assert!(matches!(refused, Err(Mt5Error::SessionClosed)));
        assert_eq!(session.handle().starts.load(Ordering::SeqCst), 0);

        session.connect(&credentials).await.unwrap();
        assert!(session.reconnect_after(session.epoch()).await.is_ok());
    }

    #[tokio::test]
    async fn close_during_reconnect_keeps_session_closed() {
        let session = SharedSession::new(CountingSession::default());

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.reconnect_after(0).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.close().await;

        assert!(matches!(waiter.await.unwrap(), Err(Mt5Error::SessionClosed)));
        assert_eq!(session.handle().closes.load(Ordering::SeqCst), 2);
    }
}
