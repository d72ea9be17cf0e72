//! Shared fakes for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mt5_grpc_client::{
    ConnectionState, Credentials, ExecutorConfig, Mt5Error, PumpConfig, ReconnectConfig,
    SessionHandle, SessionToken,
};
use parking_lot::RwLock;
use tokio::time::Instant;

/// In-memory session handle with observable reconnects.
#[derive(Default)]
pub struct FakeSession {
    reconnect_starts: AtomicU32,
    reconnects: AtomicU32,
    reconnect_delay: Duration,
    fail_reconnect: bool,
    reconnected_at: RwLock<Option<Instant>>,
    token: RwLock<Option<SessionToken>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnects take `delay` before completing.
    pub fn with_reconnect_delay(delay: Duration) -> Self {
        Self {
            reconnect_delay: delay,
            ..Self::default()
        }
    }

    /// Every reconnect fails with `Unavailable`.
    pub fn failing() -> Self {
        Self {
            fail_reconnect: true,
            ..Self::default()
        }
    }

    /// Physical reconnects begun, finished or not.
    pub fn reconnect_starts(&self) -> u32 {
        self.reconnect_starts.load(Ordering::SeqCst)
    }

    /// Physical reconnects finished.
    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// When the most recent successful reconnect finished.
    pub fn reconnected_at(&self) -> Option<Instant> {
        *self.reconnected_at.read()
    }
}

#[async_trait]
impl SessionHandle for FakeSession {
    async fn connect(&self, _credentials: &Credentials) -> Result<SessionToken, Mt5Error> {
        let token = SessionToken::random();
        *self.token.write() = Some(token);
        Ok(token)
    }

    async fn reconnect(&self) -> Result<(), Mt5Error> {
        self.reconnect_starts.fetch_add(1, Ordering::SeqCst);
        if !self.reconnect_delay.is_zero() {
            tokio::time::sleep(self.reconnect_delay).await;
        }
        self.reconnects.fetch_add(1, Ordering::SeqCst);

        if self.fail_reconnect {
            return Err(Mt5Error::Unavailable("gateway unreachable".to_string()));
        }

        *self.token.write() = Some(SessionToken::random());
        *self.reconnected_at.write() = Some(Instant::now());
        Ok(())
    }

    fn current_token(&self) -> Option<SessionToken> {
        *self.token.read()
    }

    fn state(&self) -> ConnectionState {
        if self.token.read().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn close(&self) {
        self.token.write().take();
    }
}

/// Backoff that keeps tests fast and deterministic.
pub fn fast_backoff() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        ..ReconnectConfig::default()
    }
    .without_jitter()
}

pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        reconnect: fast_backoff(),
        ..ExecutorConfig::default()
    }
}

pub fn fast_pump_config() -> PumpConfig {
    PumpConfig {
        reconnect: fast_backoff(),
        ..PumpConfig::default()
    }
}

pub fn unavailable() -> Mt5Error {
    Mt5Error::Unavailable("connection reset by peer".to_string())
}
