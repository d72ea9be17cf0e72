//! Subscription pump: one background task per subscription.
//!
//! The task is an explicit state machine:
//!
//! ```text
//! Opening ──ok──▶ Streaming ──transient──▶ Reconnecting ──▶ Opening
//!    │                │                         │
//!    └──permanent─────┴──end/permanent/cancel───┴──exhausted/cancel──▶ Closed
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::subscription::{Subscription, SubscriptionHandle};
use crate::application::ports::{MessageStream, SessionHandle};
use crate::domain::subscription::{PumpState, SubscriptionTracker};
use crate::error::Mt5Error;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::resilience::{ErrorClass, ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::session::SharedSession;

/// Pump settings.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Data channel capacity.
    pub data_capacity: usize,
    /// Error channel capacity.
    pub error_capacity: usize,
    /// Backoff schedule and retry budget per subscription.
    pub reconnect: ReconnectConfig,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            data_capacity: 100,
            error_capacity: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl PumpConfig {
    /// Build from the client configuration.
    #[must_use]
    pub const fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            data_capacity: config.stream.data_capacity,
            error_capacity: config.stream.error_capacity,
            reconnect: ReconnectConfig::from_retry_settings(&config.retry),
        }
    }
}

/// Starts subscriptions over a shared session.
pub struct SubscriptionPump<S> {
    session: SharedSession<S>,
    config: PumpConfig,
}

impl<S> Clone for SubscriptionPump<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> std::fmt::Debug for SubscriptionPump<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionPump")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: SessionHandle> SubscriptionPump<S> {
    /// Create a pump over a shared session.
    #[must_use]
    pub const fn new(session: SharedSession<S>, config: PumpConfig) -> Self {
        Self { session, config }
    }

    /// Start a subscription.
    ///
    /// `open` issues the streaming call against the handle it is given; it is
    /// called again for every resubscribe, so it should own (or clone) the
    /// request. Without a cancellation token the subscription runs until it
    /// is cancelled through the returned value, the stream ends, or recovery
    /// fails.
    ///
    /// Must be called from within a tokio runtime.
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
        let cancel = cancel.map_or_else(CancellationToken::new, |parent| parent.child_token());
        let (data_tx, data_rx) = mpsc::channel(self.config.data_capacity.max(1));
        let (error_tx, error_rx) = mpsc::channel(self.config.error_capacity.max(1));
        let tracker = Arc::new(SubscriptionTracker::new());

        let worker = PumpWorker {
            session: self.session.clone(),
            open,
            data_tx,
            error_tx,
            cancel: cancel.clone(),
            tracker: Arc::clone(&tracker),
            policy: ReconnectPolicy::new(self.config.reconnect.clone()),
        };

        let id = Uuid::new_v4();
        let task = tokio::spawn(
            worker
                .run()
                .instrument(tracing::info_span!("subscription", %id)),
        );

        Subscription::new(data_rx, error_rx, SubscriptionHandle::new(cancel, task, tracker))
    }
}

/// Pump state with the data each state owns.
enum Phase<M> {
    Opening,
    Streaming { stream: M, epoch: u64 },
    Reconnecting { cause: Mt5Error, epoch: u64 },
    Closed,
}

/// What woke the streaming loop.
enum Event<T> {
    Cancelled,
    Abandoned,
    Received(Result<Option<T>, Mt5Error>),
}

struct PumpWorker<S, T, F> {
    session: SharedSession<S>,
    open: F,
    data_tx: mpsc::Sender<T>,
    error_tx: mpsc::Sender<Mt5Error>,
    cancel: CancellationToken,
    tracker: Arc<SubscriptionTracker>,
    policy: ReconnectPolicy,
}

impl<S, T, F, Fut, M> PumpWorker<S, T, F>
where
    S: SessionHandle,
    T: Send + 'static,
    M: MessageStream<T> + 'static,
    F: FnMut(Arc<S>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<M, Mt5Error>> + Send + 'static,
{
    async fn run(mut self) {
        metrics::subscription_started();
        tracing::info!("Subscription started");

        let mut phase = Phase::Opening;
        loop {
            phase = match phase {
                Phase::Opening => self.open().await,
                Phase::Streaming { stream, epoch } => self.stream(stream, epoch).await,
                Phase::Reconnecting { cause, epoch } => self.recover(cause, epoch).await,
                Phase::Closed => break,
            };
        }

        self.tracker.set_state(PumpState::Closed);
        metrics::subscription_finished();
        let stats = self.tracker.snapshot();
        tracing::info!(
            messages = stats.messages_delivered,
            resubscribes = stats.resubscribes,
            "Subscription closed"
        );
    }

    /// Issue the streaming call.
    async fn open(&mut self) -> Phase<M> {
        self.tracker.set_state(PumpState::Opening);
        let epoch = self.session.epoch();
        let handle = self.session.handle();

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Phase::Closed,
            () = self.data_tx.closed() => return Phase::Closed,
            result = (self.open)(handle) => result,
        };

        match result {
            Ok(stream) => {
                tracing::debug!(epoch, "Stream opened");
                Phase::Streaming { stream, epoch }
            }
            Err(e) => self.on_failure(e, epoch),
        }
    }

    /// Forward messages until the stream ends, fails, or is abandoned.
    async fn stream(&mut self, mut stream: M, epoch: u64) -> Phase<M> {
        self.tracker.set_state(PumpState::Streaming);
        let mut first = true;

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Event::Cancelled,
                () = self.data_tx.closed() => Event::Abandoned,
                result = stream.next_message() => Event::Received(result),
            };

            match event {
                Event::Cancelled => {
                    tracing::debug!("Subscription cancelled");
                    stream.close().await;
                    return Phase::Closed;
                }
                Event::Abandoned => {
                    tracing::debug!("Subscriber dropped its receivers");
                    stream.close().await;
                    return Phase::Closed;
                }
                Event::Received(Ok(Some(message))) => {
                    if first {
                        self.policy.reset();
                        first = false;
                    }

                    let sent = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => false,
                        result = self.data_tx.send(message) => result.is_ok(),
                    };
                    if !sent {
                        stream.close().await;
                        return Phase::Closed;
                    }

                    self.tracker.record_message();
                    metrics::record_stream_message();
                }
                Event::Received(Ok(None)) => {
                    tracing::info!(epoch, "Stream ended by server");
                    stream.close().await;
                    return Phase::Closed;
                }
                Event::Received(Err(e)) => {
                    stream.close().await;
                    return self.on_failure(e, epoch);
                }
            }
        }
    }

    /// Back off, reconnect if needed, and go back to opening.
    async fn recover(&mut self, cause: Mt5Error, epoch: u64) -> Phase<M> {
        self.tracker.set_state(PumpState::Reconnecting);

        let Some(delay) = self.policy.next_delay() else {
            let attempts = self.policy.attempt_count();
            tracing::warn!(attempts, error = %cause, "Giving up on subscription");
            self.emit(Mt5Error::RetriesExhausted {
                attempts,
                source: Box::new(cause),
            });
            return Phase::Closed;
        };

        tracing::warn!(
            attempt = self.policy.attempt_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %cause,
            "Stream interrupted, resubscribing"
        );

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Phase::Closed,
            () = self.data_tx.closed() => return Phase::Closed,
            () = sleep(delay) => {}
        }

        if cause.class() == ErrorClass::Reconnect {
            let reconnected = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Phase::Closed,
                () = self.data_tx.closed() => return Phase::Closed,
                result = self.session.reconnect_after(epoch) => result,
            };

            if let Err(e) = reconnected {
                if e.class() == ErrorClass::Permanent {
                    self.emit(e);
                    return Phase::Closed;
                }
                return Phase::Reconnecting {
                    cause: e,
                    epoch: self.session.epoch(),
                };
            }
        }

        self.tracker.record_resubscribe();
        metrics::record_resubscribe();
        Phase::Opening
    }

    /// Route a failure from opening or streaming.
    fn on_failure(&self, error: Mt5Error, epoch: u64) -> Phase<M> {
        match error.class() {
            ErrorClass::Retry | ErrorClass::Reconnect => Phase::Reconnecting {
                cause: error,
                epoch,
            },
            ErrorClass::Cancelled => Phase::Closed,
            ErrorClass::Permanent => {
                tracing::warn!(error = %error, "Subscription failed");
                self.emit(error);
                Phase::Closed
            }
        }
    }

    /// Send the single terminal error.
    fn emit(&self, error: Mt5Error) {
        if let Err(e) = self.error_tx.try_send(error) {
            tracing::debug!(error = %e, "Terminal error not delivered");
        }
    }
}
