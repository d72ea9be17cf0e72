//! Caller side of a subscription.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::{SubscriptionStats, SubscriptionTracker};
use crate::error::Mt5Error;

/// Control half of a subscription: cancellation, stats, and the pump task.
#[derive(Debug)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    tracker: Arc<SubscriptionTracker>,
}

impl SubscriptionHandle {
    pub(super) const fn new(
        cancel: CancellationToken,
        task: JoinHandle<()>,
        tracker: Arc<SubscriptionTracker>,
    ) -> Self {
        Self {
            cancel,
            task,
            tracker,
        }
    }

    /// Stop the subscription. Both channels close without an error.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Check whether the pump task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Current progress snapshot.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.tracker.snapshot()
    }

    /// Wait for the pump task to exit.
    ///
    /// # Errors
    ///
    /// Returns `StreamClosed` if the task panicked or was aborted.
    pub async fn closed(self) -> Result<(), Mt5Error> {
        self.task
            .await
            .map_err(|e| Mt5Error::StreamClosed(format!("subscription task failed: {e}")))
    }
}

/// A live server-streaming subscription.
///
/// Data and errors arrive on separate bounded channels. Exactly one of a
/// clean end, a single terminal error, or cancellation ends it; after that
/// both channels are closed.
#[derive(Debug)]
pub struct Subscription<T> {
    data: mpsc::Receiver<T>,
    errors: mpsc::Receiver<Mt5Error>,
    handle: SubscriptionHandle,
}

impl<T> Subscription<T> {
    pub(super) const fn new(
        data: mpsc::Receiver<T>,
        errors: mpsc::Receiver<Mt5Error>,
        handle: SubscriptionHandle,
    ) -> Self {
        Self {
            data,
            errors,
            handle,
        }
    }

    /// Data channel.
    pub const fn data(&mut self) -> &mut mpsc::Receiver<T> {
        &mut self.data
    }

    /// Error channel. Receives at most one terminal error.
    pub const fn errors(&mut self) -> &mut mpsc::Receiver<Mt5Error> {
        &mut self.errors
    }

    /// Next message, then the terminal error if any, then `None`.
    pub async fn next(&mut self) -> Option<Result<T, Mt5Error>> {
        if let Some(message) = self.data.recv().await {
            return Some(Ok(message));
        }
        self.errors.recv().await.map(Err)
    }

    /// Stop the subscription.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Current progress snapshot.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.handle.stats()
    }

    /// Stop consuming and wait for the pump task to exit.
    ///
    /// Dropping the receivers ends the pump at its next suspension point.
    ///
    /// # Errors
    ///
    /// Returns `StreamClosed` if the task panicked or was aborted.
    pub async fn closed(self) -> Result<(), Mt5Error> {
        let Self {
            data,
            errors,
            handle,
        } = self;
        drop(data);
        drop(errors);
        handle.closed().await
    }

    /// Split into the two receivers and the control handle.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<T>,
        mpsc::Receiver<Mt5Error>,
        SubscriptionHandle,
    ) {
        (self.data, self.errors, self.handle)
    }
}
