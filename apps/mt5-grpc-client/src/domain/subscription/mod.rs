//! Subscription Lifecycle Types
//!
//! State of a streaming subscription's background task and the counters it
//! exposes to the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// State of a subscription's pump task.
///
/// Transitions: `Opening -> Streaming -> Reconnecting -> Opening ... -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PumpState {
    /// Issuing the streaming call.
    #[default]
    Opening,
    /// Forwarding messages from the server.
    Streaming,
    /// Waiting out backoff and re-establishing the session.
    Reconnecting,
    /// Channels closed; the task has finished or is about to.
    Closed,
}

impl PumpState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// Check if the subscription has ended.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Snapshot of a subscription's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Current pump state.
    pub state: PumpState,
    /// Messages handed to the data channel.
    pub messages_delivered: u64,
    /// Times the stream was re-opened after a failure.
    pub resubscribes: u64,
}

/// Live counters shared between the pump task and the subscription owner.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    state: RwLock<PumpState>,
    messages_delivered: AtomicU64,
    resubscribes: AtomicU64,
}

impl SubscriptionTracker {
    /// Create a tracker in the `Opening` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state transition.
    pub fn set_state(&self, state: PumpState) {
        *self.state.write() = state;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PumpState {
        *self.state.read()
    }

    /// Count a delivered message.
    pub fn record_message(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a resubscription.
    pub fn record_resubscribe(&self) {
        self.resubscribes.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SubscriptionStats {
        SubscriptionStats {
            state: self.state(),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            resubscribes: self.resubscribes.load(Ordering::Relaxed),
        }
    }
}
