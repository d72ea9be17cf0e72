//! Metrics Module
//!
//! Records execution-core metrics through the `metrics` facade. The
//! embedding application installs whichever recorder/exporter it uses;
//! without one, every call here is a no-op.
//!
//! # Metrics Categories
//!
//! - **RPC**: attempts by outcome, retries by error class
//! - **Session**: physical reconnects by outcome, coalesced waiters
//! - **Streams**: delivered messages, resubscribes, active subscriptions

use metrics::{counter, describe_counter, describe_gauge, gauge};

// =============================================================================
// Metric Registration
// =============================================================================

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        "mt5_client_rpc_attempts_total",
        "Unary RPC attempts by outcome"
    );
    describe_counter!(
        "mt5_client_rpc_retries_total",
        "Unary RPC retries by error class"
    );
    describe_counter!(
        "mt5_client_reconnects_total",
        "Physical session reconnects by outcome"
    );
    describe_counter!(
        "mt5_client_reconnects_coalesced_total",
        "Reconnect requests satisfied by another caller's reconnect"
    );
    describe_counter!(
        "mt5_client_stream_messages_total",
        "Messages delivered to subscription data channels"
    );
    describe_counter!(
        "mt5_client_stream_resubscribes_total",
        "Streams re-opened after a transient failure"
    );
    describe_gauge!(
        "mt5_client_subscriptions_active",
        "Subscriptions with a running pump task"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for attempts and reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Call or reconnect succeeded.
    Success,
    /// Call or reconnect failed.
    Failure,
}

impl Outcome {
    /// Metric label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Outcome of a result.
    #[must_use]
    pub const fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Record a unary attempt.
pub fn record_rpc_attempt(outcome: Outcome) {
    counter!("mt5_client_rpc_attempts_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a unary retry.
pub fn record_rpc_retry(class: &'static str) {
    counter!("mt5_client_rpc_retries_total", "class" => class).increment(1);
}

/// Record a physical reconnect.
pub fn record_reconnect(outcome: Outcome) {
    counter!("mt5_client_reconnects_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a reconnect request answered by an earlier reconnect.
pub fn record_reconnect_coalesced() {
    counter!("mt5_client_reconnects_coalesced_total").increment(1);
}

/// Record a message delivered to a subscriber.
pub fn record_stream_message() {
    counter!("mt5_client_stream_messages_total").increment(1);
}

/// Record a stream re-open.
pub fn record_resubscribe() {
    counter!("mt5_client_stream_resubscribes_total").increment(1);
}

/// Track a pump task starting.
pub fn subscription_started() {
    gauge!("mt5_client_subscriptions_active").increment(1.0);
}

/// Track a pump task ending.
pub fn subscription_finished() {
    gauge!("mt5_client_subscriptions_active").decrement(1.0);
}
