//! Reconnect Backoff
//!
//! Exponential backoff with symmetric jitter. One policy instance is owned by
//! each unary call or subscription; it is never shared.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::RetrySettings;

/// Backoff schedule and retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor applied after each retry.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(3),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 8,
        }
    }
}

impl ReconnectConfig {
    /// Build from loaded retry settings.
    #[must_use]
    pub const fn from_retry_settings(settings: &RetrySettings) -> Self {
        Self {
            initial_delay: settings.delay_initial,
            max_delay: settings.delay_max,
            multiplier: settings.delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_attempts,
        }
    }

    /// Same schedule without jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Same schedule with a different retry budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Stateful backoff iterator for one call or subscription.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy at attempt zero.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next retry, or `None` once the budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let base = self.base_delay(self.attempt_count);
        self.attempt_count = self.attempt_count.saturating_add(1);
        Some(self.apply_jitter(base))
    }

    /// Start over after a success.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Retries consumed so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Un-jittered delay for a given attempt index, capped at `max_delay`.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let initial_ms = self.config.initial_delay.as_millis() as f64;
        let scaled = initial_ms * self.config.multiplier.powi(exponent);

        #[allow(clippy::cast_precision_loss)]
        let max_ms = self.config.max_delay.as_millis() as f64;
        let capped = if scaled.is_finite() { scaled.min(max_ms) } else { max_ms };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped.max(0.0) as u64)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_ms = delay.as_millis() as f64;
        let spread = base_ms * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-spread..=spread);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis((base_ms + jitter).max(1.0) as u64)
    }
}
