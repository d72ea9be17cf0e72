//! Per-call context: cancellation and deadline.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Kind of call, selecting the default deadline when the caller sets none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallClass {
    /// Lightweight reads (symbol info, quotes, account summary).
    Query,
    /// Order placement and modification.
    Trading,
    /// Anything else.
    #[default]
    Default,
}

/// Cancellation and deadline for one logical call.
///
/// Both are optional. Without a deadline the executor applies the class
/// default; without a token the call can only end by completing or timing out.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Context with no cancellation and the class-default deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The caller's deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The caller's cancellation token, if any.
    #[must_use]
    pub const fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }
}
