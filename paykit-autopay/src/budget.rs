//! Bounded, cancellable execution window.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{AutoPayError, Result};

/// Time and cancellation budget for one payment flow, imposed by the caller
/// (e.g. the wake-up window of a push notification).
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    deadline: Instant,
    cancel: CancellationToken,
}

impl ExecutionBudget {
    /// Budget that expires `window` from now.
    pub fn new(window: Duration) -> Self {
        Self {
            deadline: Instant::now() + window,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to cancel the flow from outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail with `Cancelled` or `DeadlineExceeded` if the flow must stop.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AutoPayError::Cancelled);
        }
        if self.remaining().is_zero() {
            return Err(AutoPayError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves when the flow is cancelled or the deadline passes.
    pub async fn expired(&self) -> AutoPayError {
        tokio::select! {
            _ = self.cancel.cancelled() => AutoPayError::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => AutoPayError::DeadlineExceeded,
        }
    }
}
