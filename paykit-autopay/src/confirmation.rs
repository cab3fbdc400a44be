//! Waiting for a sent payment to become visible.
//!
//! Polls a [`ConfirmationSource`] with bounded exponential backoff. Giving
//! up never fails the payment: the money may well have moved, only the
//! confirmation-linking step timed out.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::budget::ExecutionBudget;
use crate::executor::{ConfirmationSource, Receipt};

/// Exponential backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            multiplier: default_multiplier(),
        }
    }
}

impl BackoffConfig {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay before each attempt after the first: `initial`, then growing by
    /// `multiplier`, capped at `max_delay`. Yields `max_attempts` values.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let max = self.max_delay_ms as f64;
        let multiplier = self.multiplier.max(1.0);
        let mut next = (self.initial_delay_ms as f64).min(max);
        (0..self.max_attempts).map(move |_| {
            let current = next;
            next = (next * multiplier).min(max);
            Duration::from_millis(current as u64)
        })
    }
}

/// Result of waiting for a confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Confirmed { attempts: u32 },
    GaveUp { attempts: u32 },
}

impl ConfirmationStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// Poll `source` until `receipt` is confirmed, attempts run out, or the
/// budget is exhausted. Probe errors count as unconfirmed attempts.
pub async fn wait_for_confirmation(
    source: &dyn ConfirmationSource,
    receipt: &Receipt,
    config: &BackoffConfig,
    budget: &ExecutionBudget,
) -> ConfirmationStatus {
    let mut attempts = 0;
    let mut delays = config.delays();

    while attempts < config.max_attempts {
        attempts += 1;
        match source.is_confirmed(receipt).await {
            Ok(true) => {
                debug!(receipt_id = %receipt.receipt_id, attempts, "Payment confirmed");
                return ConfirmationStatus::Confirmed { attempts };
            }
            Ok(false) => {}
            Err(e) => {
                debug!(receipt_id = %receipt.receipt_id, error = %e, "Confirmation probe failed");
            }
        }

        if attempts == config.max_attempts {
            break;
        }
        let delay = delays
            .next()
            .unwrap_or(Duration::from_millis(config.max_delay_ms));
        if delay > budget.remaining() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = budget.cancellation_token().cancelled() => break,
        }
    }

    warn!(receipt_id = %receipt.receipt_id, attempts, "Gave up waiting for payment confirmation");
    ConfirmationStatus::GaveUp { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Direction, PaymentRequest};
    use crate::AutoPayError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ConfirmsAfter {
        after: u32,
        probes: AtomicU32,
        fail_first: bool,
    }

    #[async_trait]
    impl ConfirmationSource for ConfirmsAfter {
        async fn is_confirmed(&self, _receipt: &Receipt) -> crate::Result<bool> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_first && n == 1 {
                return Err(AutoPayError::DeadlineExceeded);
            }
            Ok(n >= self.after)
        }
    }

    fn receipt() -> Receipt {
        Receipt::for_request(&PaymentRequest::new(
            "pk:a",
            "pk:b",
            10,
            "onchain",
            Direction::Outgoing,
        ))
    }

    #[test]
    fn test_delays_double_and_cap() {
        let config = BackoffConfig::default();
        let delays: Vec<_> = config.delays().map(|d| d.as_millis()).collect();
        assert_eq!(delays, [1_000, 2_000, 4_000, 8_000, 10_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_on_third_attempt() {
        let source = ConfirmsAfter {
            after: 3,
            probes: AtomicU32::new(0),
            fail_first: true,
        };
        let budget = ExecutionBudget::new(Duration::from_secs(60));
        let start = tokio::time::Instant::now();

        let status =
            wait_for_confirmation(&source, &receipt(), &BackoffConfig::default(), &budget).await;
        assert_eq!(status, ConfirmationStatus::Confirmed { attempts: 3 });
        // Slept 1s then 2s between the three probes
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let source = ConfirmsAfter {
            after: u32::MAX,
            probes: AtomicU32::new(0),
            fail_first: false,
        };
        let budget = ExecutionBudget::new(Duration::from_secs(600));
        let config = BackoffConfig::default().with_max_attempts(4);

        let status = wait_for_confirmation(&source, &receipt(), &config, &budget).await;
        assert_eq!(status, ConfirmationStatus::GaveUp { attempts: 4 });
        assert_eq!(source.probes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_budget_is_short() {
        let source = ConfirmsAfter {
            after: u32::MAX,
            probes: AtomicU32::new(0),
            fail_first: false,
        };
        let budget = ExecutionBudget::new(Duration::from_millis(2_500));

        let status =
            wait_for_confirmation(&source, &receipt(), &BackoffConfig::default(), &budget).await;
        // 1s sleep fits, the following 2s sleep does not
        assert_eq!(status, ConfirmationStatus::GaveUp { attempts: 2 });
    }
}
