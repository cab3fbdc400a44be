//! External collaborator traits.
//!
//! The engine never moves money or generates endpoints itself. A wallet
//! plugs in:
//!
//! - [`PaymentExecutor`]: sends the payment (Lightning, on-chain, ...)
//! - [`EndpointPublisher`]: generates and publishes a fresh endpoint
//! - [`ConfirmationSource`]: reports whether a sent payment is visible
//!
//! # Example
//!
//! ```ignore
//! struct MyWallet { /* ... */ }
//!
//! #[async_trait]
//! impl PaymentExecutor for MyWallet {
//!     async fn pay(
//!         &self,
//!         request: &PaymentRequest,
//!         timeout: Duration,
//!     ) -> Result<Receipt, ExecutorError> {
//!         // Your wallet implementation
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::PaymentRequest;

/// Category of executor failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorErrorKind {
    /// The executor did not answer in time.
    Timeout,
    /// Transport failure talking to the node or backend.
    Network,
    /// The payment was refused (no route, insufficient funds, ...).
    Rejected,
    /// The request cannot be paid as described.
    Invalid,
}

impl fmt::Display for ExecutorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Rejected => "rejected",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Error reported by a [`PaymentExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payment executor {kind} error: {message}")]
pub struct ExecutorError {
    pub kind: ExecutorErrorKind,
    pub message: String,
}

impl ExecutorError {
    pub fn new(kind: ExecutorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Network, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Rejected, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Invalid, message)
    }

    /// Timeouts and network errors may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ExecutorErrorKind::Timeout | ExecutorErrorKind::Network
        )
    }
}

/// Proof that a payment was sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub request_id: String,
    pub method_id: String,
    pub amount_sats: u64,
    pub fee_sats: Option<u64>,
    /// Method-specific proof (preimage, txid).
    pub proof: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl Receipt {
    /// Receipt for `request` stamped now.
    pub fn for_request(request: &PaymentRequest) -> Self {
        Self {
            receipt_id: format!("rcpt_{}", uuid::Uuid::new_v4().simple()),
            request_id: request.id.clone(),
            method_id: request.method_id.clone(),
            amount_sats: request.amount_sats,
            fee_sats: None,
            proof: None,
            executed_at: Utc::now(),
        }
    }

    pub fn with_fee(mut self, fee_sats: u64) -> Self {
        self.fee_sats = Some(fee_sats);
        self
    }

    pub fn with_proof(mut self, proof: impl Into<String>) -> Self {
        self.proof = Some(proof.into());
        self
    }
}

/// Sends payments.
#[async_trait]
pub trait PaymentExecutor: Send + Sync {
    /// Pay `request`, giving up after `timeout`.
    async fn pay(
        &self,
        request: &PaymentRequest,
        timeout: Duration,
    ) -> Result<Receipt, ExecutorError>;
}

/// A freshly published payment endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEndpoint {
    pub method_id: String,
    /// Address, invoice or other method-specific endpoint data.
    pub endpoint: String,
}

/// Generates and publishes replacement endpoints.
#[async_trait]
pub trait EndpointPublisher: Send + Sync {
    async fn rotate(&self, method_id: &str) -> crate::Result<NewEndpoint>;
}

/// Reports whether a sent payment has become visible (e.g. a funding
/// transaction reached the mempool).
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    async fn is_confirmed(&self, receipt: &Receipt) -> crate::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Direction;

    #[test]
    fn test_retryability() {
        assert!(ExecutorError::timeout("slow").is_retryable());
        assert!(ExecutorError::network("reset").is_retryable());
        assert!(!ExecutorError::rejected("no route").is_retryable());
        assert!(!ExecutorError::invalid("bad invoice").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = ExecutorError::rejected("no route");
        assert_eq!(err.to_string(), "payment executor rejected error: no route");
    }

    #[test]
    fn test_receipt_for_request() {
        let request =
            PaymentRequest::new("pk:a", "pk:b", 42, "lightning", Direction::Outgoing);
        let receipt = Receipt::for_request(&request).with_fee(1).with_proof("preimage");
        assert_eq!(receipt.request_id, request.id);
        assert_eq!(receipt.amount_sats, 42);
        assert_eq!(receipt.fee_sats, Some(1));
    }
}
