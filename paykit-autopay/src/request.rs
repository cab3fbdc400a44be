//! Payment requests as seen by the auto-pay engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AutoPayError, Result};

/// Direction of a payment request relative to this wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A peer asks this wallet to pay them.
    Incoming,
    /// This wallet initiates a payment to a peer.
    Outgoing,
}

/// Lifecycle status of a payment request.
///
/// Status is monotonic: `Declined`, `Expired` and `Paid` are terminal and
/// never reopened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
    Expired,
    Paid,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Expired | Self::Paid)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    ///
    /// `Accepted` may fall back to `Pending` when an execution attempt is
    /// rolled back and the request goes back to the user.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match (self, next) {
            (Pending, Accepted | Declined | Expired | Paid) => true,
            (Accepted, Pending | Paid | Declined | Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Paid => "paid",
        };
        f.write_str(s)
    }
}

/// A request to move funds between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: String,
    pub from_peer: String,
    pub to_peer: String,
    pub amount_sats: u64,
    pub method_id: String,
    pub direction: Direction,
    #[serde(default)]
    pub status: RequestStatus,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds; the request is expired strictly after this instant.
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PaymentRequest {
    /// Create a pending request with a generated id.
    pub fn new(
        from_peer: impl Into<String>,
        to_peer: impl Into<String>,
        amount_sats: u64,
        method_id: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            from_peer: from_peer.into(),
            to_peer: to_peer.into(),
            amount_sats,
            method_id: method_id.into(),
            direction,
            status: RequestStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            expires_at: None,
            description: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The peer that receives the money. Policy, limits and execution are
    /// all keyed by this peer.
    pub fn payee(&self) -> &str {
        match self.direction {
            Direction::Incoming => &self.from_peer,
            Direction::Outgoing => &self.to_peer,
        }
    }

    /// Returns true if `now` (unix seconds) is past the expiry.
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// Reject malformed requests before they reach the policy engine.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AutoPayError::validation("id", "request id cannot be empty"));
        }
        if self.from_peer.trim().is_empty() {
            return Err(AutoPayError::validation("from_peer", "peer id cannot be empty"));
        }
        if self.to_peer.trim().is_empty() {
            return Err(AutoPayError::validation("to_peer", "peer id cannot be empty"));
        }
        if self.from_peer == self.to_peer {
            return Err(AutoPayError::validation(
                "to_peer",
                "sender and recipient must differ",
            ));
        }
        if self.method_id.trim().is_empty() {
            return Err(AutoPayError::validation("method_id", "method cannot be empty"));
        }
        if self.amount_sats == 0 {
            return Err(AutoPayError::validation("amount_sats", "must be positive"));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= self.created_at {
                return Err(AutoPayError::validation(
                    "expires_at",
                    "must be after created_at",
                ));
            }
        }
        Ok(())
    }
}
