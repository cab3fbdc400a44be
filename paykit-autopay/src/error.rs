//! Error types for auto-pay operations.
//!
//! Every failure the decision, ledger and rotation paths can produce is a
//! variant of [`AutoPayError`]. Callers that cross an FFI boundary should
//! use [`AutoPayError::code`] rather than matching on display strings.

use crate::executor::ExecutorError;
use crate::limits::LimitScope;
use crate::store::StoreError;

/// Error codes for FFI and mobile integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AutoPayErrorCode {
    /// Malformed request or argument
    Validation = 1000,
    /// Spending limit would be exceeded
    LimitExceeded = 2000,
    /// Payment executor failed
    Executor = 3000,
    /// Durable store unavailable or failed
    Persistence = 4000,
    /// Serialization error
    Serialization = 4001,
    /// Request is past its deadline
    Expired = 5000,
    /// Resource not found
    NotFound = 6000,
    /// Reservation token unknown or already settled
    ReservationNotFound = 6001,
    /// Rollback could not complete, ledger needs reconciliation
    RollbackFailed = 7000,
    /// Illegal state transition
    InvalidTransition = 8000,
    /// Cancelled by the caller
    Cancelled = 9000,
    /// Execution window elapsed
    DeadlineExceeded = 9001,
}

/// Comprehensive error type for auto-pay operations.
#[derive(Debug, thiserror::Error)]
pub enum AutoPayError {
    /// Malformed request, rejected before evaluation.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A reservation was refused because it would cross a spending limit.
    #[error("{scope} limit exceeded: requested {requested_sats} sats, {remaining_sats} sats remaining")]
    LimitExceeded {
        /// Which counter refused the reservation
        scope: LimitScope,
        /// Amount asked for
        requested_sats: u64,
        /// Headroom left in the refusing scope
        remaining_sats: u64,
    },

    /// The payment executor reported a failure.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The durable store failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// Stored bytes could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The request expired before it could be handled.
    #[error("request {request_id} expired at {expired_at}")]
    Expired {
        /// Request identifier
        request_id: String,
        /// Expiration timestamp (unix epoch seconds)
        expired_at: i64,
    },

    /// Resource not found.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Type of resource (e.g. "request", "rule")
        resource: String,
        /// Identifier that was looked up
        id: String,
    },

    /// The reservation token is unknown or was already settled.
    #[error("reservation not found: {0}")]
    ReservationNotFound(String),

    /// A rollback did not complete; the reservation is still journaled and
    /// must be reconciled.
    #[error("rollback of reservation {reservation_id} failed: {reason}")]
    RollbackFailed {
        /// Reservation that could not be reversed
        reservation_id: String,
        /// Underlying failure
        reason: String,
    },

    /// A state machine refused a transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// The caller cancelled the flow.
    #[error("operation cancelled")]
    Cancelled,

    /// The execution window elapsed.
    #[error("execution window elapsed")]
    DeadlineExceeded,
}

impl AutoPayError {
    /// Get the error code for FFI/mobile integration.
    pub fn code(&self) -> AutoPayErrorCode {
        match self {
            Self::Validation { .. } => AutoPayErrorCode::Validation,
            Self::LimitExceeded { .. } => AutoPayErrorCode::LimitExceeded,
            Self::Executor(_) => AutoPayErrorCode::Executor,
            Self::Persistence(_) => AutoPayErrorCode::Persistence,
            Self::Serialization(_) => AutoPayErrorCode::Serialization,
            Self::Expired { .. } => AutoPayErrorCode::Expired,
            Self::NotFound { .. } => AutoPayErrorCode::NotFound,
            Self::ReservationNotFound(_) => AutoPayErrorCode::ReservationNotFound,
            Self::RollbackFailed { .. } => AutoPayErrorCode::RollbackFailed,
            Self::InvalidTransition { .. } => AutoPayErrorCode::InvalidTransition,
            Self::Cancelled => AutoPayErrorCode::Cancelled,
            Self::DeadlineExceeded => AutoPayErrorCode::DeadlineExceeded,
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Executor(e) => e.is_retryable(),
            Self::Persistence(_) | Self::Cancelled | Self::DeadlineExceeded => true,
            _ => false,
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create an invalid transition error from any two displayable states.
    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        Self::InvalidTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }
}

impl From<serde_json::Error> for AutoPayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Common result alias for auto-pay operations.
pub type Result<T> = std::result::Result<T, AutoPayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorErrorKind;

    #[test]
    fn test_error_codes() {
        let err = AutoPayError::LimitExceeded {
            scope: LimitScope::Peer,
            requested_sats: 500,
            remaining_sats: 100,
        };
        assert_eq!(err.code(), AutoPayErrorCode::LimitExceeded);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("peer limit exceeded"));
    }

    #[test]
    fn test_executor_retryability_passes_through() {
        let retryable: AutoPayError = ExecutorError::new(ExecutorErrorKind::Network, "reset").into();
        assert!(retryable.is_retryable());

        let terminal: AutoPayError =
            ExecutorError::new(ExecutorErrorKind::Rejected, "no route").into();
        assert!(!terminal.is_retryable());
        assert_eq!(terminal.code(), AutoPayErrorCode::Executor);
    }

    #[test]
    fn test_helper_constructors() {
        let err = AutoPayError::validation("amount_sats", "must be positive");
        assert_eq!(err.code(), AutoPayErrorCode::Validation);
        assert_eq!(err.to_string(), "invalid amount_sats: must be positive");

        let err = AutoPayError::not_found("request", "req_1");
        assert_eq!(err.code(), AutoPayErrorCode::NotFound);
    }
}
