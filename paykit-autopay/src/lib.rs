//! # Paykit Auto-Pay
//!
//! Decides, without user interaction, whether an incoming payment request
//! may be paid, and pays it when it may.
//!
//! ## Components
//!
//! - [`PolicyEngine`]: evaluates ordered [`AutoPayRule`]s and global
//!   thresholds into a [`Decision`]
//! - [`LimitLedger`]: per-peer and global spending limits with
//!   reserve/commit/rollback and period resets
//! - [`RotationController`]: decides when a receiving endpoint must be
//!   rotated and keeps a bounded rotation history
//! - [`Orchestrator`]: sequences a payment through evaluation, reservation,
//!   execution and rotation inside an [`ExecutionBudget`]
//!
//! All state is persisted through a [`KeyValueStore`] under keys namespaced
//! by identity (see [`StoreKeys`]).
//!
//! ## Concurrency
//!
//! Reservations serialize per peer and then on the global scope, so two
//! concurrent requests can never both fit in a limit that only fits one.

pub mod budget;
pub mod config;
pub mod confirmation;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod ledger;
pub mod limits;
pub mod locks;
pub mod orchestrator;
pub mod policy;
pub mod request;
pub mod request_store;
pub mod rotation;
pub mod rules;
pub mod settings;
pub mod store;

pub use budget::ExecutionBudget;
pub use config::{AutoPayConfig, LedgerConfig, OrchestratorConfig};
pub use confirmation::{wait_for_confirmation, BackoffConfig, ConfirmationStatus};
pub use engine::AutoPayEngine;
pub use error::{AutoPayError, AutoPayErrorCode, Result};
pub use executor::{
    ConfirmationSource, EndpointPublisher, ExecutorError, ExecutorErrorKind, NewEndpoint,
    PaymentExecutor, Receipt,
};
pub use history::{AutoPayHistory, AutoPayHistoryEntry, AutoPayOutcome, BoundedHistory};
pub use ledger::{Clock, LimitLedger, Reservation, ReservationRecord, SpendingCheck};
pub use limits::{GlobalSpend, LimitScope, PeerLimit, SpendingPeriod};
pub use orchestrator::{
    Orchestrator, PaidPayment, PaymentFlow, PaymentOutcome, PaymentState,
};
pub use policy::{ApprovalReason, Decision, PolicyEngine};
pub use request::{Direction, PaymentRequest, RequestStatus};
pub use request_store::{RequestFilter, RequestStore};
pub use rotation::{
    MethodRotationSettings, RotationConfig, RotationController, RotationEvent, RotationPolicy,
    RotationReason,
};
pub use rules::{AutoPayRule, RuleAction};
pub use settings::{GlobalSettings, SettingsStore};
#[cfg(not(target_arch = "wasm32"))]
pub use store::FileStore;
pub use store::{CachedStore, KeyValueStore, MemoryStore, StoreError, StoreErrorCode, StoreKeys};
