//! Payment orchestration.
//!
//! Sequences evaluation, reservation, execution, commit or rollback, and
//! endpoint rotation for one payment request:
//!
//! ```text
//! Received ─► Evaluating ─┬─► Approved ─► Reserving ─► Executing ─┬─► Committed
//!    │                    │                  │                    └─► RolledBack
//!    ▼                    ├─► Denied         ▼
//! Expired                 └─► RequiresApproval ─┬─► UserApproved ─► Reserving ...
//!                                               └─► UserDeclined
//! ```
//!
//! The whole flow runs inside an [`ExecutionBudget`]. If the budget is
//! cancelled or runs out while the executor is in flight, the reservation is
//! rolled back before control returns.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::budget::ExecutionBudget;
use crate::confirmation::{wait_for_confirmation, BackoffConfig, ConfirmationStatus};
use crate::config::OrchestratorConfig;
use crate::engine::AutoPayEngine;
use crate::executor::{
    ConfirmationSource, EndpointPublisher, ExecutorError, NewEndpoint, PaymentExecutor, Receipt,
};
use crate::history::{AutoPayHistory, AutoPayHistoryEntry, AutoPayOutcome};
use crate::ledger::LimitLedger;
use crate::policy::{ApprovalReason, Decision, PolicyEngine};
use crate::request::{PaymentRequest, RequestStatus};
use crate::request_store::RequestStore;
use crate::rotation::RotationController;
use crate::settings::SettingsStore;
use crate::{AutoPayError, Result};

/// States of a single payment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Received,
    Evaluating,
    Approved,
    RequiresApproval,
    UserApproved,
    UserDeclined,
    Denied,
    Reserving,
    Executing,
    Committed,
    RolledBack,
    Expired,
}

impl PaymentState {
    /// Terminal from the engine's point of view. A rolled-back payment may
    /// still be retried through user approval.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::Denied | Self::UserDeclined | Self::Expired | Self::RolledBack
        )
    }

    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        use PaymentState::*;
        matches!(
            (self, next),
            (Received, Evaluating | Expired)
                | (Evaluating, Approved | Denied | RequiresApproval)
                | (Approved, Reserving)
                | (Reserving, Executing | RequiresApproval)
                | (RequiresApproval, UserApproved | UserDeclined | Expired)
                | (UserApproved, Reserving)
                | (Executing, Committed | RolledBack)
                | (RolledBack, UserApproved)
        )
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State machine for one request, rejecting illegal transitions.
#[derive(Debug, Clone)]
pub struct PaymentFlow {
    request_id: String,
    state: PaymentState,
    trail: Vec<PaymentState>,
}

impl PaymentFlow {
    /// A flow for a newly received request.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self::starting_at(request_id, PaymentState::Received)
    }

    /// A flow resumed for a request waiting on the user.
    pub fn awaiting_approval(request_id: impl Into<String>) -> Self {
        Self::starting_at(request_id, PaymentState::RequiresApproval)
    }

    fn starting_at(request_id: impl Into<String>, state: PaymentState) -> Self {
        Self {
            request_id: request_id.into(),
            state,
            trail: vec![state],
        }
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    /// Every state visited, in order.
    pub fn trail(&self) -> &[PaymentState] {
        &self.trail
    }

    pub fn advance(&mut self, next: PaymentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AutoPayError::invalid_transition(self.state, next));
        }
        debug!(request_id = %self.request_id, from = %self.state, to = %next, "Payment flow transition");
        self.state = next;
        self.trail.push(next);
        Ok(())
    }
}

/// A payment that went out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaidPayment {
    pub receipt: Receipt,
    /// Endpoint published because this payment made rotation due.
    pub rotated_endpoint: Option<NewEndpoint>,
    /// Outcome of the confirmation wait, if a source is configured.
    pub confirmation: Option<ConfirmationStatus>,
}

/// How a request ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid(PaidPayment),
    Denied { rule_id: String },
    RequiresApproval { reason: ApprovalReason },
    Declined,
    Expired,
}

impl PaymentOutcome {
    /// Flow state this outcome corresponds to.
    pub fn final_state(&self) -> PaymentState {
        match self {
            Self::Paid(_) => PaymentState::Committed,
            Self::Denied { .. } => PaymentState::Denied,
            Self::RequiresApproval { .. } => PaymentState::RequiresApproval,
            Self::Declined => PaymentState::UserDeclined,
            Self::Expired => PaymentState::Expired,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Approval {
    /// `tracked` is false when the request could not be stored.
    Automatic { tracked: bool },
    User,
}

/// Drives payment requests through policy, ledger, executor and rotation.
pub struct Orchestrator {
    settings: Arc<SettingsStore>,
    ledger: Arc<LimitLedger>,
    rotation: Arc<RotationController>,
    requests: Arc<RequestStore>,
    history: Arc<AutoPayHistory>,
    executor: Arc<dyn PaymentExecutor>,
    publisher: Arc<dyn EndpointPublisher>,
    confirmations: Option<Arc<dyn ConfirmationSource>>,
    config: OrchestratorConfig,
    backoff: BackoffConfig,
}

impl Orchestrator {
    /// Build an orchestrator over `engine`'s state with the given
    /// collaborators.
    pub fn new(
        engine: &AutoPayEngine,
        executor: Arc<dyn PaymentExecutor>,
        publisher: Arc<dyn EndpointPublisher>,
    ) -> Self {
        Self {
            settings: engine.settings().clone(),
            ledger: engine.ledger().clone(),
            rotation: engine.rotation().clone(),
            requests: engine.requests().clone(),
            history: engine.history().clone(),
            executor,
            publisher,
            confirmations: None,
            config: engine.config().orchestrator.clone(),
            backoff: engine.config().confirmation.clone(),
        }
    }

    /// Wait for confirmation of each paid request using `source`.
    pub fn with_confirmations(mut self, source: Arc<dyn ConfirmationSource>) -> Self {
        self.confirmations = Some(source);
        self
    }

    /// Default budget from the configured execution window.
    pub fn default_budget(&self) -> ExecutionBudget {
        ExecutionBudget::new(self.config.execution_window())
    }

    /// Handle a newly received request automatically.
    ///
    /// A reservation that fails after policy approval (limits exhausted in
    /// the meantime, or the ledger unavailable) hands the request to the
    /// user instead of failing.
    #[tracing::instrument(
        skip(self, request, budget),
        fields(request_id = %request.id, amount_sats = request.amount_sats)
    )]
    pub async fn process(
        &self,
        request: PaymentRequest,
        budget: ExecutionBudget,
    ) -> Result<PaymentOutcome> {
        request.validate()?;
        let tracked = self.register(&request).await?;

        let mut flow = PaymentFlow::new(&request.id);
        if request.is_expired_at(Utc::now().timestamp()) {
            return self.expire(&request, &mut flow).await;
        }

        flow.advance(PaymentState::Evaluating)?;
        let settings = self.settings.load_or_default().await;
        let decision = PolicyEngine::new(settings).evaluate(&request);

        match decision {
            Decision::Denied { rule_id } => {
                flow.advance(PaymentState::Denied)?;
                self.settle_pending(&request.id, RequestStatus::Declined).await;
                self.record(&request, AutoPayOutcome::Denied, Some(rule_id.clone()))
                    .await;
                info!(rule_id = %rule_id, "Payment denied by rule");
                Ok(PaymentOutcome::Denied { rule_id })
            }
            Decision::RequiresApproval { reason } => {
                flow.advance(PaymentState::RequiresApproval)?;
                self.record(&request, AutoPayOutcome::NeedsApproval, None).await;
                debug!(%reason, "Payment requires approval");
                Ok(PaymentOutcome::RequiresApproval { reason })
            }
            Decision::Approved { rule_id } => {
                flow.advance(PaymentState::Approved)?;
                let approval = Approval::Automatic { tracked };
                self.execute(&request, &mut flow, &budget, approval, rule_id)
                    .await
            }
        }
    }

    /// The user approved a pending request: pay it now.
    ///
    /// Limits still apply; a reservation failure is returned to the caller.
    /// A request that expired while waiting is marked expired and reported
    /// as [`AutoPayError::Expired`].
    #[tracing::instrument(skip(self, budget))]
    pub async fn approve(
        &self,
        request_id: &str,
        budget: ExecutionBudget,
    ) -> Result<PaymentOutcome> {
        let request = self.requests.require(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(AutoPayError::invalid_transition(
                request.status,
                RequestStatus::Accepted,
            ));
        }

        let mut flow = PaymentFlow::awaiting_approval(request_id);
        if request.is_expired_at(Utc::now().timestamp()) {
            self.expire(&request, &mut flow).await?;
            return Err(AutoPayError::Expired {
                request_id: request.id.clone(),
                expired_at: request.expires_at.unwrap_or_default(),
            });
        }
        flow.advance(PaymentState::UserApproved)?;
        self.execute(&request, &mut flow, &budget, Approval::User, None)
            .await
    }

    /// The user declined a pending request. A request already being paid
    /// cannot be declined.
    #[tracing::instrument(skip(self))]
    pub async fn decline(&self, request_id: &str) -> Result<PaymentOutcome> {
        let mut flow = PaymentFlow::awaiting_approval(request_id);
        flow.advance(PaymentState::UserDeclined)?;

        let request = self
            .requests
            .compare_and_set(request_id, RequestStatus::Pending, RequestStatus::Declined)
            .await?;
        self.record(&request, AutoPayOutcome::UserDeclined, None).await;
        Ok(PaymentOutcome::Declined)
    }

    async fn execute(
        &self,
        request: &PaymentRequest,
        flow: &mut PaymentFlow,
        budget: &ExecutionBudget,
        approval: Approval,
        rule_id: Option<String>,
    ) -> Result<PaymentOutcome> {
        budget.check()?;
        flow.advance(PaymentState::Reserving)?;

        if approval == (Approval::Automatic { tracked: false }) {
            warn!("Request was not stored, handing payment to the user");
            return self
                .hand_to_user(request, flow, ApprovalReason::LedgerUnavailable, rule_id)
                .await;
        }
        // Only the caller holding the claim may reserve and pay
        if let Err(e) = self.requests.claim(&request.id).await {
            return match Self::downgrade_reason(&e, approval) {
                Some(reason) => self.hand_to_user(request, flow, reason, rule_id).await,
                None => Err(e),
            };
        }

        let reservation = match self.ledger.reserve(request.payee(), request.amount_sats).await {
            Ok(reservation) => reservation,
            Err(e) => {
                self.set_status(&request.id, RequestStatus::Pending).await;
                return match Self::downgrade_reason(&e, approval) {
                    Some(reason) => self.hand_to_user(request, flow, reason, rule_id).await,
                    None => Err(e),
                };
            }
        };

        flow.advance(PaymentState::Executing)?;

        let timeout = self.config.executor_timeout().min(budget.remaining());
        let result = tokio::select! {
            biased;
            stopped = budget.expired() => Err(stopped),
            paid = tokio::time::timeout(timeout, self.executor.pay(request, timeout)) => match paid {
                Ok(Ok(receipt)) => Ok(receipt),
                Ok(Err(e)) => Err(AutoPayError::Executor(e)),
                Err(_) => Err(AutoPayError::Executor(ExecutorError::timeout(format!(
                    "no answer within {} ms",
                    timeout.as_millis()
                )))),
            },
        };

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(failure) => {
                let reservation_id = reservation.id().to_string();
                if let Err(rollback_error) = self.ledger.rollback(reservation).await {
                    error!(
                        reservation_id = %reservation_id,
                        error = %rollback_error,
                        cause = %failure,
                        "Payment failed and its reservation could not be rolled back"
                    );
                    // Left accepted: nobody may claim it until the journal is reconciled
                    self.record(request, AutoPayOutcome::Failed, rule_id).await;
                    return Err(rollback_error);
                }
                flow.advance(PaymentState::RolledBack)?;
                self.set_status(&request.id, RequestStatus::Pending).await;
                self.record(request, AutoPayOutcome::Failed, rule_id).await;
                warn!(error = %failure, retryable = failure.is_retryable(), "Payment failed, reservation rolled back");
                return Err(failure);
            }
        };

        if let Err(e) = self.ledger.commit(reservation).await {
            // The amount stays counted; only the journal entry is left over
            error!(error = %e, "Payment succeeded but its reservation could not be committed");
        }
        flow.advance(PaymentState::Committed)?;
        self.set_status(&request.id, RequestStatus::Paid).await;
        info!(receipt_id = %receipt.receipt_id, payee = %request.payee(), "Payment committed");

        let rotated_endpoint = match self
            .rotation
            .on_payment_executed(&request.method_id, self.publisher.as_ref())
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(method_id = %request.method_id, error = %e, "Failed to update endpoint rotation");
                None
            }
        };

        let confirmation = match &self.confirmations {
            Some(source) => {
                Some(wait_for_confirmation(source.as_ref(), &receipt, &self.backoff, budget).await)
            }
            None => None,
        };

        let outcome = match approval {
            Approval::Automatic { .. } => AutoPayOutcome::AutoPaid,
            Approval::User => AutoPayOutcome::UserApproved,
        };
        self.record(request, outcome, rule_id).await;

        Ok(PaymentOutcome::Paid(PaidPayment {
            receipt,
            rotated_endpoint,
            confirmation,
        }))
    }

    /// Store a new request, or refuse one that was already handled.
    ///
    /// Returns false if the request could not be stored; such a request is
    /// never paid automatically since no claim can be taken on it.
    async fn register(&self, request: &PaymentRequest) -> Result<bool> {
        match self.requests.save(request).await {
            Ok(true) => Ok(true),
            Ok(false) => match self.requests.get(&request.id).await {
                Ok(Some(existing)) if existing.status != RequestStatus::Pending => Err(
                    AutoPayError::invalid_transition(existing.status, RequestStatus::Accepted),
                ),
                _ => Ok(true),
            },
            Err(e @ AutoPayError::Validation { .. }) => Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to store payment request");
                Ok(false)
            }
        }
    }

    /// Which reservation-stage failures the automatic path turns into a
    /// request for approval. The user path gets every error back.
    fn downgrade_reason(error: &AutoPayError, approval: Approval) -> Option<ApprovalReason> {
        if approval == Approval::User {
            return None;
        }
        match error {
            AutoPayError::LimitExceeded { .. } => Some(ApprovalReason::LimitExceeded),
            AutoPayError::Persistence(_) | AutoPayError::Serialization(_) => {
                warn!(error = %error, "Ledger unavailable, handing payment to the user");
                Some(ApprovalReason::LedgerUnavailable)
            }
            _ => None,
        }
    }

    async fn hand_to_user(
        &self,
        request: &PaymentRequest,
        flow: &mut PaymentFlow,
        reason: ApprovalReason,
        rule_id: Option<String>,
    ) -> Result<PaymentOutcome> {
        flow.advance(PaymentState::RequiresApproval)?;
        self.record(request, AutoPayOutcome::NeedsApproval, rule_id)
            .await;
        debug!(%reason, "Reservation refused, payment requires approval");
        Ok(PaymentOutcome::RequiresApproval { reason })
    }

    async fn expire(
        &self,
        request: &PaymentRequest,
        flow: &mut PaymentFlow,
    ) -> Result<PaymentOutcome> {
        flow.advance(PaymentState::Expired)?;
        self.settle_pending(&request.id, RequestStatus::Expired).await;
        self.record(request, AutoPayOutcome::Expired, None).await;
        debug!(expires_at = ?request.expires_at, "Payment request expired");
        Ok(PaymentOutcome::Expired)
    }

    /// Close a request that nobody has claimed.
    async fn settle_pending(&self, request_id: &str, status: RequestStatus) {
        if let Err(e) = self
            .requests
            .compare_and_set(request_id, RequestStatus::Pending, status)
            .await
        {
            warn!(request_id, %status, error = %e, "Failed to update request status");
        }
    }

    async fn set_status(&self, request_id: &str, status: RequestStatus) {
        if let Err(e) = self.requests.update_status(request_id, status).await {
            warn!(request_id, %status, error = %e, "Failed to update request status");
        }
    }

    async fn record(
        &self,
        request: &PaymentRequest,
        outcome: AutoPayOutcome,
        rule_id: Option<String>,
    ) {
        let entry = AutoPayHistoryEntry::new(
            &request.id,
            request.payee(),
            &request.method_id,
            request.amount_sats,
            outcome,
        )
        .with_rule(rule_id);
        if let Err(e) = self.history.record(entry).await {
            warn!(request_id = %request.id, error = %e, "Failed to record auto-pay history");
        }
    }
}
