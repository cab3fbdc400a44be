//! Auto-pay decision engine.
//!
//! The engine is a pure function of a [`GlobalSettings`] snapshot and a
//! candidate payment. It never touches the ledger; limit enforcement happens
//! afterwards when the orchestrator reserves funds.
//!
//! Evaluation order:
//!
//! 1. Auto-pay disabled: requires approval.
//! 2. First enabled rule (in list order) that matches decides: deny rules
//!    deny, allow rules approve unless they ask for confirmation.
//! 3. No rule matched: amounts above the confirmation threshold or the
//!    global cap require approval, everything else is approved.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::PaymentRequest;
use crate::rules::RuleAction;
use crate::settings::GlobalSettings;

/// Why a payment was handed to the user instead of being paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalReason {
    AutopayDisabled,
    AboveConfirmationThreshold,
    AboveGlobalMax,
    RuleRequiresConfirmation,
    /// Policy approved but the spending limits were exhausted.
    LimitExceeded,
    /// The ledger could not be read or written.
    LedgerUnavailable,
}

impl fmt::Display for ApprovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AutopayDisabled => "auto-pay is disabled",
            Self::AboveConfirmationThreshold => "amount is above the confirmation threshold",
            Self::AboveGlobalMax => "amount is above the global maximum",
            Self::RuleRequiresConfirmation => "matching rule requires confirmation",
            Self::LimitExceeded => "spending limit reached",
            Self::LedgerUnavailable => "spending ledger unavailable",
        };
        f.write_str(s)
    }
}

/// Outcome of policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Pay without asking. `rule_id` is the allowing rule, if any.
    Approved { rule_id: Option<String> },
    /// Never pay automatically.
    Denied { rule_id: String },
    /// Ask the user.
    RequiresApproval { reason: ApprovalReason },
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    /// Id of the rule that produced this decision.
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::Approved { rule_id } => rule_id.as_deref(),
            Self::Denied { rule_id } => Some(rule_id),
            Self::RequiresApproval { .. } => None,
        }
    }
}

/// Evaluates payments against one settings snapshot.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    settings: GlobalSettings,
}

impl PolicyEngine {
    pub fn new(settings: GlobalSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    /// Decide what to do with `request`, keyed by its payee.
    pub fn evaluate(&self, request: &PaymentRequest) -> Decision {
        self.evaluate_payment(request.amount_sats, &request.method_id, request.payee())
    }

    /// Decide for a payment described by its parts.
    pub fn evaluate_payment(&self, amount_sats: u64, method_id: &str, peer_id: &str) -> Decision {
        let settings = &self.settings;
        if !settings.autopay_enabled {
            return Decision::RequiresApproval {
                reason: ApprovalReason::AutopayDisabled,
            };
        }

        if let Some(rule) = settings
            .rules
            .iter()
            .find(|rule| rule.matches(amount_sats, method_id, peer_id))
        {
            return match rule.action {
                RuleAction::Deny => Decision::Denied {
                    rule_id: rule.id.clone(),
                },
                RuleAction::Allow if rule.require_confirmation => Decision::RequiresApproval {
                    reason: ApprovalReason::RuleRequiresConfirmation,
                },
                RuleAction::Allow => Decision::Approved {
                    rule_id: Some(rule.id.clone()),
                },
            };
        }

        if amount_sats > settings.require_confirmation_above_sats {
            Decision::RequiresApproval {
                reason: ApprovalReason::AboveConfirmationThreshold,
            }
        } else if amount_sats <= settings.global_max_amount_sats {
            Decision::Approved { rule_id: None }
        } else {
            Decision::RequiresApproval {
                reason: ApprovalReason::AboveGlobalMax,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AutoPayRule;

    fn enabled() -> GlobalSettings {
        GlobalSettings::default().with_enabled(true)
    }

    #[test]
    fn test_disabled_requires_approval_even_with_rules() {
        let engine = PolicyEngine::new(
            GlobalSettings::default().with_rule(AutoPayRule::new("all").with_id("all")),
        );
        assert_eq!(
            engine.evaluate_payment(1, "lightning", "pk:a"),
            Decision::RequiresApproval {
                reason: ApprovalReason::AutopayDisabled
            }
        );
    }

    #[test]
    fn test_first_match_wins() {
        let settings = enabled()
            .with_rule(AutoPayRule::new("allow").with_id("allow").with_peers(["pk:x"]))
            .with_rule(AutoPayRule::new("deny").with_id("deny").with_peers(["pk:x"]).deny());
        let engine = PolicyEngine::new(settings);
        assert_eq!(
            engine.evaluate_payment(5, "lightning", "pk:x"),
            Decision::Approved {
                rule_id: Some("allow".into())
            }
        );

        let settings = enabled()
            .with_rule(AutoPayRule::new("deny").with_id("deny").with_peers(["pk:x"]).deny())
            .with_rule(AutoPayRule::new("allow").with_id("allow").with_peers(["pk:x"]));
        let engine = PolicyEngine::new(settings);
        assert_eq!(
            engine.evaluate_payment(5, "lightning", "pk:x"),
            Decision::Denied {
                rule_id: "deny".into()
            }
        );
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let settings = enabled()
            .with_global_max_amount(0)
            .with_confirmation_above(u64::MAX)
            .with_rule(AutoPayRule::new("off").with_id("off").deny().disabled());
        let decision = PolicyEngine::new(settings).evaluate_payment(5, "m", "p");
        assert_eq!(
            decision,
            Decision::RequiresApproval {
                reason: ApprovalReason::AboveGlobalMax
            }
        );
    }

    #[test]
    fn test_rule_requiring_confirmation() {
        let settings = enabled().with_rule(AutoPayRule::new("ask").with_id("ask").with_confirmation());
        let decision = PolicyEngine::new(settings).evaluate_payment(5, "m", "p");
        assert_eq!(
            decision,
            Decision::RequiresApproval {
                reason: ApprovalReason::RuleRequiresConfirmation
            }
        );
    }

    #[test]
    fn test_fallback_thresholds() {
        let engine = PolicyEngine::new(
            enabled()
                .with_global_max_amount(10_000)
                .with_confirmation_above(5_000),
        );
        assert!(engine.evaluate_payment(5_000, "m", "p").is_approved());
        assert_eq!(
            engine.evaluate_payment(5_001, "m", "p"),
            Decision::RequiresApproval {
                reason: ApprovalReason::AboveConfirmationThreshold
            }
        );
    }

    #[test]
    fn test_decision_rule_id() {
        assert_eq!(Decision::Denied { rule_id: "r".into() }.rule_id(), Some("r"));
        assert_eq!(Decision::Approved { rule_id: None }.rule_id(), None);
    }
}
