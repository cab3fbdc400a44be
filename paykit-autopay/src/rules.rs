//! Auto-pay rules.
//!
//! A rule matches on amount, payment method and peer. Unset filters match
//! everything. Rules are evaluated in list order by the policy engine and
//! the first match decides.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{AutoPayError, Result};

/// What a matching rule decides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Allow,
    Deny,
}

/// User-authored auto-pay rule. Rules are evaluated in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoPayRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Largest single payment this rule covers.
    pub max_amount_sats: Option<u64>,
    /// Empty means any method.
    #[serde(default)]
    pub allowed_methods: BTreeSet<String>,
    /// Empty means any peer.
    #[serde(default)]
    pub allowed_peers: BTreeSet<String>,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default)]
    pub require_confirmation: bool,
}

impl AutoPayRule {
    /// Create an enabled allow rule matching every payment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("rule_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            enabled: true,
            max_amount_sats: None,
            allowed_methods: BTreeSet::new(),
            allowed_peers: BTreeSet::new(),
            action: RuleAction::Allow,
            require_confirmation: false,
        }
    }

    /// Use a fixed identifier instead of a generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_max_amount(mut self, max_amount_sats: u64) -> Self {
        self.max_amount_sats = Some(max_amount_sats);
        self
    }

    /// Restrict to these payment methods.
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to these peers.
    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_peers = peers.into_iter().map(Into::into).collect();
        self
    }

    /// Turn this into a deny rule.
    pub fn deny(mut self) -> Self {
        self.action = RuleAction::Deny;
        self
    }

    /// Require user confirmation even when this rule allows the payment.
    pub fn with_confirmation(mut self) -> Self {
        self.require_confirmation = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check whether this rule applies to a candidate payment.
    ///
    /// Pure and total: a disabled rule never matches, an unset cap or an
    /// empty set never excludes.
    pub fn matches(&self, amount_sats: u64, method_id: &str, peer_id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if matches!(self.max_amount_sats, Some(max) if amount_sats > max) {
            return false;
        }
        if !self.allowed_methods.is_empty() && !self.allowed_methods.contains(method_id) {
            return false;
        }
        if !self.allowed_peers.is_empty() && !self.allowed_peers.contains(peer_id) {
            return false;
        }
        true
    }

    /// Validate the rule before it is stored.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AutoPayError::validation("id", "rule id cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(AutoPayError::validation("name", "rule name cannot be empty"));
        }
        if self.allowed_methods.iter().any(|m| m.is_empty()) {
            return Err(AutoPayError::validation("allowed_methods", "empty method id"));
        }
        if self.allowed_peers.iter().any(|p| p.is_empty()) {
            return Err(AutoPayError::validation("allowed_peers", "empty peer id"));
        }
        Ok(())
    }
}
