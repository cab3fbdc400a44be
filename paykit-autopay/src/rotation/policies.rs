//! Endpoint rotation policies and per-method rotation state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AutoPayError, Result};

/// When a payment method's endpoint should be rotated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Rotate after every use.
    /// Best for privacy (no endpoint reuse).
    #[default]
    OnUse,

    /// Rotate once the use count reaches the method's threshold.
    AfterUses,

    /// Never rotate automatically.
    Manual,
}

impl RotationPolicy {
    /// Check if rotation is due for `use_count` uses against `threshold`.
    pub fn should_rotate(&self, use_count: u32, threshold: u32) -> bool {
        match self {
            Self::OnUse => true,
            Self::AfterUses => use_count >= threshold,
            Self::Manual => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnUse => "on-use",
            Self::AfterUses => "after-uses",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for RotationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RotationPolicy {
    type Err = AutoPayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "on-use" | "onuse" => Ok(Self::OnUse),
            "after-uses" | "afteruses" | "threshold" => Ok(Self::AfterUses),
            "manual" => Ok(Self::Manual),
            other => Err(AutoPayError::validation(
                "policy",
                format!("unknown policy '{}', expected on-use, after-uses or manual", other),
            )),
        }
    }
}

/// Wallet-wide rotation configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Whether payments may trigger rotation at all.
    #[serde(default = "default_auto_rotate")]
    pub auto_rotate_enabled: bool,
    /// Policy for methods without their own settings.
    #[serde(default)]
    pub default_policy: RotationPolicy,
    #[serde(default = "default_threshold")]
    pub default_threshold: u32,
}

fn default_auto_rotate() -> bool {
    true
}

fn default_threshold() -> u32 {
    5
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            auto_rotate_enabled: default_auto_rotate(),
            default_policy: RotationPolicy::default(),
            default_threshold: default_threshold(),
        }
    }
}

/// Rotation state for one payment method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRotationSettings {
    pub method_id: String,
    pub policy: RotationPolicy,
    pub threshold: u32,
    /// Uses since the last rotation.
    pub use_count: u32,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub rotation_count: u32,
}

impl MethodRotationSettings {
    /// Fresh state for `method_id` using the configured defaults.
    pub fn new(method_id: impl Into<String>, config: &RotationConfig) -> Self {
        Self {
            method_id: method_id.into(),
            policy: config.default_policy,
            threshold: config.default_threshold,
            use_count: 0,
            last_rotated_at: None,
            rotation_count: 0,
        }
    }

    /// Count one use of the current endpoint.
    pub fn record_use(&mut self) {
        self.use_count = self.use_count.saturating_add(1);
    }

    /// Whether this method's own policy says rotation is due.
    pub fn rotation_due(&self) -> bool {
        self.policy.should_rotate(self.use_count, self.threshold)
    }

    /// Reset after the endpoint was replaced.
    pub fn record_rotation(&mut self, now: DateTime<Utc>) {
        self.use_count = 0;
        self.last_rotated_at = Some(now);
        self.rotation_count = self.rotation_count.saturating_add(1);
    }
}

/// Why an endpoint was rotated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    /// The method's policy said rotation was due after a payment.
    Policy,
    /// The user asked for it.
    Manual,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy => f.write_str("policy"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Entry in the rotation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationEvent {
    pub id: String,
    pub method_id: String,
    pub timestamp: DateTime<Utc>,
    pub reason: RotationReason,
}

impl RotationEvent {
    pub fn new(method_id: impl Into<String>, reason: RotationReason, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method_id: method_id.into(),
            timestamp,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        assert_eq!(RotationPolicy::default(), RotationPolicy::OnUse);
        let config = RotationConfig::default();
        assert!(config.auto_rotate_enabled);
        assert_eq!(config.default_threshold, 5);
    }

    #[test]
    fn test_on_use_always_rotates() {
        let policy = RotationPolicy::OnUse;
        assert!(policy.should_rotate(0, 5));
        assert!(policy.should_rotate(1, 5));
        assert!(policy.should_rotate(100, 5));
    }

    #[test]
    fn test_after_uses_threshold() {
        let policy = RotationPolicy::AfterUses;
        assert!(!policy.should_rotate(0, 3));
        assert!(!policy.should_rotate(2, 3));
        assert!(policy.should_rotate(3, 3));
        assert!(policy.should_rotate(4, 3));
    }

    #[test]
    fn test_manual_never_rotates() {
        assert!(!RotationPolicy::Manual.should_rotate(u32::MAX, 1));
    }

    #[test]
    fn test_method_settings_lifecycle() {
        let config = RotationConfig {
            default_policy: RotationPolicy::AfterUses,
            default_threshold: 2,
            ..Default::default()
        };
        let mut settings = MethodRotationSettings::new("onchain", &config);

        settings.record_use();
        assert!(!settings.rotation_due());
        settings.record_use();
        assert!(settings.rotation_due());

        let now = Utc::now();
        settings.record_rotation(now);
        assert_eq!(settings.use_count, 0);
        assert_eq!(settings.rotation_count, 1);
        assert_eq!(settings.last_rotated_at, Some(now));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("after_uses".parse::<RotationPolicy>().unwrap(), RotationPolicy::AfterUses);
        assert_eq!("On-Use".parse::<RotationPolicy>().unwrap(), RotationPolicy::OnUse);
        assert!("sometimes".parse::<RotationPolicy>().is_err());
    }
}
