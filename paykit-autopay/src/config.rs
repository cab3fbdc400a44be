//! Configuration types for the auto-pay engine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::confirmation::BackoffConfig;
use crate::limits::SpendingPeriod;
use crate::{AutoPayError, Result};

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoPayConfig {
    /// Wallet identity; namespaces every store key.
    #[serde(default = "default_identity")]
    pub identity: String,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Backoff used while waiting for payment confirmation.
    #[serde(default)]
    pub confirmation: BackoffConfig,
}

fn default_identity() -> String {
    "default".to_string()
}

impl Default for AutoPayConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            ledger: LedgerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            confirmation: BackoffConfig::default(),
        }
    }
}

impl AutoPayConfig {
    /// Configuration with every default and the given identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => {
                let config: Self = serde_json::from_slice(&bytes)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(AutoPayError::validation(
                "config",
                format!("cannot read {}: {}", path.display(), e),
            )),
        }
    }

    pub fn with_ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_confirmation(mut self, confirmation: BackoffConfig) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(AutoPayError::validation("identity", "cannot be empty"));
        }
        if self.orchestrator.executor_timeout_ms == 0 {
            return Err(AutoPayError::validation("executor_timeout_ms", "must be positive"));
        }
        if self.confirmation.multiplier < 1.0 {
            return Err(AutoPayError::validation("multiplier", "must be at least 1.0"));
        }
        Ok(())
    }
}

/// Defaults for lazily created peer limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_peer_limit_sats")]
    pub default_peer_limit_sats: u64,
    #[serde(default)]
    pub default_period: SpendingPeriod,
}

fn default_peer_limit_sats() -> u64 {
    100_000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_peer_limit_sats: default_peer_limit_sats(),
            default_period: SpendingPeriod::Daily,
        }
    }
}

impl LedgerConfig {
    pub fn with_default_peer_limit(mut self, sats: u64) -> Self {
        self.default_peer_limit_sats = sats;
        self
    }

    pub fn with_default_period(mut self, period: SpendingPeriod) -> Self {
        self.default_period = period;
        self
    }
}

/// Timing of the payment flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound for a single executor call.
    #[serde(default = "default_executor_timeout_ms")]
    pub executor_timeout_ms: u64,
    /// Default window for a whole flow when the caller gives none.
    #[serde(default = "default_execution_window_ms")]
    pub execution_window_ms: u64,
}

fn default_executor_timeout_ms() -> u64 {
    30_000
}

fn default_execution_window_ms() -> u64 {
    25_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            executor_timeout_ms: default_executor_timeout_ms(),
            execution_window_ms: default_execution_window_ms(),
        }
    }
}

impl OrchestratorConfig {
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }

    pub fn execution_window(&self) -> Duration {
        Duration::from_millis(self.execution_window_ms)
    }

    pub fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_execution_window(mut self, window: Duration) -> Self {
        self.execution_window_ms = window.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AutoPayConfig::new("alice");
        assert_eq!(config.identity, "alice");
        assert_eq!(config.ledger.default_peer_limit_sats, 100_000);
        assert_eq!(config.orchestrator.executor_timeout(), Duration::from_secs(30));
        assert_eq!(config.orchestrator.execution_window(), Duration::from_secs(25));
        assert_eq!(config.confirmation.max_attempts, 5);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{"ledger":{"default_period":"weekly"},"orchestrator":{"executor_timeout_ms":5000}}"#;
        let config: AutoPayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.identity, "default");
        assert_eq!(config.ledger.default_period, SpendingPeriod::Weekly);
        assert_eq!(config.ledger.default_peer_limit_sats, 100_000);
        assert_eq!(config.orchestrator.executor_timeout_ms, 5_000);
        assert_eq!(config.orchestrator.execution_window_ms, 25_000);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempdir().unwrap();
        let missing = AutoPayConfig::from_json_file(dir.path().join("none.json")).unwrap();
        assert_eq!(missing.identity, "default");

        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"identity":"bob"}"#).unwrap();
        assert_eq!(AutoPayConfig::from_json_file(&path).unwrap().identity, "bob");

        std::fs::write(&path, r#"{"identity":""}"#).unwrap();
        assert!(AutoPayConfig::from_json_file(&path).is_err());
    }
}
