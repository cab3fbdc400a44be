//! Engine wiring.
//!
//! [`AutoPayEngine`] owns one instance of each stateful component over a
//! shared store and identity, so that the ledger, the policy settings and
//! the rotation controller all observe the same persisted state.
//!
//! # Example
//!
//! ```ignore
//! use paykit_autopay::{AutoPayConfig, AutoPayEngine, ExecutionBudget};
//!
//! let engine = AutoPayEngine::in_memory(AutoPayConfig::new("alice"))?;
//! engine.settings().set_enabled(true).await?;
//!
//! let orchestrator = engine.orchestrator(executor, publisher);
//! let outcome = orchestrator.process(request, orchestrator.default_budget()).await?;
//! ```

use std::sync::Arc;

use crate::config::AutoPayConfig;
use crate::executor::{EndpointPublisher, PaymentExecutor};
use crate::history::AutoPayHistory;
use crate::ledger::LimitLedger;
use crate::orchestrator::Orchestrator;
use crate::policy::{Decision, PolicyEngine};
use crate::request::PaymentRequest;
use crate::request_store::RequestStore;
use crate::rotation::RotationController;
use crate::settings::SettingsStore;
use crate::store::{CachedStore, KeyValueStore, MemoryStore, StoreKeys};
use crate::Result;

/// Shared auto-pay state for one identity.
pub struct AutoPayEngine {
    config: AutoPayConfig,
    store: Arc<dyn KeyValueStore>,
    settings: Arc<SettingsStore>,
    ledger: Arc<LimitLedger>,
    rotation: Arc<RotationController>,
    requests: Arc<RequestStore>,
    history: Arc<AutoPayHistory>,
}

impl AutoPayEngine {
    /// Build an engine over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: AutoPayConfig) -> Result<Self> {
        config.validate()?;
        let keys = StoreKeys::new(&config.identity);

        let settings = Arc::new(SettingsStore::new(store.clone(), keys.clone()));
        let ledger = Arc::new(LimitLedger::new(
            store.clone(),
            keys.clone(),
            settings.clone(),
            config.ledger.clone(),
        ));
        let rotation = Arc::new(RotationController::new(store.clone(), keys.clone()));
        let requests = Arc::new(RequestStore::new(store.clone(), keys.clone()));
        let history = Arc::new(AutoPayHistory::new(store.clone(), keys));

        Ok(Self {
            config,
            store,
            settings,
            ledger,
            rotation,
            requests,
            history,
        })
    }

    /// Build an engine over `store` with a read-through cache in front.
    ///
    /// Only safe while this engine is the sole writer of the store.
    pub fn cached(store: Arc<dyn KeyValueStore>, config: AutoPayConfig) -> Result<Self> {
        Self::new(Arc::new(CachedStore::new(store)), config)
    }

    /// Engine over a fresh in-memory store.
    pub fn in_memory(config: AutoPayConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Engine over a file store rooted at `dir`.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn open(dir: impl Into<std::path::PathBuf>, config: AutoPayConfig) -> Result<Self> {
        let store = crate::store::FileStore::new(dir)?;
        Self::cached(Arc::new(store), config)
    }

    pub fn config(&self) -> &AutoPayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<LimitLedger> {
        &self.ledger
    }

    pub fn rotation(&self) -> &Arc<RotationController> {
        &self.rotation
    }

    pub fn requests(&self) -> &Arc<RequestStore> {
        &self.requests
    }

    pub fn history(&self) -> &Arc<AutoPayHistory> {
        &self.history
    }

    /// Evaluate `request` against the current settings without side effects.
    pub async fn evaluate(&self, request: &PaymentRequest) -> Decision {
        let settings = self.settings.load_or_default().await;
        PolicyEngine::new(settings).evaluate(request)
    }

    /// Orchestrator over this engine's state.
    pub fn orchestrator(
        &self,
        executor: Arc<dyn PaymentExecutor>,
        publisher: Arc<dyn EndpointPublisher>,
    ) -> Orchestrator {
        Orchestrator::new(self, executor, publisher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ApprovalReason;
    use crate::request::Direction;
    use crate::rules::AutoPayRule;
    use crate::settings::GlobalSettings;

    #[test]
    fn test_rejects_invalid_config() {
        let config = AutoPayConfig::new("  ");
        assert!(AutoPayEngine::in_memory(config).is_err());
    }

    #[tokio::test]
    async fn test_components_share_settings() {
        let engine = AutoPayEngine::in_memory(AutoPayConfig::new("alice")).unwrap();
        let request = PaymentRequest::new("pk:bob", "pk:alice", 500, "lightning", Direction::Incoming);

        assert_eq!(
            engine.evaluate(&request).await,
            Decision::RequiresApproval {
                reason: ApprovalReason::AutopayDisabled
            }
        );

        engine
            .settings()
            .save(
                &GlobalSettings::default()
                    .with_enabled(true)
                    .with_rule(AutoPayRule::new("small").with_id("small").with_max_amount(1_000)),
            )
            .await
            .unwrap();
        assert_eq!(
            engine.evaluate(&request).await,
            Decision::Approved {
                rule_id: Some("small".to_string())
            }
        );

        // The ledger reads its global limit from the same settings
        let check = engine.ledger().check("pk:bob", 500).await.unwrap();
        assert_eq!(check.global_remaining_sats, 100_000);
    }

    #[tokio::test]
    async fn test_identities_are_isolated() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let alice = AutoPayEngine::new(store.clone(), AutoPayConfig::new("alice")).unwrap();
        let bob = AutoPayEngine::new(store, AutoPayConfig::new("bob")).unwrap();

        alice.settings().set_enabled(true).await.unwrap();
        assert!(alice.settings().load().await.unwrap().autopay_enabled);
        assert!(!bob.settings().load().await.unwrap().autopay_enabled);
    }
}
