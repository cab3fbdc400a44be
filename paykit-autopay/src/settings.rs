//! Global auto-pay settings and their persistence.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::rules::AutoPayRule;
use crate::store::{load_json, save_json, KeyValueStore, StoreKeys};
use crate::{AutoPayError, Result};

/// Wallet-wide auto-pay settings, including the ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default)]
    pub autopay_enabled: bool,
    /// Largest payment approved without a matching rule.
    #[serde(default = "default_global_max_amount")]
    pub global_max_amount_sats: u64,
    /// Wallet-wide spend allowed per UTC day.
    #[serde(default = "default_global_daily_limit")]
    pub global_daily_limit_sats: u64,
    /// Payments above this need the user unless a rule says otherwise.
    #[serde(default = "default_require_confirmation_above")]
    pub require_confirmation_above_sats: u64,
    /// Evaluated in order; the first match wins.
    #[serde(default)]
    pub rules: Vec<AutoPayRule>,
}

fn default_global_max_amount() -> u64 {
    10_000
}

fn default_global_daily_limit() -> u64 {
    100_000
}

fn default_require_confirmation_above() -> u64 {
    10_000
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            autopay_enabled: false,
            global_max_amount_sats: default_global_max_amount(),
            global_daily_limit_sats: default_global_daily_limit(),
            require_confirmation_above_sats: default_require_confirmation_above(),
            rules: Vec::new(),
        }
    }
}

impl GlobalSettings {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.autopay_enabled = enabled;
        self
    }

    pub fn with_global_max_amount(mut self, sats: u64) -> Self {
        self.global_max_amount_sats = sats;
        self
    }

    pub fn with_global_daily_limit(mut self, sats: u64) -> Self {
        self.global_daily_limit_sats = sats;
        self
    }

    pub fn with_confirmation_above(mut self, sats: u64) -> Self {
        self.require_confirmation_above_sats = sats;
        self
    }

    pub fn with_rule(mut self, rule: AutoPayRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule(&self, rule_id: &str) -> Option<&AutoPayRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }
}

/// Persists [`GlobalSettings`] for one identity.
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StoreKeys) -> Self {
        Self {
            store,
            keys,
            lock: Mutex::new(()),
        }
    }

    /// Load settings, failing on store or decode errors. Absent settings
    /// are the defaults.
    pub async fn load(&self) -> Result<GlobalSettings> {
        Ok(load_json(self.store.as_ref(), &self.keys.settings())
            .await?
            .unwrap_or_default())
    }

    /// Load settings, degrading to the defaults (auto-pay disabled) if they
    /// cannot be read. The decision path uses this so it never blocks.
    pub async fn load_or_default(&self) -> GlobalSettings {
        match self.load().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to load auto-pay settings, falling back to defaults");
                GlobalSettings::default()
            }
        }
    }

    pub async fn save(&self, settings: &GlobalSettings) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(settings).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<GlobalSettings> {
        self.modify(|s| {
            s.autopay_enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Replace the rule with the same id, or append it.
    pub async fn upsert_rule(&self, rule: AutoPayRule) -> Result<GlobalSettings> {
        rule.validate()?;
        self.modify(move |s| {
            match s.rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule,
                None => s.rules.push(rule),
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_rule(&self, rule_id: &str) -> Result<GlobalSettings> {
        self.modify(|s| {
            let before = s.rules.len();
            s.rules.retain(|r| r.id != rule_id);
            if s.rules.len() == before {
                return Err(AutoPayError::not_found("rule", rule_id));
            }
            Ok(())
        })
        .await
    }

    /// Move a rule to `index`, clamped to the end of the list.
    pub async fn move_rule(&self, rule_id: &str, index: usize) -> Result<GlobalSettings> {
        self.modify(|s| {
            let from = s
                .rules
                .iter()
                .position(|r| r.id == rule_id)
                .ok_or_else(|| AutoPayError::not_found("rule", rule_id))?;
            let rule = s.rules.remove(from);
            let to = index.min(s.rules.len());
            s.rules.insert(to, rule);
            Ok(())
        })
        .await
    }

    async fn modify<F>(&self, f: F) -> Result<GlobalSettings>
    where
        F: FnOnce(&mut GlobalSettings) -> Result<()>,
    {
        let _guard = self.lock.lock().await;
        let mut settings = self.load().await?;
        f(&mut settings)?;
        self.write(&settings).await?;
        Ok(settings)
    }

    async fn write(&self, settings: &GlobalSettings) -> Result<()> {
        save_json(self.store.as_ref(), &self.keys.settings(), settings).await?;
        debug!(
            enabled = settings.autopay_enabled,
            rules = settings.rules.len(),
            "Saved auto-pay settings"
        );
        Ok(())
    }
}
