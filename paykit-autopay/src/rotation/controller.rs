//! Persistent endpoint rotation controller.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::policies::{
    MethodRotationSettings, RotationConfig, RotationEvent, RotationPolicy, RotationReason,
};
use crate::executor::{EndpointPublisher, NewEndpoint};
use crate::history::BoundedHistory;
use crate::locks::KeyedLocks;
use crate::store::{load_json, save_json, KeyValueStore, StoreKeys};
use crate::{AutoPayError, Result};

const CONFIG_LOCK: &str = "config";
const INDEX_LOCK: &str = "methods";
const HISTORY_LOCK: &str = "history";

fn method_lock(method_id: &str) -> String {
    format!("method:{}", method_id)
}

/// Tracks endpoint usage per payment method and decides when to rotate.
///
/// Mutations of one method's state are serialized and persisted before the
/// call returns. Lock order is method, index, history.
pub struct RotationController {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    locks: KeyedLocks,
}

impl RotationController {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StoreKeys) -> Self {
        Self {
            store,
            keys,
            locks: KeyedLocks::new(),
        }
    }

    /// Get the configuration, or the defaults if none was saved.
    pub async fn config(&self) -> Result<RotationConfig> {
        Ok(load_json(self.store.as_ref(), &self.keys.rotation_config())
            .await?
            .unwrap_or_default())
    }

    pub async fn set_config(&self, config: &RotationConfig) -> Result<()> {
        if config.default_threshold == 0 {
            return Err(AutoPayError::validation("default_threshold", "must be at least 1"));
        }
        let _guard = self.locks.lock(CONFIG_LOCK).await;
        save_json(self.store.as_ref(), &self.keys.rotation_config(), config).await
    }

    /// Current state for a method, defaults if it has never been used.
    pub async fn method_settings(&self, method_id: &str) -> Result<MethodRotationSettings> {
        Ok(self.load_method(method_id).await?.0)
    }

    /// Change a method's policy and threshold, keeping its counters.
    pub async fn update_method_settings(
        &self,
        method_id: &str,
        policy: RotationPolicy,
        threshold: u32,
    ) -> Result<MethodRotationSettings> {
        if method_id.is_empty() {
            return Err(AutoPayError::validation("method_id", "cannot be empty"));
        }
        if threshold == 0 {
            return Err(AutoPayError::validation("threshold", "must be at least 1"));
        }
        let _guard = self.locks.lock(&method_lock(method_id)).await;
        let (mut settings, is_new) = self.load_method(method_id).await?;
        settings.policy = policy;
        settings.threshold = threshold;
        self.save_method(&settings, is_new).await?;
        debug!(method_id, %policy, threshold, "Updated rotation settings");
        Ok(settings)
    }

    /// Count a use of `method_id`'s endpoint and report whether it should be
    /// rotated now.
    ///
    /// The use is counted even when auto-rotation is disabled.
    #[tracing::instrument(skip(self))]
    pub async fn record_use(&self, method_id: &str) -> Result<bool> {
        let config = self.config().await?;
        let _guard = self.locks.lock(&method_lock(method_id)).await;
        let (mut settings, is_new) = self.load_method(method_id).await?;
        settings.record_use();
        self.save_method(&settings, is_new).await?;

        let should_rotate = config.auto_rotate_enabled && settings.rotation_due();
        debug!(use_count = settings.use_count, should_rotate, "Recorded endpoint use");
        Ok(should_rotate)
    }

    /// Record that `method_id`'s endpoint was replaced.
    ///
    /// The event is written before the method state. If the method state
    /// cannot be saved the event is removed again, so history never shows a
    /// rotation the counters do not.
    #[tracing::instrument(skip(self))]
    pub async fn record_rotation(
        &self,
        method_id: &str,
        reason: RotationReason,
    ) -> Result<RotationEvent> {
        let now = Utc::now();
        let _guard = self.locks.lock(&method_lock(method_id)).await;
        let (mut settings, is_new) = self.load_method(method_id).await?;

        let event = RotationEvent::new(method_id, reason, now);
        self.update_history(|history| history.push_front(event.clone()))
            .await?;

        settings.record_rotation(now);
        if let Err(e) = self.save_method(&settings, is_new).await {
            let undo = self
                .update_history(|history| history.retain(|entry| entry.id != event.id))
                .await;
            if let Err(undo_error) = undo {
                warn!(event_id = %event.id, error = %undo_error, "Could not remove orphaned rotation event");
            }
            return Err(e);
        }

        info!(rotation_count = settings.rotation_count, %reason, "Rotated endpoint");
        Ok(event)
    }

    /// Post-payment hook: count the use and, if due, publish a new endpoint
    /// and record the rotation.
    ///
    /// A publisher failure is logged and returns `None`; the use stays
    /// counted so the next payment tries again. Once the publisher has
    /// answered, its endpoint is returned even if recording the rotation
    /// fails.
    pub async fn on_payment_executed(
        &self,
        method_id: &str,
        publisher: &dyn EndpointPublisher,
    ) -> Result<Option<NewEndpoint>> {
        if !self.record_use(method_id).await? {
            return Ok(None);
        }
        match publisher.rotate(method_id).await {
            Ok(endpoint) => {
                if let Err(e) = self.record_rotation(method_id, RotationReason::Policy).await {
                    warn!(method_id, error = %e, "Endpoint published but rotation not recorded");
                }
                Ok(Some(endpoint))
            }
            Err(e) => {
                warn!(method_id, error = %e, "Endpoint publisher failed, rotation deferred");
                Ok(None)
            }
        }
    }

    /// Rotate immediately regardless of policy.
    pub async fn rotate_now(
        &self,
        method_id: &str,
        publisher: &dyn EndpointPublisher,
        reason: RotationReason,
    ) -> Result<NewEndpoint> {
        let endpoint = publisher.rotate(method_id).await?;
        self.record_rotation(method_id, reason).await?;
        Ok(endpoint)
    }

    /// Rotation events, newest first.
    pub async fn history(&self) -> Result<Vec<RotationEvent>> {
        let history: Option<BoundedHistory<RotationEvent>> =
            load_json(self.store.as_ref(), &self.keys.rotation_history()).await?;
        Ok(history.map(BoundedHistory::into_entries).unwrap_or_default())
    }

    pub async fn clear_history(&self) -> Result<()> {
        let _guard = self.locks.lock(HISTORY_LOCK).await;
        self.store.delete(&self.keys.rotation_history()).await?;
        Ok(())
    }

    /// State of every method that has been used or configured.
    pub async fn list_methods(&self) -> Result<Vec<MethodRotationSettings>> {
        let index = self.load_index().await?;
        let mut methods = Vec::with_capacity(index.len());
        for method_id in index {
            let stored: Option<MethodRotationSettings> =
                load_json(self.store.as_ref(), &self.keys.rotation_method(&method_id)).await?;
            if let Some(settings) = stored {
                methods.push(settings);
            }
        }
        Ok(methods)
    }

    /// Methods that have been rotated at least once.
    pub async fn methods_with_rotations(&self) -> Result<Vec<String>> {
        Ok(self
            .list_methods()
            .await?
            .into_iter()
            .filter(|m| m.rotation_count > 0)
            .map(|m| m.method_id)
            .collect())
    }

    /// Sum of rotations across all methods.
    pub async fn total_rotations(&self) -> Result<u64> {
        Ok(self
            .list_methods()
            .await?
            .iter()
            .map(|m| u64::from(m.rotation_count))
            .sum())
    }

    async fn load_method(&self, method_id: &str) -> Result<(MethodRotationSettings, bool)> {
        let stored: Option<MethodRotationSettings> =
            load_json(self.store.as_ref(), &self.keys.rotation_method(method_id)).await?;
        match stored {
            Some(settings) => Ok((settings, false)),
            None => {
                let config = self.config().await?;
                Ok((MethodRotationSettings::new(method_id, &config), true))
            }
        }
    }

    async fn save_method(&self, settings: &MethodRotationSettings, is_new: bool) -> Result<()> {
        save_json(
            self.store.as_ref(),
            &self.keys.rotation_method(&settings.method_id),
            settings,
        )
        .await?;
        if is_new {
            let _guard = self.locks.lock(INDEX_LOCK).await;
            let mut index = self.load_index().await?;
            if index.insert(settings.method_id.clone()) {
                save_json(self.store.as_ref(), &self.keys.rotation_methods_index(), &index)
                    .await?;
            }
        }
        Ok(())
    }

    async fn update_history(
        &self,
        change: impl FnOnce(&mut BoundedHistory<RotationEvent>),
    ) -> Result<()> {
        let _guard = self.locks.lock(HISTORY_LOCK).await;
        let key = self.keys.rotation_history();
        let mut history: BoundedHistory<RotationEvent> =
            load_json(self.store.as_ref(), &key).await?.unwrap_or_default();
        change(&mut history);
        save_json(self.store.as_ref(), &key, &history).await
    }

    async fn load_index(&self) -> Result<BTreeSet<String>> {
        Ok(load_json(self.store.as_ref(), &self.keys.rotation_methods_index())
            .await?
            .unwrap_or_default())
    }
}
