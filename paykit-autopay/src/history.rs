//! Bounded newest-first histories.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::Mutex;

use crate::store::{load_json, save_json, KeyValueStore, StoreKeys};
use crate::Result;

/// Maximum number of entries any history keeps.
pub const HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity list that keeps the newest entry first.
///
/// The cap is enforced on every insert and on deserialization, so a
/// history read back from disk never exceeds it either.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedHistory<T> {
    entries: Vec<T>,
}

impl<T> BoundedHistory<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build from entries already ordered newest first, dropping the oldest
    /// beyond capacity.
    pub fn from_entries(mut entries: Vec<T>) -> Self {
        entries.truncate(HISTORY_CAPACITY);
        Self { entries }
    }

    /// Prepend an entry, evicting the oldest when full.
    pub fn push_front(&mut self, entry: T) {
        self.entries.insert(0, entry);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<T> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.entries.retain(keep);
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Serialize for BoundedHistory<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for BoundedHistory<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(Self::from_entries)
    }
}

/// How the engine disposed of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoPayOutcome {
    AutoPaid,
    Denied,
    NeedsApproval,
    Failed,
    Expired,
    UserDeclined,
    UserApproved,
}

/// One entry in the auto-pay history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoPayHistoryEntry {
    pub id: String,
    pub request_id: String,
    pub peer_id: String,
    pub method_id: String,
    pub amount_sats: u64,
    pub outcome: AutoPayOutcome,
    /// Rule that decided the outcome, if any.
    pub rule_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AutoPayHistoryEntry {
    pub fn new(
        request_id: impl Into<String>,
        peer_id: impl Into<String>,
        method_id: impl Into<String>,
        amount_sats: u64,
        outcome: AutoPayOutcome,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            peer_id: peer_id.into(),
            method_id: method_id.into(),
            amount_sats,
            outcome,
            rule_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_rule(mut self, rule_id: Option<String>) -> Self {
        self.rule_id = rule_id;
        self
    }
}

/// Persistent record of what auto-pay did.
pub struct AutoPayHistory {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    lock: Mutex<()>,
}

impl AutoPayHistory {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StoreKeys) -> Self {
        Self {
            store,
            keys,
            lock: Mutex::new(()),
        }
    }

    /// Entries, newest first.
    pub async fn entries(&self) -> Result<Vec<AutoPayHistoryEntry>> {
        let history: Option<BoundedHistory<AutoPayHistoryEntry>> =
            load_json(self.store.as_ref(), &self.keys.autopay_history()).await?;
        Ok(history.map(BoundedHistory::into_entries).unwrap_or_default())
    }

    pub async fn record(&self, entry: AutoPayHistoryEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let key = self.keys.autopay_history();
        let mut history: BoundedHistory<AutoPayHistoryEntry> =
            load_json(self.store.as_ref(), &key).await?.unwrap_or_default();
        history.push_front(entry);
        save_json(self.store.as_ref(), &key, &history).await
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.delete(&self.keys.autopay_history()).await?;
        Ok(())
    }
}
