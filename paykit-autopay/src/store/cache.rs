//! Read-through cache over another store.
//!
//! A key is populated on its first read and updated on every successful
//! write through this wrapper. A failed write invalidates the entry, since
//! an at-least-once backend may or may not have applied it. For the same
//! reason a read that overlaps a failed write is answered but not cached.
//! Absent keys are cached too, so repeated lookups of unset settings stay off the backend.
//!
//! All writers must go through the same `CachedStore` instance; writes made
//! directly to the inner store are not observed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{KeyValueStore, StoreResult};

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Option<Vec<u8>>>,
    /// Bumped when a write through this wrapper finishes, successful or not.
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, key: &str) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        *self.generations.entry(key.to_string()).or_default() += 1;
    }
}

/// Caching decorator implementing [`KeyValueStore`].
pub struct CachedStore {
    inner: Arc<dyn KeyValueStore>,
    state: RwLock<CacheState>,
}

impl CachedStore {
    /// Wrap `inner` with an empty cache.
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clear();
    }

    /// Number of cached keys (including cached absences).
    pub fn cached_len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    fn finish_write(&self, key: &str, value: Option<Option<Vec<u8>>>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.bump(key);
        match value {
            Some(value) => {
                state.entries.insert(key.to_string(), value);
            }
            None => {
                state.entries.remove(key);
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for CachedStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let generation = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = state.entries.get(key) {
                return Ok(hit.clone());
            }
            state.generation(key)
        };

        let loaded = self.inner.get(key).await?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        // A write that landed while we were reading wins over our snapshot
        if let Some(current) = state.entries.get(key) {
            return Ok(current.clone());
        }
        // A write that failed meanwhile may still have been applied
        if state.generation(key) == generation {
            state.entries.insert(key.to_string(), loaded.clone());
        }
        Ok(loaded)
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let result = self.inner.set(key, value).await;
        let cached = result.is_ok().then(|| Some(value.to_vec()));
        self.finish_write(key, cached);
        result
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let result = self.inner.delete(key).await;
        let cached = result.is_ok().then_some(None);
        self.finish_write(key, cached);
        result
    }
}
