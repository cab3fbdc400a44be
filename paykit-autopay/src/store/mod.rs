//! Durable key-value storage.
//!
//! The ledger and rotation state are persisted through the [`KeyValueStore`]
//! trait. The store offers no cross-key transactions; callers that need
//! atomicity across several keys hold a [`KeyedLocks`](crate::locks::KeyedLocks)
//! section and compensate partial writes themselves.
//!
//! # Implementations
//!
//! - [`MemoryStore`]: testing and development, with fault injection
//! - [`FileStore`]: one JSON file per key (native only)
//! - [`CachedStore`]: read-through cache over any other store

mod cache;
#[cfg(not(target_arch = "wasm32"))]
mod file;
mod keys;
mod memory;

pub use cache::CachedStore;
#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStore;
pub use keys::StoreKeys;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Error codes for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StoreErrorCode {
    /// Backend could not be reached or is locked
    Unavailable = 1000,
    /// Read failed
    ReadFailed = 2000,
    /// Write failed
    WriteFailed = 3000,
    /// Delete failed
    DeleteFailed = 3001,
    /// Internal error
    Internal = 9999,
}

/// Error type for store operations.
#[derive(Debug, Clone)]
pub struct StoreError {
    /// Error code for FFI/mobile integration
    pub code: StoreErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Key the operation touched (if applicable)
    pub key: Option<String>,
}

impl StoreError {
    /// Create a new error.
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            key: None,
        }
    }

    /// Create a new error with the associated key.
    pub fn with_key(code: StoreErrorCode, message: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create an "unavailable" error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Unavailable, reason)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(key) = &self.key {
            write!(f, "{} (key: {})", self.message, key)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for StoreError {}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable key-value store consumed by the ledger and rotation controller.
///
/// Implementations must provide read-your-writes: a `get` issued after a
/// successful `set` on the same key observes the new value.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Load and decode a JSON value.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> crate::Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and store a JSON value.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> crate::Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, &bytes).await?;
    Ok(())
}
