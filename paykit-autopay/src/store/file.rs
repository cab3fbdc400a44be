//! File-backed store (native only).
//!
//! Each key is stored as `<hex(key)>.json` under the base directory. Writes
//! go to a temporary file that is renamed over the target while an `fs2`
//! exclusive lock is held on a sibling `.lock` file, so a reader never sees
//! a half-written value and two processes never interleave writes.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;

use super::{KeyValueStore, StoreError, StoreErrorCode, StoreResult};

/// File-based implementation of [`KeyValueStore`].
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|e| {
            StoreError::unavailable(format!(
                "failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        Ok(Self { base_path })
    }

    /// Root directory of this store.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", hex::encode(key)))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.lock", hex::encode(key)))
    }

    fn with_lock<T>(
        &self,
        key: &str,
        code: StoreErrorCode,
        op: impl FnOnce() -> std::io::Result<T>,
    ) -> StoreResult<T> {
        let io_err = |e: std::io::Error| StoreError::with_key(code, e.to_string(), key);

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(key))
            .map_err(io_err)?;

        // Blocks until other writers release the key
        lock_file.lock_exclusive().map_err(io_err)?;
        let result = op().map_err(io_err);
        lock_file.unlock().map_err(io_err)?;
        result
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.value_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::with_key(
                StoreErrorCode::ReadFailed,
                e.to_string(),
                key,
            )),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.value_path(key);
        let tmp = path.with_extension("json.tmp");
        self.with_lock(key, StoreErrorCode::WriteFailed, || {
            fs::write(&tmp, value)?;
            fs::rename(&tmp, &path)
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.value_path(key);
        self.with_lock(key, StoreErrorCode::DeleteFailed, || {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_roundtrip_and_delete() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store")).unwrap();

        assert!(store.get("paykit.autopay.default.settings").await.unwrap().is_none());

        store
            .set("paykit.autopay.default.settings", b"{\"a\":1}")
            .await
            .unwrap();
        assert_eq!(
            store.get("paykit.autopay.default.settings").await.unwrap(),
            Some(b"{\"a\":1}".to_vec())
        );

        store.delete("paykit.autopay.default.settings").await.unwrap();
        assert!(store.get("paykit.autopay.default.settings").await.unwrap().is_none());
        store.delete("paykit.autopay.default.settings").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_with_path_characters_stay_inside_base() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.set("../escape/key", b"x").await.unwrap();
        assert_eq!(store.get("../escape/key").await.unwrap(), Some(b"x".to_vec()));
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::new(dir.path()).unwrap();
            store.set("k", b"persisted").await.unwrap();
        }
        let store = FileStore::new(dir.path()).unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"persisted".to_vec()));
    }
}
