//! Per-store key/value persistence handle.
//!
//! Each registered store gets one of these at `init`. Values are JSON,
//! cached in process behind a `parking_lot::RwLock` and flushed to a single
//! JSON file per store on every write — the same read-merge-write shape as
//! a settings file, sized for store bookkeeping (cursors, schema markers),
//! not user data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::contract::StoreResult;

/// Cloneable handle to one store's key/value state file.
#[derive(Clone)]
pub struct KvHandle {
    path: PathBuf,
    cache: Arc<RwLock<Map<String, Value>>>,
}

impl KvHandle {
    /// Open (or create) the state file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let cache = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            Map::new()
        };
        Ok(Self {
            path,
            cache: Arc::new(RwLock::new(cache)),
        })
    }

    /// File backing this handle.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.cache.read().get(key).cloned()
    }

    /// Write one value and flush to disk.
    pub fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        let snapshot = {
            let mut cache = self.cache.write();
            let _ = cache.insert(key.to_string(), value);
            cache.clone()
        };
        self.flush(&snapshot)
    }

    /// Remove one value and flush to disk. Returns the removed value.
    pub fn delete(&self, key: &str) -> StoreResult<Option<Value>> {
        let (removed, snapshot) = {
            let mut cache = self.cache.write();
            let removed = cache.remove(key);
            (removed, cache.clone())
        };
        self.flush(&snapshot)?;
        Ok(removed)
    }

    fn flush(&self, snapshot: &Map<String, Value>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(snapshot)?)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvHandle::open(dir.path().join("store.json")).unwrap();

        kv.put("cursor", json!(42)).unwrap();
        assert_eq!(kv.get("cursor"), Some(json!(42)));

        let removed = kv.delete("cursor").unwrap();
        assert_eq!(removed, Some(json!(42)));
        assert!(kv.get("cursor").is_none());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let kv = KvHandle::open(&path).unwrap();
            kv.put("schema", json!("v1")).unwrap();
        }
        let reopened = KvHandle::open(&path).unwrap();
        assert_eq!(reopened.get("schema"), Some(json!("v1")));
    }

    #[test]
    fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvHandle::open(dir.path().join("store.json")).unwrap();
        assert!(kv.get("absent").is_none());
    }
}
