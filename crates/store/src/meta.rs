//! Versioned key-value metadata store.
//!
//! Every value carries a monotonically increasing version;
//! `compare_and_swap` only applies an update when the caller's expected
//! version still matches, which is the serialization point for all
//! concurrent job-record writers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Storage-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// CAS lost: the value changed since the caller read it.
    #[error("version mismatch on key \"{key}\"")]
    VersionMismatch { key: String },

    /// Insert of a key that already exists (job ids are never reused).
    #[error("key \"{key}\" already exists")]
    AlreadyExists { key: String },

    /// Get/put against a missing key where one was required.
    #[error("key \"{key}\" not found")]
    NotFound { key: String },

    /// Backend failure (I/O, serialization).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A stored value together with its version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub version: u64,
    pub value: serde_json::Value,
}

/// Key-value put/get/compare-and-swap over JSON documents.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Read a value with its current version.
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError>;

    /// Create a key that must not yet exist. Returns the initial version.
    async fn insert(&self, key: &str, value: serde_json::Value) -> Result<u64, StoreError>;

    /// Replace the value only if `expected_version` still matches.
    /// Returns the new version.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: serde_json::Value,
    ) -> Result<u64, StoreError>;

    /// List all entries whose key starts with `prefix`, in key order.
    async fn list_prefix(&self, prefix: &str)
        -> Result<Vec<(String, VersionedValue)>, StoreError>;
}

/// In-memory [`MetaStore`]. The default deployment backend is expected to
/// be an external KV service; this implementation carries the same CAS
/// semantics and backs every test.
#[derive(Default)]
pub struct MemoryMetaStore {
    entries: RwLock<BTreeMap<String, VersionedValue>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn insert(&self, key: &str, value: serde_json::Value) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Err(StoreError::AlreadyExists { key: key.into() });
        }
        entries.insert(key.to_string(), VersionedValue { version: 1, value });
        Ok(1)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: serde_json::Value,
    ) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound { key: key.into() })?;
        if entry.version != expected_version {
            return Err(StoreError::VersionMismatch { key: key.into() });
        }
        entry.version += 1;
        entry.value = value;
        Ok(entry.version)
    }

    async fn list_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedValue)>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = MemoryMetaStore::new();
        let version = store.insert("job/a", json!({"n": 1})).await.unwrap();
        assert_eq!(version, 1);

        let got = store.get("job/a").await.unwrap().unwrap();
        assert_eq!(got.version, 1);
        assert_eq!(got.value, json!({"n": 1}));
    }

    #[tokio::test]
    async fn double_insert_is_rejected() {
        let store = MemoryMetaStore::new();
        store.insert("job/a", json!(1)).await.unwrap();
        let err = store.insert("job/a", json!(2)).await.unwrap_err();
        assert_matches!(err, StoreError::AlreadyExists { .. });
    }

    #[tokio::test]
    async fn cas_applies_only_on_matching_version() {
        let store = MemoryMetaStore::new();
        store.insert("job/a", json!(1)).await.unwrap();

        let v2 = store.compare_and_swap("job/a", 1, json!(2)).await.unwrap();
        assert_eq!(v2, 2);

        // A second writer that read version 1 must lose.
        let err = store.compare_and_swap("job/a", 1, json!(3)).await.unwrap_err();
        assert_matches!(err, StoreError::VersionMismatch { .. });
        assert_eq!(store.get("job/a").await.unwrap().unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn list_prefix_is_key_ordered_and_bounded() {
        let store = MemoryMetaStore::new();
        store.insert("job/b", json!(2)).await.unwrap();
        store.insert("job/a", json!(1)).await.unwrap();
        store.insert("other/z", json!(9)).await.unwrap();

        let jobs = store.list_prefix("job/").await.unwrap();
        let keys: Vec<&str> = jobs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["job/a", "job/b"]);
    }
}
