//! Blob storage for chunk inputs/outputs and final artifacts.
//!
//! References are opaque strings minted by the store; the orchestrator
//! only ever threads them through job and chunk records.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::meta::StoreError;

/// put(bytes) -> reference, get(reference) -> bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> Result<String, StoreError>;
    async fn get(&self, reference: &str) -> Result<Vec<u8>, StoreError>;
}

/// Filesystem-backed blob store: one file per blob under a root directory,
/// named by a fresh UUID.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf, StoreError> {
        // References are UUIDs we minted; anything else is rejected before
        // it can traverse outside the root.
        let id = uuid::Uuid::parse_str(reference).map_err(|_| StoreError::NotFound {
            key: reference.into(),
        })?;
        Ok(self.root.join(id.to_string()))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<String, StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let reference = uuid::Uuid::now_v7().to_string();
        let path = self.root.join(&reference);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: reference.into(),
            }),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<String, StoreError> {
        let reference = uuid::Uuid::now_v7().to_string();
        self.blobs.write().await.insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: reference.into(),
            })
    }
}
