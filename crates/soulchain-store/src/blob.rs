//! Content-addressed blob storage.
//!
//! A [`StorageAdapter`] holds the encrypted bundles the ledger points at.
//! Locators are the Blake3 hex digest of the stored bytes, so uploading the
//! same bytes twice yields the same [`StorageRef`] and stores them once.
//!
//! Adapters do not check what they hand back. Integrity is the caller's job,
//! against the `encrypted_hash` anchored on the ledger.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use soulchain_core::StorageRef;

use crate::error::{Result, StoreError};

/// Locator for `data`: lowercase Blake3 hex.
pub fn locator_for(data: &[u8]) -> StorageRef {
    StorageRef::new(blake3::hash(data).to_hex().to_string())
}

fn is_locator(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Where encrypted blobs live.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Store `data` and return its locator. `name` is a hint for logs and
    /// for backends that keep one.
    async fn upload(&self, data: Bytes, name: &str) -> Result<StorageRef>;

    /// Fetch the bytes behind a locator.
    async fn download(&self, locator: &StorageRef) -> Result<Bytes>;

    async fn exists(&self, locator: &StorageRef) -> Result<bool>;
}

#[async_trait]
impl<T: StorageAdapter + ?Sized> StorageAdapter for Arc<T> {
    async fn upload(&self, data: Bytes, name: &str) -> Result<StorageRef> {
        (**self).upload(data, name).await
    }

    async fn download(&self, locator: &StorageRef) -> Result<Bytes> {
        (**self).download(locator).await
    }

    async fn exists(&self, locator: &StorageRef) -> Result<bool> {
        (**self).exists(locator).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Blob store kept in memory. Clones share the same blobs.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the bytes behind an existing locator, breaking content
    /// addressing. Lets tests simulate a misbehaving backend.
    pub fn replace(&self, locator: &StorageRef, data: Bytes) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        match blobs.get_mut(locator.as_str()) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("blob {locator}"))),
        }
    }

    /// Drop a blob. Returns whether it was present.
    pub fn remove(&self, locator: &StorageRef) -> bool {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(locator.as_str())
            .is_some()
    }

    pub fn clear(&self) {
        self.blobs.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl StorageAdapter for MemoryBlobStore {
    async fn upload(&self, data: Bytes, name: &str) -> Result<StorageRef> {
        let locator = locator_for(&data);
        let size = data.len();
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(locator.as_str().to_string())
            .or_insert(data);
        debug!(%locator, name, size, "stored blob in memory");
        Ok(locator)
    }

    async fn download(&self, locator: &StorageRef) -> Result<Bytes> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {locator}")))
    }

    async fn exists(&self, locator: &StorageRef) -> Result<bool> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(locator.as_str()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem
// ─────────────────────────────────────────────────────────────────────────────

/// Blob store under a local directory, one file per locator.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Use `root` as the blob directory. It is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, locator: &StorageRef) -> Result<PathBuf> {
        if !is_locator(locator.as_str()) {
            return Err(StoreError::InvalidData(format!("not a blob locator: {locator}")));
        }
        Ok(self.root.join(locator.as_str()))
    }
}

#[async_trait]
impl StorageAdapter for FsBlobStore {
    async fn upload(&self, data: Bytes, name: &str) -> Result<StorageRef> {
        let locator = locator_for(&data);
        let path = self.path_of(&locator)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(locator);
        }

        tokio::fs::create_dir_all(&self.root).await?;
        // Write then rename so a reader never sees a partial blob.
        let tmp = self.root.join(format!("{}.tmp-{}", locator.as_str(), uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(%locator, name, size = data.len(), "stored blob on disk");
        Ok(locator)
    }

    async fn download(&self, locator: &StorageRef) -> Result<Bytes> {
        let path = self.path_of(locator)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("blob {locator}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, locator: &StorageRef) -> Result<bool> {
        let path = self.path_of(locator)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}
