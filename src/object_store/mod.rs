mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::upload::ByteSource;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Permission denied creating {0}")]
    PermissionDenied(String),
    #[error("Storage misconfigured: {0}")]
    Configuration(String),
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("This store does not support {0}")]
    Unsupported(&'static str),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Identifies which backend wrote a blob. Recorded on every metadata record
/// so the blob can be located again regardless of the current default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Local,
    S3,
}

/// Options for signed URL generation.
#[derive(Debug, Clone)]
pub struct UrlOptions {
    /// How long the URL stays valid, in seconds.
    pub expires_in: u64,
    pub method: UrlMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlMethod {
    Get,
    Head,
}

impl Default for UrlOptions {
    fn default() -> Self {
        Self {
            expires_in: 900,
            method: UrlMethod::Get,
        }
    }
}

/// Abstraction over blob storage backends.
/// Keys are content hashes -- identical uploads land on one physical blob.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Write the source's full content under `key`. Idempotent at the
    /// content-key granularity: rewriting an existing key is a no-op or a
    /// bit-identical overwrite.
    async fn write(&self, key: &str, source: &mut dyn ByteSource) -> Result<(), StoreError>;

    async fn read(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Delete the blob at `key`. Must not error when the key does not exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Filesystem path of the blob, for stores that have one.
    fn path(&self, _key: &str) -> Result<PathBuf, StoreError> {
        Err(StoreError::Unsupported("path"))
    }

    /// Time-limited signed URL for direct access, for stores that have one.
    async fn url(&self, _key: &str, _options: UrlOptions) -> Result<String, StoreError> {
        Err(StoreError::Unsupported("url"))
    }
}

/// Registry of configured store instances keyed by [`StoreKind`].
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<StoreKind, Arc<dyn ObjectStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, store: Arc<dyn ObjectStore>) {
        self.stores.insert(store.kind(), store);
    }

    pub fn get(&self, kind: StoreKind) -> Result<Arc<dyn ObjectStore>, StoreError> {
        self.stores
            .get(&kind)
            .cloned()
            .ok_or_else(|| StoreError::Configuration(format!("no store registered for {kind:?}")))
    }
}
