use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use super::{ObjectStore, StoreError, StoreKind};
use crate::upload::ByteSource;

/// Local filesystem store. Blobs live under an environment-scoped root
/// directory, named by their content key.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// The root directory is created lazily on the first write, not here.
    pub fn new<P: AsRef<Path>>(root: P, environment: &str) -> Self {
        Self {
            root: root.as_ref().join(environment),
        }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        match tokio::fs::create_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(
                StoreError::PermissionDenied(self.root.to_string_lossy().into_owned()),
            ),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Local
    }

    async fn write(&self, key: &str, source: &mut dyn ByteSource) -> Result<(), StoreError> {
        let path = self.blob_path(key);

        // Keys are content-derived, so an existing blob is already the
        // right bytes.
        if path.exists() {
            return Ok(());
        }
        self.ensure_root().await?;

        let mut file = tokio::fs::File::create(&path).await?;
        let mut buf = [0u8; 64 * 1024];
        source.rewind().await?;
        loop {
            let n = source.chunk(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.blob_path(key);
        if !path.exists() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.blob_path(key);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.blob_path(key).exists())
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self.blob_path(key))
    }
}
