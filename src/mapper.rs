//! Transform pipeline: derive one or more variants from a raw upload.
//!
//! A [`Transform`] is invoked once per save cycle with the upload and a
//! [`Mapper`]. Each `mapper.write(ext, fill)` call hands the fill closure a
//! scratch-file path to produce one variant; variants are persisted in
//! write-call order (the first one is the field's primary value) and their
//! scratch files are removed once consumed.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::upload::{FileSource, Upload};

/// A user-supplied function deriving variants from an upload (e.g. image
/// resizing).
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(&self, upload: &mut Upload, mapper: &mut Mapper) -> io::Result<()>;
}

/// One derived output: a scratch file plus its suggested filename.
/// Consumed exactly once by the lifecycle coordinator.
#[derive(Debug)]
pub struct Variant {
    path: PathBuf,
    filename: String,
}

impl Variant {
    /// Open the scratch file as an upload for persistence.
    pub(crate) async fn open(&self) -> io::Result<Upload> {
        Ok(Upload::new(
            self.filename.clone(),
            Box::new(FileSource::open(&self.path).await?),
        ))
    }

    /// Remove the backing scratch file.
    pub(crate) async fn discard(self) {
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}

/// Collects variant outputs under a dedicated scratch directory.
pub struct Mapper {
    scratch_dir: PathBuf,
    outputs: Vec<Variant>,
}

impl Mapper {
    pub fn new<P: AsRef<Path>>(scratch_dir: P) -> Self {
        Self {
            scratch_dir: scratch_dir.as_ref().to_path_buf(),
            outputs: Vec::new(),
        }
    }

    /// Produce one variant with the given extension. The fill closure
    /// receives a scratch-file path to write; a variant whose scratch file
    /// is never written is dropped.
    pub async fn write<F, Fut>(&mut self, extension: &str, fill: F) -> io::Result<()>
    where
        F: FnOnce(PathBuf) -> Fut + Send,
        Fut: Future<Output = io::Result<()>> + Send,
    {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let extension = normalize_extension(extension);
        let name = uuid::Uuid::new_v4().simple().to_string();
        let path = self.scratch_dir.join(format!("{name}{extension}"));

        fill(path.clone()).await?;

        if !path.exists() {
            return Ok(());
        }

        self.outputs.push(Variant {
            path,
            filename: format!("{name}{extension}"),
        });
        Ok(())
    }

    pub(crate) fn into_outputs(self) -> Vec<Variant> {
        self.outputs
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

fn normalize_extension(extension: &str) -> String {
    if extension.is_empty() || extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_collects_outputs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut mapper = Mapper::new(dir.path());

        mapper
            .write("png", |path| async move { tokio::fs::write(&path, b"first").await })
            .await
            .unwrap();
        mapper
            .write(".png", |path| async move { tokio::fs::write(&path, b"second").await })
            .await
            .unwrap();

        let outputs = mapper.into_outputs();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].filename.ends_with(".png"));
        assert_eq!(tokio::fs::read(&outputs[0].path).await.unwrap(), b"first");
        assert_eq!(tokio::fs::read(&outputs[1].path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_unwritten_variant_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut mapper = Mapper::new(dir.path());

        mapper.write("jpg", |_path| async move { Ok(()) }).await.unwrap();
        assert_eq!(mapper.output_count(), 0);
    }

    #[tokio::test]
    async fn test_discard_removes_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut mapper = Mapper::new(dir.path());
        mapper
            .write("bin", |path| async move { tokio::fs::write(&path, b"x").await })
            .await
            .unwrap();

        let variant = mapper.into_outputs().pop().unwrap();
        let path = variant.path.clone();
        variant.discard().await;
        assert!(!path.exists());
    }
}
