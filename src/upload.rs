//! The raw-upload collaborator: a named, rewindable byte stream.

use std::io::{self, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A rewindable stream of bytes with a known length.
///
/// Content keys are computed by digesting the stream in bounded chunks, so
/// sources must support being read more than once via [`ByteSource::rewind`].
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Read the next chunk into `buf`, returning the number of bytes read.
    /// Returns 0 at end of stream.
    async fn chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reset the stream so the next read sees the full content from the start.
    async fn rewind(&mut self) -> io::Result<()>;

    /// Total length of the stream in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory byte source backed by [`Bytes`].
pub struct MemorySource {
    data: Bytes,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data.len() - self.pos;
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    async fn rewind(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A byte source backed by a file on disk.
pub struct FileSource {
    file: tokio::fs::File,
    len: u64,
}

impl FileSource {
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self { file, len })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf).await
    }

    async fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// One uploaded file: its content stream plus the client-supplied filename.
pub struct Upload {
    source: Box<dyn ByteSource>,
    original_filename: String,
}

impl Upload {
    pub fn new(original_filename: impl Into<String>, source: Box<dyn ByteSource>) -> Self {
        Self {
            source,
            original_filename: original_filename.into(),
        }
    }

    pub fn from_bytes(original_filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(
            original_filename,
            Box::new(MemorySource::new(data.into())),
        )
    }

    pub async fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let name = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, Box::new(FileSource::open(path).await?)))
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    /// Filename split into `(basename, extension)`; the extension keeps its
    /// leading dot, matching how it is stored on the metadata record.
    pub fn filename_parts(&self) -> (String, String) {
        split_filename(&self.original_filename)
    }

    pub fn byte_size(&self) -> u64 {
        self.source.len()
    }

    pub fn source_mut(&mut self) -> &mut dyn ByteSource {
        self.source.as_mut()
    }

    /// Read the entire content into memory, leaving the source rewound.
    pub async fn read_all(&mut self) -> io::Result<Bytes> {
        self.source.rewind().await?;
        let mut out = Vec::with_capacity(self.source.len() as usize);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = self.source.chunk(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        self.source.rewind().await?;
        Ok(Bytes::from(out))
    }
}

/// Split a filename into basename and dotted extension.
pub fn split_filename(filename: &str) -> (String, String) {
    let path = Path::new(filename);
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let base = path
        .file_stem()
        .map(|b| b.to_string_lossy().into_owned())
        .unwrap_or_default();
    (base, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_filename() {
        assert_eq!(
            split_filename("manual.pdf"),
            ("manual".to_string(), ".pdf".to_string())
        );
        assert_eq!(split_filename("README"), ("README".to_string(), String::new()));
        assert_eq!(
            split_filename("archive.tar.gz"),
            ("archive.tar".to_string(), ".gz".to_string())
        );
    }

    #[tokio::test]
    async fn test_memory_source_rewind() {
        let mut source = MemorySource::new(Bytes::from("hello world"));
        let mut buf = [0u8; 5];
        assert_eq!(source.chunk(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"hello");

        source.rewind().await.unwrap();
        assert_eq!(source.chunk(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_upload_read_all_rewinds() {
        let mut upload = Upload::from_bytes("a.txt", "some content");
        assert_eq!(upload.read_all().await.unwrap(), Bytes::from("some content"));
        // A second full read must see the same content.
        assert_eq!(upload.read_all().await.unwrap(), Bytes::from("some content"));
    }
}
