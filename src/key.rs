//! Content key functions.
//!
//! A key function maps an upload's byte stream to a stable identifier. Two
//! uploads with identical content get identical keys, which is what drives
//! blob deduplication in the stores.

use std::io;

use async_trait::async_trait;

use crate::upload::ByteSource;

const CHUNK_SIZE: usize = 64 * 1024;

/// Maps a byte stream to a stable content key.
///
/// Implementations must consume the stream in bounded chunks and rewind it
/// before returning, so the caller can read the full content afterwards.
#[async_trait]
pub trait KeyFunction: Send + Sync {
    async fn compute(&self, source: &mut dyn ByteSource) -> io::Result<String>;
}

/// Default key function: hex-encoded SHA-512 of the stream contents.
pub struct Sha512Key;

#[async_trait]
impl KeyFunction for Sha512Key {
    async fn compute(&self, source: &mut dyn ByteSource) -> io::Result<String> {
        let mut ctx = ring::digest::Context::new(&ring::digest::SHA512);
        let mut buf = [0u8; CHUNK_SIZE];

        source.rewind().await?;
        loop {
            let n = source.chunk(&mut buf).await?;
            if n == 0 {
                break;
            }
            ctx.update(&buf[..n]);
        }
        source.rewind().await?;

        Ok(hex_encode(ctx.finish().as_ref()))
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::MemorySource;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_identical_content_identical_keys() {
        let mut a = MemorySource::new(Bytes::from("the same bytes"));
        let mut b = MemorySource::new(Bytes::from("the same bytes"));

        let key_a = Sha512Key.compute(&mut a).await.unwrap();
        let key_b = Sha512Key.compute(&mut b).await.unwrap();
        assert_eq!(key_a, key_b);
        assert_eq!(key_a.len(), 128); // SHA-512 hex
    }

    #[tokio::test]
    async fn test_different_content_different_keys() {
        let mut a = MemorySource::new(Bytes::from("one"));
        let mut b = MemorySource::new(Bytes::from("two"));

        assert_ne!(
            Sha512Key.compute(&mut a).await.unwrap(),
            Sha512Key.compute(&mut b).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_compute_rewinds_source() {
        let mut source = MemorySource::new(Bytes::from("content"));
        Sha512Key.compute(&mut source).await.unwrap();

        let mut buf = [0u8; 16];
        let n = source.chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"content");
    }
}
