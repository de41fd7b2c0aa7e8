//! Opaque byte store behind a narrow capability set.
//!
//! Providers persist bytes under caller-supplied string keys and record
//! nothing else; all metadata lives in the file registry. Multiple providers
//! may coexist because every file row pins the `provider_id` it was written
//! with.

mod local;

pub use local::LocalDiskStorage;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Longest key a provider must accept.
pub const MAX_KEY_BYTES: usize = 1000;

/// Owned stream handed out by [`StorageProvider::open_read`].
pub type ByteStream = std::pin::Pin<Box<dyn AsyncRead + Send>>;

/// Borrowed stream accepted by [`StorageProvider::put`]; pass with
/// `std::pin::pin!(reader)` so request-scoped bodies can flow straight in.
pub type ByteSource<'a> = std::pin::Pin<&'a mut (dyn AsyncRead + Send)>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stable identifier recorded on every file row written through this
    /// provider.
    fn provider_id(&self) -> &str;

    /// Persist the full stream under `key`, all-or-nothing from a reader's
    /// perspective. Returns the number of bytes written. Overwrites an
    /// existing object at the same key.
    async fn put(
        &self,
        key: &str,
        reader: ByteSource<'_>,
        content_type: Option<&str>,
    ) -> Result<u64, StorageError>;

    /// `None` iff the key is absent.
    async fn open_read(&self, key: &str) -> Result<Option<ByteStream>, StorageError>;

    /// Idempotent; `true` when bytes were actually removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn size(&self, key: &str) -> Result<Option<i64>, StorageError>;
}

/// Wraps a stream so the SHA-256 of everything read through it can be
/// recovered afterwards. Used to checksum uploads in the same pass that
/// copies them into place.
pub struct HashingReader<R> {
    inner: R,
    hasher: std::sync::Arc<std::sync::Mutex<sha2::Sha256>>,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> (Self, std::sync::Arc<std::sync::Mutex<sha2::Sha256>>) {
        let hasher = std::sync::Arc::new(std::sync::Mutex::new(<sha2::Sha256 as sha2::Digest>::new()));
        (
            Self {
                inner,
                hasher: std::sync::Arc::clone(&hasher),
            },
            hasher,
        )
    }
}

/// Hex digest of everything a [`HashingReader`] has seen so far.
pub fn finish_hash(hasher: &std::sync::Arc<std::sync::Mutex<sha2::Sha256>>) -> String {
    use sha2::Digest;
    let hasher = hasher.lock().expect("hasher lock").clone();
    hex::encode(hasher.finalize())
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use sha2::Digest;
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = std::pin::Pin::new(&mut this.inner).poll_read(cx, buf);
        if let std::task::Poll::Ready(Ok(())) = &poll {
            let fresh = &buf.filled()[before..];
            if !fresh.is_empty() {
                this.hasher.lock().expect("hasher lock").update(fresh);
            }
        }
        poll
    }
}

/// Keys are opaque to providers but must be printable, relative and bounded.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let printable = key
        .chars()
        .all(|c| !c.is_control() && c != '\\');
    if key.is_empty()
        || key.len() > MAX_KEY_BYTES
        || !printable
        || key.starts_with('/')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_reader_digests_what_flows_through() {
        use tokio::io::AsyncReadExt;

        let (mut reader, hasher) = HashingReader::new(&b"abc"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
        // sha256("abc")
        assert_eq!(
            finish_hash(&hasher),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn key_validation_rejects_traversal_and_oversize() {
        assert!(validate_key("ws/proj/files/abc.ifc").is_ok());
        assert!(validate_key("/absolute").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_BYTES + 1)).is_err());
        assert!(validate_key("bad\u{7}key").is_err());
    }
}
