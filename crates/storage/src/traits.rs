//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncWriteExt;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store addressed by `(container, key)`.
///
/// A container is a bucket on S3 and a directory on the filesystem backend.
/// Writes to a key that already exists replace the previous object.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if a container exists.
    async fn container_exists(&self, container: &str) -> StorageResult<bool>;

    /// Create a container. Fails with `AlreadyExists` if it is present.
    async fn create_container(&self, container: &str) -> StorageResult<()>;

    /// Create a container unless it already exists.
    ///
    /// Safe to call concurrently: losing a creation race to another caller
    /// is not an error.
    async fn ensure_container(&self, container: &str) -> StorageResult<()> {
        if self.container_exists(container).await? {
            return Ok(());
        }
        match self.create_container(container).await {
            Ok(()) => {
                tracing::info!(container = %container, backend = self.backend_name(), "Created container");
                Ok(())
            }
            Err(StorageError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Check if an object exists.
    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, container: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, container: &str, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, container: &str, key: &str) -> StorageResult<ByteStream>;

    /// Copy an object into a local file, returning the bytes written.
    ///
    /// On error the destination may hold a partial copy; removing it is the
    /// caller's job.
    async fn get_to_file(&self, container: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        let mut stream = self.get_stream(container, key).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Put an object from memory.
    async fn put(&self, container: &str, key: &str, data: Bytes) -> StorageResult<()>;

    /// Put an object from a local file, returning the stored size.
    ///
    /// The object is either stored completely or not at all.
    async fn put_file(&self, container: &str, key: &str, source: &Path) -> StorageResult<u64>;

    /// Delete an object. Missing objects yield `NotFound`.
    async fn delete(&self, container: &str, key: &str) -> StorageResult<()>;

    /// Static identifier for the backend type (e.g., "s3", "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and usable.
    ///
    /// The default implementation returns Ok(()).
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}
