//! Storage test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use dropit_storage::{
    ByteStream, FilesystemBackend, ObjectMeta, ObjectStore, StorageError, StorageResult,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// A test storage wrapper that cleans up on drop.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestStorage {
    pub backend: Arc<dyn ObjectStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    /// Create a new test storage with a temporary directory.
    pub async fn new() -> StorageResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path()).await?;

        Ok(Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        })
    }

    /// Get a reference to the object store.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.backend.clone()
    }
}

/// Filesystem store with switchable failures.
#[allow(dead_code)]
pub struct FaultyStorage {
    inner: FilesystemBackend,
    pub fail_put: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_health: AtomicBool,
    pub deletes: AtomicUsize,
}

#[allow(dead_code)]
impl FaultyStorage {
    pub async fn new(root: &Path) -> Arc<Self> {
        let inner = FilesystemBackend::new(root)
            .await
            .expect("Failed to create storage backend");
        Arc::new(Self {
            inner,
            fail_put: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_health: AtomicBool::new(false),
            deletes: AtomicUsize::new(0),
        })
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn injected(flag: &AtomicBool, op: &str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "injected {op} failure"
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FaultyStorage {
    async fn container_exists(&self, container: &str) -> StorageResult<bool> {
        self.inner.container_exists(container).await
    }

    async fn create_container(&self, container: &str) -> StorageResult<()> {
        self.inner.create_container(container).await
    }

    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool> {
        self.inner.exists(container, key).await
    }

    async fn head(&self, container: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(container, key).await
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Bytes> {
        Self::injected(&self.fail_get, "get")?;
        self.inner.get(container, key).await
    }

    async fn get_stream(&self, container: &str, key: &str) -> StorageResult<ByteStream> {
        Self::injected(&self.fail_get, "get")?;
        self.inner.get_stream(container, key).await
    }

    async fn get_to_file(&self, container: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        Self::injected(&self.fail_get, "get")?;
        self.inner.get_to_file(container, key, dest).await
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> StorageResult<()> {
        Self::injected(&self.fail_put, "put")?;
        self.inner.put(container, key, data).await
    }

    async fn put_file(&self, container: &str, key: &str, source: &Path) -> StorageResult<u64> {
        Self::injected(&self.fail_put, "put")?;
        self.inner.put_file(container, key, source).await
    }

    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.fail_delete, "delete")?;
        self.inner.delete(container, key).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn health_check(&self) -> StorageResult<()> {
        Self::injected(&self.fail_health, "health")
    }
}
