//! Local filesystem storage backend.
//!
//! Containers are directories directly under the storage root; objects are
//! files inside them.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a container name and return its directory.
    fn container_path(&self, container: &str) -> StorageResult<PathBuf> {
        let mut components = Path::new(container).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None)
                if !container.contains(['/', '\\']) && !container.starts_with('.') =>
            {
                Ok(self.root.join(container))
            }
            _ => Err(StorageError::InvalidKey(format!(
                "invalid container name: {container:?}"
            ))),
        }
    }

    /// Get the full path for an object, with path traversal protection.
    ///
    /// Runs the checks on the blocking pool since they touch the filesystem
    /// (`canonicalize`, `symlink_metadata`).
    async fn object_path(&self, container: &str, key: &str) -> StorageResult<PathBuf> {
        let container_root = self.container_path(container)?;
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::object_path_sync(&root, &container_root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Returns an error if the key would escape the storage root, including
    /// through symlinks.
    fn object_path_sync(root: &Path, container_root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in Path::new(key).components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }

        let path = container_root.join(key);

        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Walk from the object itself up to the nearest existing ancestor;
        // whatever exists must resolve inside the root.
        let mut candidate = Some(path.as_path());
        while let Some(current) = candidate {
            match std::fs::symlink_metadata(current) {
                Ok(meta) => {
                    let canonical = current.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize path: {e}"),
                            ))
                        }
                    })?;

                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat path: {err}"),
                    )));
                }
            }
            candidate = current.parent();
        }

        Ok(path)
    }

    /// Fail with `ContainerNotFound` unless the container directory exists,
    /// then create any nested parent directories for the object.
    async fn prepare_write(&self, container: &str, path: &Path) -> StorageResult<()> {
        let container_root = self.container_path(container)?;
        if !fs::try_exists(&container_root).await? {
            return Err(StorageError::ContainerNotFound(container.to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        )
    }

    fn not_found(e: std::io::Error, container: &str, key: &str) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(format!("{container}/{key}"))
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn container_exists(&self, container: &str) -> StorageResult<bool> {
        let path = self.container_path(container)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn create_container(&self, container: &str) -> StorageResult<()> {
        let path = self.container_path(container)?;
        fs::create_dir(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                StorageError::AlreadyExists(container.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool> {
        let path = self.object_path(container, key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, container: &str, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.object_path(container, key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found(e, container, key))?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, container: &str, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(container, key).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::not_found(e, container, key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, container: &str, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.object_path(container, key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found(e, container, key))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, container: &str, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.object_path(container, key).await?;
        self.prepare_write(container, &path).await?;

        // Unique temp name so concurrent writers of one key never collide.
        let temp_path = Self::temp_path(&path);
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_file(&self, container: &str, key: &str, source: &Path) -> StorageResult<u64> {
        let path = self.object_path(container, key).await?;
        self.prepare_write(container, &path).await?;

        let temp_path = Self::temp_path(&path);
        let result = async {
            let copied = fs::copy(source, &temp_path).await?;
            fs::File::open(&temp_path).await?.sync_all().await?;
            fs::rename(&temp_path, &path).await?;
            Ok::<_, std::io::Error>(copied)
        }
        .await;

        match result {
            Ok(copied) => Ok(copied),
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(StorageError::Io(e))
            }
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(container, key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::not_found(e, container, key))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
