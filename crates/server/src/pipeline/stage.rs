//! Local staging files.
//!
//! Uploads land on disk before they are handed to the object store, and
//! downloads are copied to disk before the first byte is streamed. Every
//! staged path is owned by a [`StagedFile`] guard that removes it when the
//! guard is dropped, so an early return, an error or an abandoned client
//! never leaves the file behind.

use bytes::Bytes;
use dropit_core::FileId;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Body stream handed to the HTTP layer for downloads.
pub type DownloadStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Why a staged file is being written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagePurpose {
    Upload,
    Download,
}

impl StagePurpose {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

/// Errors while filling a staged file from a body stream.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("staging I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("request body failed: {0}")]
    Body(String),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Directory holding request-private staging files.
#[derive(Debug)]
pub struct StageArea {
    root: PathBuf,
}

impl StageArea {
    /// Create the staging directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a unique staging path for one file operation.
    ///
    /// Nothing is created on disk until the file is written.
    pub fn allocate(&self, purpose: StagePurpose, id: FileId) -> StagedFile {
        let name = format!("{}-{}-{}.part", purpose.as_str(), id, Uuid::new_v4());
        StagedFile {
            path: self.root.join(name),
            file_id: id,
            armed: true,
        }
    }
}

/// Guard over one staging path.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    file_id: FileId,
    armed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a body stream to the staging path, returning the byte count.
    ///
    /// With a `limit`, the write stops as soon as the body grows past it.
    pub async fn fill<S, E>(&mut self, body: S, limit: Option<u64>) -> Result<u64, StageError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        let mut file = tokio::fs::File::create(&self.path).await?;
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StageError::Body(e.to_string()))?;
            written += chunk.len() as u64;
            if let Some(limit) = limit
                && written > limit
            {
                return Err(StageError::TooLarge { limit });
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Remove the staged file now, reporting failures to the caller.
    pub async fn remove(mut self) -> io::Result<()> {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(file_id = %self.file_id, path = %self.path.display(), "Removed staged file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                crate::metrics::STAGE_CLEANUP_FAILURES.inc();
                tracing::warn!(
                    file_id = %self.file_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove staged file"
                );
                Err(e)
            }
        }
    }

    /// Stream the staged file, moving the guard into the stream.
    ///
    /// The file is removed once the stream ends, fails, or is dropped.
    pub async fn into_stream(self) -> io::Result<DownloadStream> {
        let file = tokio::fs::File::open(&self.path).await?;
        let stream = async_stream::stream! {
            let guard = self;
            let mut reader = ReaderStream::new(file);
            while let Some(chunk) = reader.next().await {
                let failed = chunk.is_err();
                yield chunk;
                if failed {
                    break;
                }
            }
            drop(reader);
            let _ = guard.remove().await;
        };
        Ok(Box::pin(stream))
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                crate::metrics::STAGE_CLEANUP_FAILURES.inc();
                tracing::warn!(
                    file_id = %self.file_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove staged file on drop"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> + Send {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn area() -> (tempfile::TempDir, StageArea) {
        let dir = tempfile::tempdir().unwrap();
        let area = StageArea::new(dir.path().join("staging")).await.unwrap();
        (dir, area)
    }

    #[tokio::test]
    async fn fill_and_drop_removes_file() {
        let (_dir, area) = area().await;
        let mut staged = area.allocate(StagePurpose::Upload, FileId::new());
        let written = staged.fill(body(&[b"hello ", b"world"]), None).await.unwrap();
        assert_eq!(written, 11);

        let path = staged.path().to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn fill_rejects_oversized_body() {
        let (_dir, area) = area().await;
        let mut staged = area.allocate(StagePurpose::Upload, FileId::new());
        let result = staged.fill(body(&[b"12345", b"67890"]), Some(8)).await;
        assert!(matches!(result, Err(StageError::TooLarge { limit: 8 })));
    }

    #[tokio::test]
    async fn fill_surfaces_body_errors() {
        let (_dir, area) = area().await;
        let mut staged = area.allocate(StagePurpose::Upload, FileId::new());
        let failing = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::other("client went away")),
        ]);
        let result = staged.fill(failing, None).await;
        assert!(matches!(result, Err(StageError::Body(msg)) if msg.contains("went away")));
    }

    #[tokio::test]
    async fn stream_removes_file_when_finished() {
        let (_dir, area) = area().await;
        let mut staged = area.allocate(StagePurpose::Download, FileId::new());
        staged.fill(body(&[b"payload"]), None).await.unwrap();
        let path = staged.path().to_path_buf();

        let mut stream = staged.into_stream().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"payload");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn abandoned_stream_removes_file() {
        let (_dir, area) = area().await;
        let mut staged = area.allocate(StagePurpose::Download, FileId::new());
        staged.fill(body(&[b"payload"]), None).await.unwrap();
        let path = staged.path().to_path_buf();

        let stream = staged.into_stream().await.unwrap();
        drop(stream);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn explicit_remove_tolerates_missing_file() {
        let (_dir, area) = area().await;
        let staged = area.allocate(StagePurpose::Upload, FileId::new());
        staged.remove().await.unwrap();
    }
}
