//! Retrieval pipeline: fetch a granted file and hand back a self-cleaning stream.

use super::stage::{DownloadStream, StageArea, StagePurpose};
use crate::metrics;
use dropit_core::FileRecord;
use dropit_storage::{ObjectStore, StorageError};
use std::sync::Arc;

/// Retrieval pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("staging failed: {0}")]
    Stage(#[from] std::io::Error),
}

/// A fetched file ready to be streamed.
pub struct Download {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Owns the staged copy; the file is removed when the stream ends or is dropped.
    pub body: DownloadStream,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// Fetches stored objects into staging and streams them out.
pub struct RetrievalPipeline {
    storage: Arc<dyn ObjectStore>,
    stage: Arc<StageArea>,
    container: String,
}

impl RetrievalPipeline {
    pub fn new(storage: Arc<dyn ObjectStore>, stage: Arc<StageArea>, container: String) -> Self {
        Self {
            storage,
            stage,
            container,
        }
    }

    /// Fetch the object behind `record`.
    ///
    /// Callers consume a download before calling this; a failure here does
    /// not give the download back.
    #[tracing::instrument(skip(self, record), fields(file_id = %record.id))]
    pub async fn fetch(&self, record: &FileRecord) -> Result<Download, RetrievalError> {
        let staged = self.stage.allocate(StagePurpose::Download, record.id);

        let size_bytes = match self
            .storage
            .get_to_file(&self.container, &record.storage_key, staged.path())
            .await
        {
            Ok(size) => size,
            Err(e) => {
                metrics::RETRIEVAL_FAILURES.inc();
                tracing::error!(
                    file_id = %record.id,
                    storage_key = %record.storage_key,
                    error = %e,
                    "Failed to fetch stored object"
                );
                let _ = staged.remove().await;
                return Err(e.into());
            }
        };

        if size_bytes != record.size_bytes {
            tracing::warn!(
                file_id = %record.id,
                recorded = record.size_bytes,
                fetched = size_bytes,
                "Stored object size differs from record"
            );
        }

        let body = match staged.into_stream().await {
            Ok(body) => body,
            Err(e) => {
                metrics::RETRIEVAL_FAILURES.inc();
                tracing::error!(file_id = %record.id, error = %e, "Failed to open staged download");
                return Err(e.into());
            }
        };

        Ok(Download {
            filename: record.download_name().to_string(),
            content_type: record.content_type.clone(),
            size_bytes,
            body,
        })
    }
}
