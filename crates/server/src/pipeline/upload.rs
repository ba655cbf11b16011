//! Upload pipeline: stage, store, hash, record.

use super::stage::{StageArea, StageError, StagePurpose};
use crate::metrics;
use bytes::Bytes;
use dropit_core::{FileId, FileRecord, PasswordHasher, UploadRequest, sanitize_filename, storage_key};
use dropit_metadata::{MetadataError, MetadataStore};
use dropit_storage::{ObjectStore, StorageError};
use futures::Stream;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use time::{Duration, OffsetDateTime};

/// Upload pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("a filename is required")]
    MissingFilename,

    #[error("request body failed: {0}")]
    Body(String),

    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("staging failed: {0}")]
    Stage(#[source] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("password hashing failed: {0}")]
    Credential(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl From<StageError> for UploadError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::Io(e) => Self::Stage(e),
            StageError::Body(msg) => Self::Body(msg),
            StageError::TooLarge { limit } => Self::TooLarge { limit },
        }
    }
}

/// Settings the upload pipeline needs from configuration.
#[derive(Clone, Debug)]
pub struct UploadSettings {
    /// Container every object is written to.
    pub container: String,
    /// Lifetime applied when the request asks for the default.
    pub default_expiration: Duration,
    /// Body size limit; `None` means unlimited.
    pub max_upload_bytes: Option<u64>,
}

/// Result of a committed upload.
#[derive(Clone, Debug)]
pub struct UploadReceipt {
    pub record: FileRecord,
}

/// Turns an upload request and its body into a stored object plus record.
pub struct UploadPipeline {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    hasher: PasswordHasher,
    stage: Arc<StageArea>,
    settings: UploadSettings,
}

impl UploadPipeline {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        hasher: PasswordHasher,
        stage: Arc<StageArea>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            storage,
            metadata,
            hasher,
            stage,
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Run the full upload.
    ///
    /// Either the object and its record both exist afterwards or neither
    /// does; the only exception is a failed rollback delete, which is logged
    /// and counted as an orphan.
    #[tracing::instrument(skip(self, request, body), fields(file_id))]
    pub async fn upload<S, E>(
        &self,
        request: UploadRequest,
        body: S,
    ) -> Result<UploadReceipt, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        if request.filename.trim().is_empty() {
            metrics::record_upload_failure("validate");
            return Err(UploadError::MissingFilename);
        }

        let started = Instant::now();
        let id = FileId::new();
        tracing::Span::current().record("file_id", tracing::field::display(id));
        let original_filename = sanitize_filename(&request.filename);
        let key = storage_key(id, &original_filename);
        let container = &self.settings.container;

        let mut staged = self.stage.allocate(StagePurpose::Upload, id);
        let size_bytes = match staged.fill(body, self.settings.max_upload_bytes).await {
            Ok(size) => size,
            Err(e) => {
                metrics::record_upload_failure("stage");
                tracing::warn!(file_id = %id, error = %e, "Failed to stage upload body");
                return Err(e.into());
            }
        };

        let stored = async {
            self.storage.ensure_container(container).await?;
            self.storage.put_file(container, &key, staged.path()).await
        }
        .await;
        if let Err(e) = stored {
            metrics::record_upload_failure("store");
            tracing::error!(file_id = %id, storage_key = %key, error = %e, "Failed to store upload");
            return Err(e.into());
        }
        // The object is durable; the staged copy is no longer needed.
        let _ = staged.remove().await;

        let password_hash = match self.hash_password(request.password.clone()).await {
            Ok(hash) => hash,
            Err(e) => {
                metrics::record_upload_failure("hash");
                tracing::error!(file_id = %id, error = %e, "Failed to hash upload password");
                self.rollback_object(id, &key).await;
                return Err(e);
            }
        };

        let now = OffsetDateTime::now_utc();
        let record = FileRecord {
            id,
            original_filename,
            display_filename: request
                .display_filename
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            storage_key: key.clone(),
            size_bytes,
            content_type: request.effective_content_type(),
            description: request
                .description
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
            password_hash,
            expires_at: request
                .expiration
                .resolve(now, self.settings.default_expiration),
            download_limit: request.download_limit,
            download_count: 0,
            marked_for_deletion: false,
            marked_at: None,
            created_at: now,
        };

        if let Err(e) = self.metadata.insert_file(&record).await {
            metrics::record_upload_failure("record");
            tracing::error!(file_id = %id, error = %e, "Failed to record upload");
            self.rollback_object(id, &key).await;
            return Err(e.into());
        }

        metrics::UPLOADS_COMPLETED.inc();
        metrics::BYTES_UPLOADED.inc_by(size_bytes);
        metrics::UPLOAD_DURATION.observe(started.elapsed().as_secs_f64());
        tracing::info!(
            file_id = %id,
            storage_key = %key,
            size_bytes,
            has_password = record.has_password(),
            expires_at = ?record.expires_at,
            download_limit = record.download_limit,
            "Upload committed"
        );

        Ok(UploadReceipt { record })
    }

    async fn hash_password(
        &self,
        password: Option<String>,
    ) -> Result<Option<dropit_core::PasswordCredential>, UploadError> {
        let Some(password) = password.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| UploadError::Credential(format!("hashing task failed: {e}")))?
            .map_err(|e| UploadError::Credential(e.to_string()))
    }

    async fn rollback_object(&self, id: FileId, key: &str) {
        match self.storage.delete(&self.settings.container, key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {
                tracing::info!(file_id = %id, storage_key = %key, "Rolled back stored object");
            }
            Err(e) => {
                metrics::ORPHANED_OBJECTS.inc();
                tracing::error!(
                    file_id = %id,
                    storage_key = %key,
                    error = %e,
                    "Failed to delete object after aborted upload; object is orphaned"
                );
            }
        }
    }
}
