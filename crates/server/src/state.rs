//! Application state shared across handlers.

use crate::access::AccessPolicyEngine;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::{RetrievalPipeline, StageArea, UploadPipeline, UploadSettings};
use crate::sweep::{MaintenanceSweeper, SweepSettings};
use dropit_core::config::AppConfig;
use dropit_metadata::MetadataStore;
use dropit_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    pub access: Arc<AccessPolicyEngine>,
    pub uploads: Arc<UploadPipeline>,
    pub retrieval: Arc<RetrievalPipeline>,
    pub sweeper: Arc<MaintenanceSweeper>,
}

impl AppState {
    /// Build the application state.
    ///
    /// Validates the configuration, creates the staging directory and
    /// makes sure the storage container exists.
    pub async fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> ApiResult<Self> {
        config
            .validate()
            .map_err(|e| ApiError::Internal(format!("invalid configuration: {e}")))?;

        let hasher = config.password.hasher()?;
        let stage = StageArea::new(&config.server.staging_dir)
            .await
            .map_err(|e| {
                ApiError::Internal(format!(
                    "cannot create staging directory {}: {e}",
                    config.server.staging_dir.display()
                ))
            })?;
        let stage = Arc::new(stage);

        storage.ensure_container(&config.files.container).await?;

        let max_upload_bytes = match config.server.max_upload_bytes {
            0 => None,
            limit => Some(limit),
        };
        let uploads = UploadPipeline::new(
            storage.clone(),
            metadata.clone(),
            hasher,
            stage.clone(),
            UploadSettings {
                container: config.files.container.clone(),
                default_expiration: config.files.default_expiration(),
                max_upload_bytes,
            },
        );
        let retrieval =
            RetrievalPipeline::new(storage.clone(), stage, config.files.container.clone());
        let sweeper = MaintenanceSweeper::new(
            storage.clone(),
            metadata.clone(),
            SweepSettings::from_config(&config.files, &config.sweep),
        );

        Ok(Self {
            access: Arc::new(AccessPolicyEngine::new(metadata.clone(), hasher)),
            uploads: Arc::new(uploads),
            retrieval: Arc::new(retrieval),
            sweeper: Arc::new(sweeper),
            config: Arc::new(config),
            storage,
            metadata,
        })
    }
}
