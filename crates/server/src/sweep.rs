//! Maintenance sweep: purge expired and self-destructed files.
//!
//! Marked files keep their object for `marked_grace` after the mark so the
//! download that exhausted the limit can still finish fetching it.

use crate::metrics;
use dropit_core::FileRecord;
use dropit_core::config::{FilesConfig, SweepConfig};
use dropit_metadata::{MetadataError, MetadataResult, MetadataStore};
use dropit_storage::{ObjectStore, StorageError};
use serde::Serialize;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;

/// Sweep settings.
#[derive(Clone, Debug)]
pub struct SweepSettings {
    pub container: String,
    pub batch_size: u32,
    pub marked_grace: Duration,
    pub dry_run: bool,
}

impl SweepSettings {
    pub fn from_config(files: &FilesConfig, sweep: &SweepConfig) -> Self {
        Self {
            container: files.container.clone(),
            batch_size: sweep.batch_size.max(1),
            marked_grace: sweep.marked_grace(),
            dry_run: sweep.dry_run,
        }
    }
}

/// Counters for one sweep run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub examined: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub bytes_reclaimed: u64,
}

/// Purge failures.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

pub struct MaintenanceSweeper {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: SweepSettings,
}

impl MaintenanceSweeper {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            storage,
            metadata,
            settings,
        }
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Run one sweep as of `now`.
    ///
    /// Walks every candidate once, paging by id. Records still inside their
    /// grace period, or whose object could not be deleted, stay for a later
    /// run without blocking the pages behind them.
    #[tracing::instrument(skip(self), fields(dry_run = self.settings.dry_run))]
    pub async fn run(&self, now: OffsetDateTime) -> MetadataResult<SweepStats> {
        let mut stats = SweepStats::default();
        let mut after = None;

        loop {
            let batch = self
                .metadata
                .find_expired_or_marked(now, after, self.settings.batch_size)
                .await?;
            let full = batch.len() as u64 >= u64::from(self.settings.batch_size);
            after = batch.last().map(|record| record.id);

            for record in batch {
                stats.examined += 1;

                if !self.is_due(&record, now) {
                    stats.skipped += 1;
                    continue;
                }
                if self.settings.dry_run {
                    tracing::info!(
                        file_id = %record.id,
                        storage_key = %record.storage_key,
                        "Dry run: would purge file"
                    );
                    stats.skipped += 1;
                    continue;
                }

                match self.purge(&record).await {
                    Ok(_) => {
                        stats.deleted += 1;
                        stats.bytes_reclaimed += record.size_bytes;
                    }
                    Err(e) => {
                        stats.errors += 1;
                        tracing::error!(
                            file_id = %record.id,
                            storage_key = %record.storage_key,
                            error = %e,
                            "Failed to purge file, leaving record for the next sweep"
                        );
                    }
                }
            }

            if !full || after.is_none() {
                break;
            }
        }

        metrics::SWEEP_RUNS.inc();
        metrics::SWEEP_FILES_DELETED.inc_by(stats.deleted);
        metrics::SWEEP_ERRORS.inc_by(stats.errors);
        metrics::SWEEP_BYTES_RECLAIMED.inc_by(stats.bytes_reclaimed);
        if let Ok(count) = self.metadata.count_files().await {
            metrics::FILES_STORED.set(i64::try_from(count).unwrap_or(i64::MAX));
        }

        tracing::info!(
            examined = stats.examined,
            deleted = stats.deleted,
            skipped = stats.skipped,
            errors = stats.errors,
            bytes_reclaimed = stats.bytes_reclaimed,
            "Maintenance sweep finished"
        );
        Ok(stats)
    }

    fn is_due(&self, record: &FileRecord, now: OffsetDateTime) -> bool {
        if record.is_expired(now) {
            return true;
        }
        if !record.marked_for_deletion {
            return false;
        }
        match record.marked_at {
            Some(marked_at) => marked_at + self.settings.marked_grace <= now,
            None => true,
        }
    }

    /// Delete the object, then the record.
    ///
    /// A missing object is not an error. Returns whether the record was
    /// still present.
    pub async fn purge(&self, record: &FileRecord) -> Result<bool, SweepError> {
        match self
            .storage
            .delete(&self.settings.container, &record.storage_key)
            .await
        {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(file_id = %record.id, "Object already gone");
            }
            Err(e) => return Err(e.into()),
        }

        let existed = self.metadata.delete_by_id(record.id).await?;
        tracing::info!(
            file_id = %record.id,
            storage_key = %record.storage_key,
            marked = record.marked_for_deletion,
            "Purged file"
        );
        Ok(existed)
    }

    /// Run the sweep every `interval` until the task is aborted.
    pub fn spawn_scheduler(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Automatic maintenance sweep enabled"
            );
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = self.run(OffsetDateTime::now_utc()).await {
                    tracing::error!(error = %e, "Automatic maintenance sweep failed");
                }
            }
        })
    }
}
