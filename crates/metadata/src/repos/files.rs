//! File record repository.

use crate::error::MetadataResult;
use crate::models::ConsumeOutcome;
use async_trait::async_trait;
use dropit_core::{FileId, FileRecord};
use time::OffsetDateTime;

/// Repository for file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a new record. Fails with `DuplicateId` if the id is taken.
    async fn insert_file(&self, record: &FileRecord) -> MetadataResult<()>;

    /// Look up a record by id. Legacy rows are upgraded on the way out.
    async fn find_by_id(&self, id: FileId) -> MetadataResult<Option<FileRecord>>;

    /// Count one download if the limit allows it.
    ///
    /// Check and increment happen in a single statement, so concurrent
    /// callers can never push the count past a non-zero limit. The download
    /// that reaches the limit also sets the self-destruct mark.
    async fn increment_download_count_if_under_limit(
        &self,
        id: FileId,
        now: OffsetDateTime,
    ) -> MetadataResult<ConsumeOutcome>;

    /// Delete a record. Returns whether a row was removed.
    async fn delete_by_id(&self, id: FileId) -> MetadataResult<bool>;

    /// Records that are expired at `now` or marked for deletion, in id
    /// order, at most `limit` of them.
    ///
    /// `after` resumes a scan past the last id of the previous page, so
    /// rows a caller leaves in place never hide the ones behind them.
    async fn find_expired_or_marked(
        &self,
        now: OffsetDateTime,
        after: Option<FileId>,
        limit: u32,
    ) -> MetadataResult<Vec<FileRecord>>;

    /// Count stored records.
    async fn count_files(&self) -> MetadataResult<u64>;
}
