//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use dropit_core::{FileId, FileRecord, PasswordCredential};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Schema version written by this release.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// One row of the `files` table.
///
/// Version 1 rows were written by the previous service generation and keep
/// their expiration as free-form text in `legacy_expiration` and, for
/// some, a plaintext password in `legacy_password`.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub file_id: Uuid,
    pub original_filename: String,
    pub display_filename: Option<String>,
    pub storage_key: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub description: Option<String>,
    pub password_hash: Option<String>,
    pub has_password: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub download_limit: i64,
    pub download_count: i64,
    pub marked_for_deletion: bool,
    pub marked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub schema_version: i32,
    pub legacy_expiration: Option<String>,
    pub legacy_password: Option<String>,
}

impl FileRow {
    /// Whether this row still needs the legacy upgrade.
    pub fn is_legacy(&self) -> bool {
        self.schema_version < CURRENT_SCHEMA_VERSION
    }

    /// Convert a current-version row into a domain record.
    pub fn into_record(self) -> MetadataResult<FileRecord> {
        let id = FileId::from(self.file_id);
        Ok(FileRecord {
            id,
            original_filename: self.original_filename,
            display_filename: self.display_filename,
            storage_key: self.storage_key,
            size_bytes: non_negative(self.size_bytes, "size_bytes", id)?,
            content_type: self.content_type,
            description: self.description,
            password_hash: self.password_hash.and_then(PasswordCredential::from_stored),
            expires_at: self.expires_at,
            download_limit: counter(self.download_limit, "download_limit", id)?,
            download_count: counter(self.download_count, "download_count", id)?,
            marked_for_deletion: self.marked_for_deletion,
            marked_at: self.marked_at,
            created_at: self.created_at,
        })
    }
}

fn non_negative(value: i64, column: &str, id: FileId) -> MetadataResult<u64> {
    u64::try_from(value)
        .map_err(|_| MetadataError::Internal(format!("{column} is negative for file {id}")))
}

fn counter(value: i64, column: &str, id: FileId) -> MetadataResult<u32> {
    u32::try_from(value)
        .map_err(|_| MetadataError::Internal(format!("{column} out of range for file {id}")))
}

/// Outcome of the atomic download-count increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// One download was counted.
    Consumed {
        /// Count after the increment.
        download_count: u32,
        /// Whether this download used up the limit and marked the file.
        exhausted: bool,
    },
    /// The limit was already reached; nothing changed.
    LimitReached,
    /// No such file.
    NotFound,
}
