//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::legacy::LegacyUpgrade;
use crate::repos::FileRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Rows upgraded per pass when draining legacy records.
pub(crate) const LEGACY_BATCH: i64 = 100;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Backend identifier for logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
    legacy: LegacyUpgrade,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(30);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::Config(format!(
                    "cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers, which also serializes
            // the conditional download-count update.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout: Duration::from_secs(query_timeout_secs),
            legacy: LegacyUpgrade::default(),
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "SQLite metadata store ready (query timeout is advisory only)"
        );

        Ok(store)
    }

    /// Use the given settings when upgrading legacy rows.
    pub fn with_legacy_upgrade(mut self, legacy: LegacyUpgrade) -> Self {
        self.legacy = legacy;
        self
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run a query future, logging it when it exceeds the advisory timeout.
    async fn timed<T>(
        &self,
        operation: &'static str,
        query: impl Future<Output = MetadataResult<T>>,
    ) -> MetadataResult<T> {
        let started = Instant::now();
        let result = query.await;
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.query_timeout.as_millis() as u64,
                "Slow SQLite query"
            );
        }
        result
    }
}

/// Encode an instant for SQLite.
///
/// SQLite compares timestamps as text, so every stored instant is UTC with
/// all nine subsecond digits; text order then matches time order.
pub(crate) fn sql_timestamp(value: OffsetDateTime) -> MetadataResult<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
        ))
        .map_err(|e| MetadataError::Internal(format!("cannot encode timestamp: {e}")))
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{CURRENT_SCHEMA_VERSION, ConsumeOutcome, FileRow};
    use dropit_core::{FileId, FileRecord};

    impl SqliteStore {
        async fn fetch_row(&self, id: FileId) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        /// Turn a row into a record, upgrading and writing back legacy rows.
        ///
        /// Returns `None` if the row vanished while being upgraded.
        async fn materialize(&self, row: FileRow) -> MetadataResult<Option<FileRecord>> {
            if !row.is_legacy() {
                return row.into_record().map(Some);
            }

            let record = self.legacy.upgrade(row).await?;
            let expires_at = record.expires_at.map(sql_timestamp).transpose()?;
            let result = sqlx::query(
                r#"
                UPDATE files
                SET expires_at = ?, password_hash = ?, has_password = ?,
                    legacy_expiration = NULL, legacy_password = NULL, schema_version = ?
                WHERE file_id = ? AND schema_version < ?
                "#,
            )
            .bind(expires_at)
            .bind(record.password_hash.as_ref().map(|h| h.as_str()))
            .bind(record.has_password())
            .bind(CURRENT_SCHEMA_VERSION)
            .bind(record.id.as_uuid())
            .bind(CURRENT_SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(Some(record));
            }

            // Another reader upgraded it first; use what they stored.
            match self.fetch_row(record.id).await? {
                Some(row) if !row.is_legacy() => row.into_record().map(Some),
                Some(_) => Err(MetadataError::Internal(format!(
                    "legacy upgrade of file {} did not persist",
                    record.id
                ))),
                None => Ok(None),
            }
        }

        /// Upgrade every remaining legacy row, in batches.
        async fn drain_legacy_rows(&self) -> MetadataResult<u64> {
            let mut upgraded = 0;
            loop {
                let rows = sqlx::query_as::<_, FileRow>(
                    "SELECT * FROM files WHERE schema_version < ? ORDER BY created_at LIMIT ?",
                )
                .bind(CURRENT_SCHEMA_VERSION)
                .bind(LEGACY_BATCH)
                .fetch_all(&self.pool)
                .await?;

                if rows.is_empty() {
                    return Ok(upgraded);
                }
                for row in rows {
                    self.materialize(row).await?;
                    upgraded += 1;
                }
            }
        }
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn insert_file(&self, record: &FileRecord) -> MetadataResult<()> {
            let expires_at = record.expires_at.map(sql_timestamp).transpose()?;
            let marked_at = record.marked_at.map(sql_timestamp).transpose()?;
            sqlx::query(
                r#"
                INSERT INTO files (
                    file_id, original_filename, display_filename, storage_key, size_bytes,
                    content_type, description, password_hash, has_password, expires_at,
                    download_limit, download_count, marked_for_deletion, marked_at,
                    created_at, schema_version
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.id.as_uuid())
            .bind(&record.original_filename)
            .bind(&record.display_filename)
            .bind(&record.storage_key)
            .bind(i64::try_from(record.size_bytes).unwrap_or(i64::MAX))
            .bind(&record.content_type)
            .bind(&record.description)
            .bind(record.password_hash.as_ref().map(|h| h.as_str()))
            .bind(record.has_password())
            .bind(expires_at)
            .bind(i64::from(record.download_limit))
            .bind(i64::from(record.download_count))
            .bind(record.marked_for_deletion)
            .bind(marked_at)
            .bind(sql_timestamp(record.created_at)?)
            .bind(CURRENT_SCHEMA_VERSION)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, record.id))?;
            Ok(())
        }

        async fn find_by_id(&self, id: FileId) -> MetadataResult<Option<FileRecord>> {
            match self.fetch_row(id).await? {
                Some(row) => self.materialize(row).await,
                None => Ok(None),
            }
        }

        async fn increment_download_count_if_under_limit(
            &self,
            id: FileId,
            now: OffsetDateTime,
        ) -> MetadataResult<ConsumeOutcome> {
            self.timed("increment_download_count", async {
                let marked_at = sql_timestamp(now)?;
                let updated: Option<(i64, bool)> = sqlx::query_as(
                    r#"
                    UPDATE files
                    SET download_count = download_count + 1,
                        marked_for_deletion = CASE
                            WHEN download_limit > 0 AND download_count + 1 >= download_limit THEN 1
                            ELSE marked_for_deletion
                        END,
                        marked_at = CASE
                            WHEN download_limit > 0 AND download_count + 1 >= download_limit THEN ?
                            ELSE marked_at
                        END
                    WHERE file_id = ? AND (download_limit = 0 OR download_count < download_limit)
                    RETURNING download_count, marked_for_deletion
                    "#,
                )
                .bind(marked_at)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

                if let Some((download_count, exhausted)) = updated {
                    return Ok(ConsumeOutcome::Consumed {
                        download_count: u32::try_from(download_count).unwrap_or(u32::MAX),
                        exhausted,
                    });
                }

                let exists: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE file_id = ?")
                        .bind(id.as_uuid())
                        .fetch_one(&self.pool)
                        .await?;

                Ok(if exists > 0 {
                    ConsumeOutcome::LimitReached
                } else {
                    ConsumeOutcome::NotFound
                })
            })
            .await
        }

        async fn delete_by_id(&self, id: FileId) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM files WHERE file_id = ?")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn find_expired_or_marked(
            &self,
            now: OffsetDateTime,
            after: Option<FileId>,
            limit: u32,
        ) -> MetadataResult<Vec<FileRecord>> {
            self.timed("find_expired_or_marked", async {
                let upgraded = self.drain_legacy_rows().await?;
                if upgraded > 0 {
                    tracing::info!(upgraded, "Upgraded legacy rows before sweep");
                }

                let after = after.map(|id| *id.as_uuid());
                let rows = sqlx::query_as::<_, FileRow>(
                    r#"
                    SELECT * FROM files
                    WHERE (marked_for_deletion = 1
                           OR (expires_at IS NOT NULL AND expires_at < ?))
                      AND (? IS NULL OR file_id > ?)
                    ORDER BY file_id
                    LIMIT ?
                    "#,
                )
                .bind(sql_timestamp(now)?)
                .bind(after)
                .bind(after)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?;

                let mut records = Vec::with_capacity(rows.len());
                for row in rows {
                    if let Some(record) = self.materialize(row).await? {
                        records.push(record);
                    }
                }
                Ok(records)
            })
            .await
        }

        async fn count_files(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
                .fetch_one(&self.pool)
                .await?;
            Ok(count.max(0) as u64)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    file_id BLOB PRIMARY KEY,
    original_filename TEXT NOT NULL,
    display_filename TEXT,
    storage_key TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL DEFAULT 0 CHECK (size_bytes >= 0),
    content_type TEXT NOT NULL DEFAULT 'application/octet-stream',
    description TEXT,
    password_hash TEXT,
    has_password INTEGER NOT NULL DEFAULT 0,
    expires_at TEXT,
    download_limit INTEGER NOT NULL DEFAULT 0 CHECK (download_limit >= 0),
    download_count INTEGER NOT NULL DEFAULT 0 CHECK (download_count >= 0),
    marked_for_deletion INTEGER NOT NULL DEFAULT 0,
    marked_at TEXT,
    created_at TEXT NOT NULL,
    -- 1 = written by the previous generation, upgraded on first read
    schema_version INTEGER NOT NULL DEFAULT 2,
    legacy_expiration TEXT,
    legacy_password TEXT
);
CREATE INDEX IF NOT EXISTS idx_files_expires_at ON files(expires_at);
CREATE INDEX IF NOT EXISTS idx_files_marked ON files(file_id) WHERE marked_for_deletion = 1;
CREATE INDEX IF NOT EXISTS idx_files_legacy ON files(created_at) WHERE schema_version < 2;
"#;
