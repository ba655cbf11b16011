//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::legacy::LegacyUpgrade;
use crate::models::{CURRENT_SCHEMA_VERSION, ConsumeOutcome, FileRow};
use crate::repos::FileRepo;
use crate::store::{LEGACY_BATCH, MetadataStore};
use async_trait::async_trait;
use dropit_core::config::PgSslMode;
use dropit_core::{FileId, FileRecord};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
    legacy: LegacyUpgrade,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password come from the environment rather than a URL.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            opts = opts.ssl_mode(match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            });
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Shorthand for [`PostgresStore::from_url`].
    pub async fn new(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        Self::from_url(url, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            legacy: LegacyUpgrade::default(),
        };
        store.migrate().await?;

        Ok(store)
    }

    /// Use the given settings when upgrading legacy rows.
    pub fn with_legacy_upgrade(mut self, legacy: LegacyUpgrade) -> Self {
        self.legacy = legacy;
        self
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn fetch_row(&self, id: FileId) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn materialize(&self, row: FileRow) -> MetadataResult<Option<FileRecord>> {
        if !row.is_legacy() {
            return row.into_record().map(Some);
        }

        let record = self.legacy.upgrade(row).await?;
        let result = sqlx::query(
            r#"
            UPDATE files
            SET expires_at = $1, password_hash = $2, has_password = $3,
                legacy_expiration = NULL, legacy_password = NULL, schema_version = $4
            WHERE file_id = $5 AND schema_version < $4
            "#,
        )
        .bind(record.expires_at)
        .bind(record.password_hash.as_ref().map(|h| h.as_str()))
        .bind(record.has_password())
        .bind(CURRENT_SCHEMA_VERSION)
        .bind(record.id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(Some(record));
        }

        match self.fetch_row(record.id).await? {
            Some(row) if !row.is_legacy() => row.into_record().map(Some),
            Some(_) => Err(MetadataError::Internal(format!(
                "legacy upgrade of file {} did not persist",
                record.id
            ))),
            None => Ok(None),
        }
    }

    async fn drain_legacy_rows(&self) -> MetadataResult<u64> {
        let mut upgraded = 0;
        loop {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE schema_version < $1 ORDER BY created_at LIMIT $2",
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
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements cannot hold several commands.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl FileRepo for PostgresStore {
    async fn insert_file(&self, record: &FileRecord) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                file_id, original_filename, display_filename, storage_key, size_bytes,
                content_type, description, password_hash, has_password, expires_at,
                download_limit, download_count, marked_for_deletion, marked_at,
                created_at, schema_version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
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
        .bind(record.expires_at)
        .bind(i64::from(record.download_limit))
        .bind(i64::from(record.download_count))
        .bind(record.marked_for_deletion)
        .bind(record.marked_at)
        .bind(record.created_at)
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
        // The row lock taken by UPDATE serializes concurrent consumers, and
        // the WHERE clause is re-evaluated against the committed count.
        let updated: Option<(i64, bool)> = sqlx::query_as(
            r#"
            UPDATE files
            SET download_count = download_count + 1,
                marked_for_deletion = CASE
                    WHEN download_limit > 0 AND download_count + 1 >= download_limit THEN TRUE
                    ELSE marked_for_deletion
                END,
                marked_at = CASE
                    WHEN download_limit > 0 AND download_count + 1 >= download_limit THEN $1
                    ELSE marked_at
                END
            WHERE file_id = $2 AND (download_limit = 0 OR download_count < download_limit)
            RETURNING download_count, marked_for_deletion
            "#,
        )
        .bind(now)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        if let Some((download_count, exhausted)) = updated {
            return Ok(ConsumeOutcome::Consumed {
                download_count: u32::try_from(download_count).unwrap_or(u32::MAX),
                exhausted,
            });
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM files WHERE file_id = $1)")
                .bind(id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(if exists {
            ConsumeOutcome::LimitReached
        } else {
            ConsumeOutcome::NotFound
        })
    }

    async fn delete_by_id(&self, id: FileId) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE file_id = $1")
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
        let upgraded = self.drain_legacy_rows().await?;
        if upgraded > 0 {
            tracing::info!(upgraded, "Upgraded legacy rows before sweep");
        }

        let rows = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT * FROM files
            WHERE (marked_for_deletion
                   OR (expires_at IS NOT NULL AND expires_at < $1))
              AND ($2::uuid IS NULL OR file_id > $2)
            ORDER BY file_id
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(after.map(|id| *id.as_uuid()))
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
    }

    async fn count_files(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
