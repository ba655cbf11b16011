//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("file id already exists: {0}")]
    DuplicateId(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("credential error: {0}")]
    Credential(String),
}

impl MetadataError {
    /// Map an insert failure, recognising primary key collisions.
    ///
    /// PostgreSQL reports them as SQLSTATE 23505; SQLite reports extended
    /// code 1555 (primary key) or 2067 (unique).
    pub(crate) fn from_insert(err: sqlx::Error, id: impl std::fmt::Display) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && (db_err.is_unique_violation()
                || matches!(db_err.code().as_deref(), Some("23505" | "1555" | "2067")))
        {
            return Self::DuplicateId(id.to_string());
        }
        Self::Database(err)
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
