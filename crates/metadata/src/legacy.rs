//! Read-time upgrade of rows written by the previous service generation.
//!
//! Version 1 rows stored the expiration as free-form text and kept the
//! password in a single column, either as plaintext or, in later rows, as a
//! bcrypt hash. Both stores route every row they read through
//! [`LegacyUpgrade`] and write the resulting version 2 columns back, so the
//! conversion happens once per row.

use crate::error::{MetadataError, MetadataResult};
use crate::models::FileRow;
use dropit_core::{FileRecord, PasswordCredential, PasswordHasher};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Largest day count accepted from a legacy row (about 270 years).
const MAX_LEGACY_DAYS: i64 = 100_000;

/// Converts version 1 rows into current records.
#[derive(Clone, Copy, Debug)]
pub struct LegacyUpgrade {
    hasher: PasswordHasher,
    default_expiration: Duration,
}

impl Default for LegacyUpgrade {
    fn default() -> Self {
        Self {
            hasher: PasswordHasher::default(),
            default_expiration: Duration::days(i64::from(dropit_core::DEFAULT_EXPIRATION_DAYS)),
        }
    }
}

impl LegacyUpgrade {
    pub fn new(hasher: PasswordHasher, default_expiration: Duration) -> Self {
        Self {
            hasher,
            default_expiration,
        }
    }

    /// Interpret a stored legacy expiration string.
    ///
    /// - empty, `never`, `none` or `0`: no expiration
    /// - a bare number: that many days after creation
    /// - `YYYY-MM-DD`: valid through the end of that UTC day
    /// - `YYYY-MM-DD HH:MM[:SS]` (or with `T`): that UTC instant
    /// - RFC 3339: that instant
    ///
    /// Anything else gets the default lifetime counted from creation.
    pub fn parse_expiration(
        &self,
        raw: Option<&str>,
        created_at: OffsetDateTime,
    ) -> Option<OffsetDateTime> {
        let value = raw.map(str::trim).unwrap_or_default();
        if value.is_empty()
            || value.eq_ignore_ascii_case("never")
            || value.eq_ignore_ascii_case("none")
        {
            return None;
        }

        if value.bytes().all(|b| b.is_ascii_digit()) {
            return match value.parse::<i64>() {
                Ok(0) => None,
                Ok(days) if days <= MAX_LEGACY_DAYS => created_at
                    .checked_add(Duration::days(days))
                    .or_else(|| self.fallback(value, created_at)),
                _ => self.fallback(value, created_at),
            };
        }

        if let Ok(instant) = OffsetDateTime::parse(value, &Rfc3339) {
            return Some(instant.to_offset(UtcOffset::UTC));
        }

        let minutes = format_description!("[year]-[month]-[day] [hour]:[minute]");
        let seconds = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let normalized = value.replacen('T', " ", 1);
        if let Ok(instant) = PrimitiveDateTime::parse(&normalized, &seconds)
            .or_else(|_| PrimitiveDateTime::parse(&normalized, &minutes))
        {
            return Some(instant.assume_utc());
        }

        let date_only = format_description!("[year]-[month]-[day]");
        if let Ok(date) = Date::parse(value, &date_only) {
            return match date.next_day() {
                Some(next) => Some(next.midnight().assume_utc()),
                None => Some(date.midnight().assume_utc()),
            };
        }

        self.fallback(value, created_at)
    }

    fn fallback(&self, value: &str, created_at: OffsetDateTime) -> Option<OffsetDateTime> {
        tracing::warn!(
            value = %value,
            "Unparseable legacy expiration, applying default lifetime"
        );
        created_at.checked_add(self.default_expiration)
    }

    /// Credential for a legacy password column.
    ///
    /// Later rows of the previous generation already stored a bcrypt hash
    /// there; those are kept as is. Anything else is a plaintext password.
    async fn legacy_credential(
        &self,
        legacy: String,
    ) -> MetadataResult<Option<PasswordCredential>> {
        if let Some(hash) = PasswordCredential::from_bcrypt_hash(&legacy) {
            return Ok(Some(hash));
        }
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.hash(&legacy))
            .await
            .map_err(|e| MetadataError::Internal(format!("hashing task failed: {e}")))?
            .map_err(|e| MetadataError::Credential(e.to_string()))
    }

    /// Produce the current record for a legacy row.
    ///
    /// Hashing runs on the blocking pool.
    pub async fn upgrade(&self, row: FileRow) -> MetadataResult<FileRecord> {
        let expires_at = match row.expires_at {
            Some(existing) => Some(existing),
            None => self.parse_expiration(row.legacy_expiration.as_deref(), row.created_at),
        };

        let existing_hash = row
            .password_hash
            .clone()
            .and_then(PasswordCredential::from_stored);
        let password_hash = match (existing_hash, row.legacy_password.clone()) {
            (Some(hash), _) => Some(hash),
            (None, Some(legacy)) if !legacy.is_empty() => self.legacy_credential(legacy).await?,
            (None, _) => None,
        };

        let file_id = row.file_id;
        let mut record = row.into_record()?;
        record.expires_at = expires_at;
        record.password_hash = password_hash;

        tracing::info!(
            file_id = %file_id,
            has_password = record.has_password(),
            expires_at = ?record.expires_at,
            "Upgraded legacy file record"
        );

        Ok(record)
    }
}
