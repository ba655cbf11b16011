//! Shared file records and their lifecycle helpers.

use crate::password::PasswordCredential;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Content type recorded when the uploader does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Maximum length kept from an uploaded filename (in characters).
const MAX_FILENAME_CHARS: usize = 255;

/// Unique identifier for an uploaded file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidFileId(format!("{s}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for FileId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reduce an uploaded filename to a single safe path component.
///
/// Client-supplied names may carry directory parts from either path
/// convention; only the last component is kept. Control characters are
/// dropped and an empty result becomes `file`.
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILENAME_CHARS)
        .collect();
    let trimmed = cleaned.trim();

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derive the object-store key for a file.
pub fn storage_key(id: FileId, original_filename: &str) -> String {
    format!("{}_{}", id, sanitize_filename(original_filename))
}

/// Human readable size, e.g. `512 bytes`, `1.5 KB`, `3.2 MB`.
pub fn format_size(size_bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if size_bytes < KIB {
        format!("{size_bytes} bytes")
    } else if size_bytes < MIB {
        format!("{:.1} KB", size_bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MB", size_bytes as f64 / MIB as f64)
    }
}

/// One uploaded artifact and its access-control state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// External reference and primary key.
    pub id: FileId,
    /// Filename as uploaded.
    pub original_filename: String,
    /// Optional name presented to downloaders instead of the original.
    pub display_filename: Option<String>,
    /// Object-store key holding the bytes.
    pub storage_key: String,
    /// Size of the stored object.
    pub size_bytes: u64,
    /// MIME type captured at upload.
    pub content_type: String,
    /// Free-form uploader note.
    pub description: Option<String>,
    /// Password gate; `None` means retrievable without a credential.
    pub password_hash: Option<PasswordCredential>,
    /// Expiration instant; `None` means the file never expires.
    pub expires_at: Option<OffsetDateTime>,
    /// Maximum number of downloads; `0` means unlimited.
    pub download_limit: u32,
    /// Downloads consumed so far.
    pub download_count: u32,
    /// Self-destruct flag, set when a download exhausts the limit.
    pub marked_for_deletion: bool,
    /// When the self-destruct flag was set.
    pub marked_at: Option<OffsetDateTime>,
    /// Upload time.
    pub created_at: OffsetDateTime,
}

impl FileRecord {
    /// Whether a password must be verified before bytes are served.
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Whether the expiration instant has passed.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Whether a non-zero download limit has been used up.
    pub fn limit_reached(&self) -> bool {
        self.download_limit > 0 && self.download_count >= self.download_limit
    }

    /// Downloads left, or `None` when unlimited.
    pub fn remaining_downloads(&self) -> Option<u32> {
        (self.download_limit > 0).then(|| self.download_limit.saturating_sub(self.download_count))
    }

    /// Filename to present to downloaders.
    pub fn download_name(&self) -> &str {
        self.display_filename
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.original_filename)
    }
}
