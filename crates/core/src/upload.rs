//! Upload requests and lenient coercion of form-style input.
//!
//! Malformed limits and expirations are never rejected: a bad download
//! limit becomes unlimited and a bad expiration falls back to the
//! configured default.

use crate::file::DEFAULT_CONTENT_TYPE;
use time::{Duration, OffsetDateTime};

/// Requested lifetime of an upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Expiration {
    /// Use the server's default lifetime.
    #[default]
    Default,
    /// Keep the file until it is deleted explicitly or exhausted.
    Never,
    /// Expire after the given duration.
    After(Duration),
}

impl Expiration {
    /// Resolve to an absolute instant.
    pub fn resolve(self, now: OffsetDateTime, default: Duration) -> Option<OffsetDateTime> {
        match self {
            Self::Default => now.checked_add(default),
            Self::Never => None,
            Self::After(duration) => now.checked_add(duration),
        }
    }
}

/// Everything the upload pipeline needs besides the bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: Option<String>,
    pub password: Option<String>,
    pub expiration: Expiration,
    pub download_limit: u32,
    pub description: Option<String>,
    pub display_filename: Option<String>,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_download_limit(mut self, limit: u32) -> Self {
        self.download_limit = limit;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_display_filename(mut self, name: impl Into<String>) -> Self {
        self.display_filename = Some(name.into());
        self
    }

    /// Content type to record, falling back to a generic binary type.
    pub fn effective_content_type(&self) -> String {
        self.content_type
            .as_deref()
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string()
    }
}

/// Parse a download limit. Anything that is not a non-negative integer
/// means unlimited.
pub fn coerce_download_limit(raw: Option<&str>) -> u32 {
    raw.map(str::trim)
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(0)
}

/// Parse an expiration given in days.
///
/// `0` and `never` mean no expiration; a positive integer is a number of
/// days; anything else falls back to the default lifetime.
pub fn coerce_expiration(raw: Option<&str>) -> Expiration {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Expiration::Default;
    };

    if value.eq_ignore_ascii_case("never") {
        return Expiration::Never;
    }

    match value.parse::<u32>() {
        Ok(0) => Expiration::Never,
        Ok(days) => Expiration::After(Duration::days(i64::from(days))),
        Err(_) => {
            tracing::debug!(value = %value, "Unparseable expiration, using default");
            Expiration::Default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_limit_coercion() {
        assert_eq!(coerce_download_limit(None), 0);
        assert_eq!(coerce_download_limit(Some("")), 0);
        assert_eq!(coerce_download_limit(Some("5")), 5);
        assert_eq!(coerce_download_limit(Some(" 7 ")), 7);
        assert_eq!(coerce_download_limit(Some("-3")), 0);
        assert_eq!(coerce_download_limit(Some("abc")), 0);
        assert_eq!(coerce_download_limit(Some("2.5")), 0);
        assert_eq!(coerce_download_limit(Some("99999999999")), 0);
    }

    #[test]
    fn expiration_coercion() {
        assert_eq!(coerce_expiration(None), Expiration::Default);
        assert_eq!(coerce_expiration(Some("  ")), Expiration::Default);
        assert_eq!(coerce_expiration(Some("invalid")), Expiration::Default);
        assert_eq!(coerce_expiration(Some("-1")), Expiration::Default);
        assert_eq!(coerce_expiration(Some("0")), Expiration::Never);
        assert_eq!(coerce_expiration(Some("Never")), Expiration::Never);
        assert_eq!(
            coerce_expiration(Some("5")),
            Expiration::After(Duration::days(5))
        );
    }

    #[test]
    fn expiration_resolution() {
        let now = OffsetDateTime::now_utc();
        let default = Duration::days(7);
        assert_eq!(Expiration::Default.resolve(now, default), Some(now + default));
        assert_eq!(Expiration::Never.resolve(now, default), None);
        assert_eq!(
            Expiration::After(Duration::days(1)).resolve(now, default),
            Some(now + Duration::days(1))
        );
    }

    #[test]
    fn content_type_fallback() {
        let request = UploadRequest::new("a.bin");
        assert_eq!(request.effective_content_type(), DEFAULT_CONTENT_TYPE);
        let request = request.with_content_type(" text/plain ");
        assert_eq!(request.effective_content_type(), "text/plain");
    }
}
