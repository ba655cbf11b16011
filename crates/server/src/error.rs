//! API error types.

use crate::pipeline::{RetrievalError, UploadError};
use crate::sweep::SweepError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dropit_core::Denial;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Denied(Denial),

    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] dropit_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] dropit_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] dropit_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Denied(denial) => match denial {
                Denial::NotFound => "not_found",
                Denial::Expired => "file_expired",
                Denial::LimitReached => "download_limit_reached",
                Denial::PasswordRequired => "password_required",
                Denial::PasswordIncorrect => "password_incorrect",
            },
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Unavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Denied(denial) => match denial {
                Denial::NotFound => StatusCode::NOT_FOUND,
                Denial::Expired | Denial::LimitReached => StatusCode::GONE,
                Denial::PasswordRequired => StatusCode::UNAUTHORIZED,
                Denial::PasswordIncorrect => StatusCode::FORBIDDEN,
            },
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                dropit_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                dropit_metadata::MetadataError::DuplicateId(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        Self::Denied(denial)
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::MissingFilename => {
                Self::BadRequest("the filename query parameter is required".to_string())
            }
            UploadError::Body(msg) => Self::BadRequest(format!("failed to read upload: {msg}")),
            UploadError::TooLarge { limit } => Self::PayloadTooLarge { limit },
            UploadError::Stage(e) => Self::Internal(format!("staging failed: {e}")),
            UploadError::Storage(e) => Self::Storage(e),
            UploadError::Credential(msg) => Self::Internal(format!("password hashing failed: {msg}")),
            UploadError::Metadata(e) => Self::Metadata(e),
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        match err {
            // The record exists but its object does not; that is a server fault.
            RetrievalError::Storage(e) => Self::Internal(format!("failed to fetch file: {e}")),
            RetrievalError::Stage(e) => Self::Internal(format!("staging failed: {e}")),
        }
    }
}

impl From<SweepError> for ApiError {
    fn from(err: SweepError) -> Self {
        match err {
            SweepError::Storage(e) => Self::Storage(e),
            SweepError::Metadata(e) => Self::Metadata(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Denied(denial) => denial.message().to_string(),
            other => other.to_string(),
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
