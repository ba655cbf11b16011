//! Public file endpoints: upload, status, password check and download.

use crate::access::Authorization;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use dropit_core::{
    AccessDecision, AccessPolicy, AccessState, FileId, UploadRequest, coerce_download_limit,
    coerce_expiration, format_size,
};
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Header carrying a file password on upload and download.
pub const PASSWORD_HEADER: HeaderName = HeaderName::from_static("x-file-password");

/// Header reporting the download count after a granted download.
pub const DOWNLOAD_COUNT_HEADER: HeaderName = HeaderName::from_static("x-download-count");

/// Query parameters for `POST /v1/files`.
///
/// Numeric fields arrive as strings and are coerced leniently.
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub filename: Option<String>,
    pub expiration_days: Option<String>,
    pub download_limit: Option<String>,
    pub description: Option<String>,
    pub display_filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub storage_key: String,
    pub size_bytes: u64,
    pub expires_at: Option<String>,
    pub download_limit: u32,
    pub has_password: bool,
    pub status_url: String,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct FileStatusResponse {
    pub file_id: String,
    pub filename: String,
    pub display_filename: Option<String>,
    pub download_name: String,
    pub description: Option<String>,
    pub size_bytes: u64,
    pub size_human: String,
    pub content_type: String,
    pub uploaded_at: String,
    pub expires_at: Option<String>,
    pub download_limit: u32,
    pub download_count: u32,
    pub remaining_downloads: Option<u32>,
    pub has_password: bool,
    pub state: AccessState,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub file_id: String,
    pub state: AccessState,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub password: Option<String>,
}

fn format_time(ts: OffsetDateTime, field: &str) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format {field}: {e}")))
}

fn parse_file_id(raw: &str) -> ApiResult<FileId> {
    // An unparseable id cannot name a file.
    FileId::parse(raw).map_err(|_| ApiError::Denied(dropit_core::Denial::NotFound))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// POST /v1/files - Upload a file from the raw request body.
#[tracing::instrument(skip(state, params, headers, body), fields(filename = ?params.filename))]
pub async fn upload_file(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut request = UploadRequest::new(params.filename.unwrap_or_default())
        .with_expiration(coerce_expiration(params.expiration_days.as_deref()))
        .with_download_limit(coerce_download_limit(params.download_limit.as_deref()));
    if let Some(content_type) = header_str(&headers, &CONTENT_TYPE) {
        request = request.with_content_type(content_type);
    }
    if let Some(password) = header_str(&headers, &PASSWORD_HEADER) {
        request = request.with_password(password);
    }
    if let Some(description) = params.description {
        request = request.with_description(description);
    }
    if let Some(display) = params.display_filename {
        request = request.with_display_filename(display);
    }

    let receipt = state
        .uploads
        .upload(request, body.into_data_stream())
        .await?;
    let record = receipt.record;

    let expires_at = match record.expires_at {
        Some(ts) => Some(format_time(ts, "expires_at")?),
        None => None,
    };

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_id: record.id.to_string(),
            storage_key: record.storage_key.clone(),
            size_bytes: record.size_bytes,
            expires_at,
            download_limit: record.download_limit,
            has_password: record.has_password(),
            status_url: format!("/v1/files/{}", record.id),
            download_url: format!("/v1/files/{}/download", record.id),
        }),
    ))
}

/// GET /v1/files/{file_id} - Describe a file without consuming a download.
pub async fn file_status(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<FileStatusResponse>> {
    let id = parse_file_id(&file_id)?;
    let record = state
        .metadata
        .find_by_id(id)
        .await?
        .ok_or(ApiError::Denied(dropit_core::Denial::NotFound))?;

    let now = OffsetDateTime::now_utc();
    let access = AccessPolicy::preview(Some(&record), now).state();
    let expires_at = match record.expires_at {
        Some(ts) => Some(format_time(ts, "expires_at")?),
        None => None,
    };

    Ok(Json(FileStatusResponse {
        file_id: record.id.to_string(),
        download_name: record.download_name().to_string(),
        filename: record.original_filename.clone(),
        display_filename: record.display_filename.clone(),
        description: record.description.clone(),
        size_bytes: record.size_bytes,
        size_human: format_size(record.size_bytes),
        content_type: record.content_type.clone(),
        uploaded_at: format_time(record.created_at, "created_at")?,
        expires_at,
        download_limit: record.download_limit,
        download_count: record.download_count,
        remaining_downloads: record.remaining_downloads(),
        has_password: record.has_password(),
        state: access,
    }))
}

/// POST /v1/files/{file_id}/verify - Check a password without downloading.
pub async fn verify_password(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Json(body): Json<VerifyRequest>,
) -> ApiResult<Json<VerifyResponse>> {
    let id = parse_file_id(&file_id)?;
    let check = state.access.check(id, Some(&body.password)).await?;

    match check.decision {
        AccessDecision::Allowed => Ok(Json(VerifyResponse {
            file_id: id.to_string(),
            state: AccessState::Allowed,
        })),
        AccessDecision::Denied(denial) => {
            crate::metrics::record_denial(denial.as_str());
            Err(denial.into())
        }
    }
}

/// GET /v1/files/{file_id}/download - Consume one download and stream the file.
#[tracing::instrument(skip(state, file_id, params, headers), fields(file_id = %file_id))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(params): Query<DownloadParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let id = parse_file_id(&file_id)?;
    let password = header_str(&headers, &PASSWORD_HEADER)
        .map(str::to_string)
        .or(params.password);

    let grant = match state
        .access
        .authorize_download(id, password.as_deref())
        .await?
    {
        Authorization::Granted(grant) => grant,
        Authorization::Denied(denial) => return Err(denial.into()),
    };

    // The download is already counted; a fetch failure does not refund it.
    let download = state.retrieval.fetch(&grant.record).await?;

    tracing::info!(
        file_id = %id,
        download_count = grant.download_count,
        exhausted = grant.exhausted,
        size_bytes = download.size_bytes,
        "Serving download"
    );

    let content_type = HeaderValue::from_str(&download.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(dropit_core::file::DEFAULT_CONTENT_TYPE));
    let body = download
        .body
        .inspect(move |chunk| {
            if let Err(e) = chunk {
                tracing::error!(file_id = %id, error = %e, "Download stream failed mid-transfer");
            }
        });

    let mut response = Body::from_stream(body).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(CONTENT_TYPE, content_type);
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(download.size_bytes));
    response_headers.insert(CONTENT_DISPOSITION, content_disposition(&download.filename));
    response_headers.insert(
        DOWNLOAD_COUNT_HEADER,
        HeaderValue::from(grant.download_count),
    );
    Ok(response)
}
