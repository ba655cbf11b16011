//! Administrative endpoints. Guarded by the admin key middleware.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    ACCESS_DENIALS, BYTES_UPLOADED, DOWNLOADS_GRANTED, ORPHANED_OBJECTS, RETRIEVAL_FAILURES,
    SWEEP_FILES_DELETED, UPLOADS_COMPLETED,
};
use crate::state::AppState;
use crate::sweep::SweepStats;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use dropit_core::FileId;
use serde::Serialize;
use time::OffsetDateTime;

/// Response for a triggered sweep.
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub dry_run: bool,
    #[serde(flatten)]
    pub stats: SweepStats,
}

/// POST /v1/admin/sweep - Run the maintenance sweep now.
pub async fn trigger_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepResponse>> {
    tracing::info!("Maintenance sweep triggered via admin API");
    let stats = state.sweeper.run(OffsetDateTime::now_utc()).await?;
    Ok(Json(SweepResponse {
        dry_run: state.sweeper.settings().dry_run,
        stats,
    }))
}

/// DELETE /v1/admin/files/{file_id} - Remove a file and its object immediately.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = FileId::parse(&file_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid file id: {e}")))?;
    let record = state
        .metadata
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file not found: {id}")))?;

    state.sweeper.purge(&record).await?;
    tracing::info!(file_id = %id, "File deleted via admin API");
    Ok(StatusCode::NO_CONTENT)
}

/// Service counters for operators.
#[derive(Debug, Serialize)]
pub struct AdminMetricsResponse {
    pub files_stored: u64,
    pub uploads_completed: u64,
    pub bytes_uploaded: u64,
    pub downloads_granted: u64,
    pub downloads_denied: u64,
    pub retrieval_failures: u64,
    pub orphaned_objects: u64,
    pub files_swept: u64,
}

/// GET /v1/admin/metrics - Summarize stored files and process counters.
pub async fn get_metrics(State(state): State<AppState>) -> ApiResult<Json<AdminMetricsResponse>> {
    let files_stored = state.metadata.count_files().await?;
    let downloads_denied = ["not_found", "expired", "limit_reached", "password_required", "password_incorrect"]
        .iter()
        .map(|reason| ACCESS_DENIALS.with_label_values(&[reason]).get())
        .sum();

    Ok(Json(AdminMetricsResponse {
        files_stored,
        uploads_completed: UPLOADS_COMPLETED.get(),
        bytes_uploaded: BYTES_UPLOADED.get(),
        downloads_granted: DOWNLOADS_GRANTED.get(),
        downloads_denied,
        retrieval_failures: RETRIEVAL_FAILURES.get(),
        orphaned_objects: ORPHANED_OBJECTS.get(),
        files_swept: SWEEP_FILES_DELETED.get(),
    }))
}
