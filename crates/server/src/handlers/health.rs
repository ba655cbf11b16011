//! Health endpoint.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub storage: &'static str,
    pub metadata: &'static str,
}

/// GET /v1/health - Check storage and metadata connectivity.
///
/// Unauthenticated so load balancers can probe it.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    if let Err(e) = state.metadata.health_check().await {
        tracing::warn!(error = %e, "Metadata health check failed");
        return Err(ApiError::Unavailable("metadata store unreachable".to_string()));
    }
    if let Err(e) = state.storage.health_check().await {
        tracing::warn!(error = %e, "Storage health check failed");
        return Err(ApiError::Unavailable("object store unreachable".to_string()));
    }

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: state.storage.backend_name(),
        metadata: state.metadata.backend_name(),
    }))
}
