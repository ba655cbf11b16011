//! Route configuration.

use crate::auth::{admin_middleware, trace_middleware};
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Uploads stream to the staging area; the size cap is enforced there.
        .route(
            "/v1/files",
            post(handlers::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/v1/files/{file_id}", get(handlers::file_status))
        .route(
            "/v1/files/{file_id}/verify",
            post(handlers::verify_password),
        )
        .route(
            "/v1/files/{file_id}/download",
            get(handlers::download_file),
        );

    let admin_routes = Router::new()
        .route("/v1/admin/metrics", get(handlers::get_metrics))
        .route("/v1/admin/sweep", post(handlers::trigger_sweep))
        .route("/v1/admin/files/{file_id}", delete(handlers::delete_file))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_middleware,
        ));

    let mut router = Router::new().merge(api_routes).merge(admin_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> trace ID span -> (admin key) -> Handler
    router
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
