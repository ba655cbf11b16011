//! Prometheus metrics for the dropit server.
//!
//! Counters cover the upload and download paths, policy denials and the
//! maintenance sweep. Labels never carry file ids or filenames.
//!
//! The `/metrics` endpoint is unauthenticated when enabled and must be
//! network-restricted to the Prometheus scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dropit_uploads_completed_total",
        "Total number of files stored and recorded",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "dropit_upload_failures_total",
            "Total upload failures by pipeline stage",
        ),
        &["stage"],
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("dropit_bytes_uploaded_total", "Total bytes stored by uploads")
        .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "dropit_upload_duration_seconds",
            "Time from first body byte to committed record",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
    )
    .expect("metric creation failed")
});

pub static ORPHANED_OBJECTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dropit_orphaned_objects_total",
        "Stored objects left without a record after a failed rollback",
    )
    .expect("metric creation failed")
});

// Download metrics
pub static DOWNLOADS_GRANTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dropit_downloads_granted_total",
        "Total downloads that passed the policy and consumed a count",
    )
    .expect("metric creation failed")
});

pub static ACCESS_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("dropit_access_denials_total", "Policy denials by reason"),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static RETRIEVAL_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dropit_retrieval_failures_total",
        "Downloads that consumed a count but failed to fetch the object",
    )
    .expect("metric creation failed")
});

pub static PASSWORD_VERIFY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "dropit_password_verify_duration_seconds",
            "Time spent verifying a supplied password",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
    )
    .expect("metric creation failed")
});

pub static STAGE_CLEANUP_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dropit_stage_cleanup_failures_total",
        "Staging files that could not be removed",
    )
    .expect("metric creation failed")
});

// Sweep metrics
pub static SWEEP_RUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("dropit_sweep_runs_total", "Total maintenance sweep runs")
        .expect("metric creation failed")
});

pub static SWEEP_FILES_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dropit_sweep_files_deleted_total",
        "Files purged by the maintenance sweep",
    )
    .expect("metric creation failed")
});

pub static SWEEP_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dropit_sweep_errors_total",
        "Files the sweep failed to purge",
    )
    .expect("metric creation failed")
});

pub static SWEEP_BYTES_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dropit_sweep_bytes_reclaimed_total",
        "Bytes released by the maintenance sweep",
    )
    .expect("metric creation failed")
});

pub static FILES_STORED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "dropit_files_stored",
        "File records present after the last sweep",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOADS_COMPLETED.clone()),
            Box::new(UPLOAD_FAILURES.clone()),
            Box::new(BYTES_UPLOADED.clone()),
            Box::new(UPLOAD_DURATION.clone()),
            Box::new(ORPHANED_OBJECTS.clone()),
            Box::new(DOWNLOADS_GRANTED.clone()),
            Box::new(ACCESS_DENIALS.clone()),
            Box::new(RETRIEVAL_FAILURES.clone()),
            Box::new(PASSWORD_VERIFY_DURATION.clone()),
            Box::new(STAGE_CLEANUP_FAILURES.clone()),
            Box::new(SWEEP_RUNS.clone()),
            Box::new(SWEEP_FILES_DELETED.clone()),
            Box::new(SWEEP_ERRORS.clone()),
            Box::new(SWEEP_BYTES_RECLAIMED.clone()),
            Box::new(FILES_STORED.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record an upload failure at the given pipeline stage.
pub fn record_upload_failure(stage: &str) {
    UPLOAD_FAILURES.with_label_values(&[stage]).inc();
}

/// Record a policy denial.
pub fn record_denial(reason: &str) {
    ACCESS_DENIALS.with_label_values(&[reason]).inc();
}
