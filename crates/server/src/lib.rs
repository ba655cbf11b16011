//! HTTP server for the dropit file-drop service.
//!
//! This crate provides:
//! - The access policy engine that gates every download
//! - Upload and retrieval pipelines staged through local files
//! - The maintenance sweep for expired and exhausted files
//! - Public file endpoints and the admin API

pub mod access;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod sweep;

pub use access::{AccessPolicyEngine, Authorization, Grant};
pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use sweep::{MaintenanceSweeper, SweepStats};
