//! Core domain types and shared logic for the dropit file-drop service.
//!
//! This crate defines the data model used across all other crates:
//! - File identifiers and records
//! - Password credentials
//! - The access policy applied before any bytes are served
//! - Upload requests and input coercion
//! - Configuration

pub mod config;
pub mod error;
pub mod file;
pub mod password;
pub mod policy;
pub mod upload;

pub use error::{Error, Result};
pub use file::{FileId, FileRecord, format_size, sanitize_filename, storage_key};
pub use password::{PasswordCredential, PasswordHasher};
pub use policy::{AccessDecision, AccessPolicy, AccessState, Denial};
pub use upload::{Expiration, UploadRequest, coerce_download_limit, coerce_expiration};

/// Default lifetime of an upload, in days.
pub const DEFAULT_EXPIRATION_DAYS: u32 = 7;

/// Default container for uploaded objects.
pub const DEFAULT_CONTAINER: &str = "dropit-storage";
