//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid file id: {0}")]
    InvalidFileId(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("invalid password work factor: {cost} (must be between {min} and {max})")]
    InvalidCost { cost: u32, min: u32, max: u32 },

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
