//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sequence id: {0}")]
    InvalidSequenceId(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid attachment owner: {0}")]
    InvalidOwner(String),

    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("invalid parts: {0}")]
    InvalidParts(String),

    #[error("upload session error: {0}")]
    UploadSession(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
