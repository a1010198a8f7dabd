//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("multipart upload not found: {0}")]
    UploadNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A part listed at completion does not match what the store holds.
    #[error("invalid part: {0}")]
    InvalidPart(String),

    #[error("presign error: {0}")]
    Presign(String),

    #[error("signed URL expired")]
    SignatureExpired,

    #[error("signed URL signature is invalid")]
    InvalidSignature,

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Errors caused by the caller's input rather than a store fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::UploadNotFound(_)
                | Self::InvalidKey(_)
                | Self::InvalidPart(_)
                | Self::SignatureExpired
                | Self::InvalidSignature
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
