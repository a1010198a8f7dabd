//! Service error taxonomy.

use casebook_metadata::MetadataError;
use casebook_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the allocator, deleter and upload coordinator.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Caller input was rejected. The message is safe to show to clients.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Every allocation attempt collided, or the deadline passed first.
    /// Retryable by the caller.
    #[error(
        "could not allocate a sequence id under {parent_key} after {attempts} attempts (last candidate: {})",
        last_candidate.as_deref().unwrap_or("none")
    )]
    AllocationExhausted {
        parent_key: String,
        attempts: u32,
        last_candidate: Option<String>,
        timed_out: bool,
    },

    /// The metadata or blob store failed. Details are logged, not returned.
    #[error("storage fault: {0}")]
    StorageFault(String),
}

impl ServiceError {
    /// `NotFound` from a second confirm or abort means there is nothing left
    /// to do; callers may treat it as success.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AllocationExhausted { .. })
    }
}

impl From<MetadataError> for ServiceError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => Self::NotFound(what),
            MetadataError::AlreadyExists(what) => Self::Validation(what),
            MetadataError::Constraint(msg) => Self::Validation(msg),
            other => Self::StorageFault(other.to_string()),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(key),
            StorageError::UploadNotFound(id) => {
                Self::Validation(format!("upload {id} is not known to the blob store"))
            }
            StorageError::InvalidKey(msg) | StorageError::InvalidPart(msg) => Self::Validation(msg),
            other => Self::StorageFault(other.to_string()),
        }
    }
}

impl From<casebook_core::Error> for ServiceError {
    fn from(err: casebook_core::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
