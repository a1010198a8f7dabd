//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use casebook_service::ServiceError;
use casebook_storage::StorageError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<casebook_core::Error> for ApiError {
    fn from(err: casebook_core::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Service(e) => match e {
                ServiceError::Validation(_) => "validation_error",
                ServiceError::NotFound(_) => "not_found",
                ServiceError::AllocationExhausted { .. } => "allocation_exhausted",
                ServiceError::StorageFault(_) => "storage_error",
            },
            Self::Storage(e) => match e {
                StorageError::NotFound(_) | StorageError::UploadNotFound(_) => "not_found",
                StorageError::SignatureExpired | StorageError::InvalidSignature => "forbidden",
                StorageError::InvalidKey(_) | StorageError::InvalidPart(_) => "bad_request",
                _ => "storage_error",
            },
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Service(e) => match e {
                ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::AllocationExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::StorageFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(e) => match e {
                StorageError::NotFound(_) | StorageError::UploadNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                StorageError::SignatureExpired | StorageError::InvalidSignature => {
                    StatusCode::FORBIDDEN
                }
                StorageError::InvalidKey(_) | StorageError::InvalidPart(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients. Server-side faults are replaced by
    /// a generic text; the details go to the log.
    fn public_message(&self) -> String {
        match self {
            Self::Service(ServiceError::StorageFault(_)) => {
                "a storage operation failed; try again later".to_string()
            }
            Self::Service(ServiceError::Validation(msg)) => msg.clone(),
            Self::Service(ServiceError::NotFound(what)) => format!("{what} not found"),
            Self::Service(e @ ServiceError::AllocationExhausted { .. }) => {
                format!("{e}; retry the request")
            }
            Self::Storage(_) if self.status_code().is_server_error() => {
                "a storage operation failed; try again later".to_string()
            }
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        crate::metrics::record_api_error(self.code());

        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
