//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Parse a JSON request body, reporting failures in the API error shape.
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Parse a UUID path or query parameter.
pub fn parse_uuid(value: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| ApiError::BadRequest(format!("invalid {what}: {value}")))
}
