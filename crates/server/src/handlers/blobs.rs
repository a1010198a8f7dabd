//! Signed blob endpoints for backends that host blobs locally.
//!
//! The filesystem backend presigns URLs pointing at these routes. Every
//! request carries `op`, `expires` and an HMAC `sig` over the key and the
//! operation's parameters; nothing is served without a valid signature.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use casebook_storage::{BlobOp, LocalBlobHost, SignedBlobQuery};

fn local_host(state: &AppState) -> ApiResult<&dyn LocalBlobHost> {
    state.blobs.local_host().ok_or_else(|| {
        ApiError::NotFound("blob routes are not served by this storage backend".to_string())
    })
}

/// Check the signature and that it was issued for `expected`.
fn authorize(
    host: &dyn LocalBlobHost,
    key: &str,
    query: Result<Query<SignedBlobQuery>, QueryRejection>,
    expected: BlobOp,
) -> ApiResult<SignedBlobQuery> {
    let Query(query) =
        query.map_err(|_| ApiError::Forbidden("missing or malformed signature".to_string()))?;
    if query.op != expected {
        return Err(ApiError::Forbidden(format!(
            "URL was signed for {}, not {}",
            query.op.as_str(),
            expected.as_str()
        )));
    }
    host.signer().verify(key, &query)?;
    Ok(query)
}

/// PUT /v1/blobs/{*key}?op=put_part&upload_id=..&part=..
pub async fn put_blob_part(
    State(state): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<SignedBlobQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Response> {
    let host = local_host(&state)?;
    let query = authorize(host, &key, query, BlobOp::PutPart)?;
    let (Some(upload_id), Some(part)) = (query.upload_id.as_deref(), query.part) else {
        return Err(ApiError::BadRequest(
            "upload_id and part are required".to_string(),
        ));
    };

    let len = body.len() as u64;
    let etag = host.write_part(&key, upload_id, part, body).await?;
    metrics::BLOB_BYTES_RECEIVED.inc_by(len);
    tracing::debug!(storage_key = %key, upload_id, part, bytes = len, "part stored");

    Ok((StatusCode::OK, [(header::ETAG, format!("\"{etag}\""))]).into_response())
}

/// GET /v1/blobs/{*key}?op=get
pub async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<SignedBlobQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let host = local_host(&state)?;
    authorize(host, &key, query, BlobOp::Get)?;
    let data = host.read_object(&key).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

/// DELETE /v1/blobs/{*key}?op=delete
///
/// Idempotent: deleting a missing blob succeeds.
pub async fn delete_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<SignedBlobQuery>, QueryRejection>,
) -> ApiResult<StatusCode> {
    let host = local_host(&state)?;
    authorize(host, &key, query, BlobOp::Delete)?;
    host.remove_object(&key).await?;
    tracing::info!(storage_key = %key, "blob deleted through signed URL");
    Ok(StatusCode::NO_CONTENT)
}
