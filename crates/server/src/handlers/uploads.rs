//! Multipart attachment upload endpoints.

use crate::error::ApiResult;
use crate::handlers::attachments::AttachmentResponse;
use crate::handlers::common::parse_json;
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use bytes::Bytes;
use casebook_core::upload::{
    AbortUploadRequest, CompleteUploadRequest, InitUploadRequest, InitUploadResponse,
};
use serde::Serialize;
use std::time::Instant;

/// POST /v1/attachments/upload
pub async fn init_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<InitUploadResponse>)> {
    let req: InitUploadRequest = parse_json(&body)?;
    let response = state.services.uploads.initialize(req).await?;
    metrics::UPLOADS_INITIALIZED.inc();
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /v1/attachments/upload/complete
pub async fn complete_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<AttachmentResponse>> {
    let req: CompleteUploadRequest = parse_json(&body)?;
    let started = Instant::now();
    let record = state.services.uploads.complete(req).await?;
    metrics::UPLOAD_COMPLETE_DURATION.observe(started.elapsed().as_secs_f64());
    metrics::UPLOADS_COMPLETED.inc();
    Ok(Json(record.into()))
}

#[derive(Debug, Serialize)]
pub struct AbortUploadResponse {
    pub success: bool,
}

/// POST /v1/attachments/upload/abort
pub async fn abort_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<AbortUploadResponse>> {
    let req: AbortUploadRequest = parse_json(&body)?;
    state.services.uploads.abort(req).await?;
    metrics::UPLOADS_ABORTED.inc();
    Ok(Json(AbortUploadResponse { success: true }))
}
