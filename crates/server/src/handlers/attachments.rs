//! Attachment reads, owner changes and two-phase deletion.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_json, parse_uuid};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use bytes::Bytes;
use casebook_core::attachment::{
    AttachmentId, AttachmentOwner, AttachmentRecord, AttachmentStatus, OwnerKind,
};
use casebook_storage::PresignedUrl;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Attachment as returned by the API.
#[derive(Debug, Serialize)]
pub struct AttachmentResponse {
    pub id: AttachmentId,
    pub storage_key: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub owner: Option<AttachmentOwner>,
    pub status: AttachmentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<AttachmentRecord> for AttachmentResponse {
    fn from(record: AttachmentRecord) -> Self {
        Self {
            id: record.id,
            storage_key: record.storage_key,
            file_name: record.file_name,
            file_size: record.file_size,
            file_type: record.file_type,
            owner: record.owner,
            status: record.status,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub attachment: AttachmentResponse,
    pub download_url: PresignedUrl,
}

fn parse_attachment_id(value: &str) -> ApiResult<AttachmentId> {
    Ok(AttachmentId::from_uuid(parse_uuid(value, "attachment id")?))
}

/// GET /v1/attachments/{id}
pub async fn get_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    let id = parse_attachment_id(&id)?;
    let record = state.services.attachments.get(id).await?;
    let download_url = state.services.attachments.download_url(id).await?;
    Ok(Json(DownloadResponse {
        attachment: record.into(),
        download_url,
    }))
}

/// Body of PATCH /v1/attachments/{id}. A null or absent owner detaches.
#[derive(Debug, Deserialize)]
pub struct LinkAttachmentRequest {
    #[serde(default)]
    pub owner: Option<AttachmentOwner>,
}

/// PATCH /v1/attachments/{id}
pub async fn link_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<AttachmentResponse>> {
    let id = parse_attachment_id(&id)?;
    let req: LinkAttachmentRequest = parse_json(&body)?;
    let record = state.services.attachments.link(id, req.owner).await?;
    Ok(Json(record.into()))
}

#[derive(Debug, Deserialize)]
pub struct ListAttachmentsQuery {
    pub owner_type: Option<String>,
    pub owner_id: Option<String>,
}

/// GET /v1/attachments?owner_type=..&owner_id=..
pub async fn list_attachments(
    State(state): State<AppState>,
    Query(query): Query<ListAttachmentsQuery>,
) -> ApiResult<Json<Vec<AttachmentResponse>>> {
    let (Some(owner_type), Some(owner_id)) = (query.owner_type, query.owner_id) else {
        return Err(ApiError::BadRequest(
            "owner_type and owner_id are required".to_string(),
        ));
    };
    let owner = AttachmentOwner::new(
        OwnerKind::parse(&owner_type)?,
        parse_uuid(&owner_id, "owner id")?,
    );
    let records = state.services.attachments.list_for_owner(&owner).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAttachmentQuery {
    pub step: Option<String>,
}

/// Response for either delete step.
#[derive(Debug, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum DeleteAttachmentResponse {
    Prepare {
        attachment_id: AttachmentId,
        delete_url: String,
        token: String,
        #[serde(with = "time::serde::rfc3339")]
        expires_at: OffsetDateTime,
    },
    Confirm {
        attachment_id: AttachmentId,
        status: AttachmentStatus,
    },
}

/// DELETE /v1/attachments/{id}?step=prepare|confirm
///
/// `prepare` hands out a presigned DELETE and leaves the record in place.
/// `confirm` removes the record once the blob is gone; a repeated confirm
/// answers 404.
pub async fn delete_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteAttachmentQuery>,
) -> ApiResult<Json<DeleteAttachmentResponse>> {
    let id = parse_attachment_id(&id)?;
    match query.step.as_deref() {
        Some("prepare") => {
            let prep = state.services.deleter.prepare(id).await?;
            metrics::ATTACHMENT_DELETE_STEPS
                .with_label_values(&["prepare"])
                .inc();
            Ok(Json(DeleteAttachmentResponse::Prepare {
                attachment_id: prep.attachment_id,
                delete_url: prep.delete_url,
                token: prep.token,
                expires_at: prep.expires_at,
            }))
        }
        Some("confirm") => {
            let done = state.services.deleter.confirm(id).await?;
            metrics::ATTACHMENT_DELETE_STEPS
                .with_label_values(&["confirm"])
                .inc();
            Ok(Json(DeleteAttachmentResponse::Confirm {
                attachment_id: done.attachment_id,
                status: done.status,
            }))
        }
        _ => Err(ApiError::BadRequest(
            "step must be 'prepare' or 'confirm'".to_string(),
        )),
    }
}
