//! Two-phase attachment deletion.
//!
//! `prepare` hands the caller a presigned DELETE for the blob and records an
//! in-flight marker; nothing is removed. `confirm` makes sure the blob is gone
//! and then removes the metadata row. A storage failure during confirm leaves
//! the row untouched so the delete can be retried or reconciled.

use crate::error::{ServiceError, ServiceResult};
use casebook_core::attachment::{AttachmentId, AttachmentStatus};
use casebook_metadata::MetadataStore;
use casebook_metadata::models::AttachmentDeletionRow;
use casebook_storage::BlobStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Capability to delete an attachment's blob.
#[derive(Clone, Debug, Serialize)]
pub struct DeletePreparation {
    pub attachment_id: AttachmentId,
    pub delete_url: String,
    /// Identifies this prepare call; a later prepare replaces it.
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Outcome of a confirmed deletion.
#[derive(Clone, Debug, Serialize)]
pub struct DeleteConfirmation {
    pub attachment_id: AttachmentId,
    pub storage_key: String,
    pub status: AttachmentStatus,
}

/// Coordinates the prepare/confirm protocol between metadata and blob store.
#[derive(Clone)]
pub struct TwoPhaseDeleter {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    delete_url_ttl: Duration,
}

impl TwoPhaseDeleter {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        delete_url_ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            blobs,
            delete_url_ttl,
        }
    }

    /// Issue a presigned DELETE and mark the attachment pending deletion.
    ///
    /// Repeating prepare is harmless: each call gets a fresh URL and token.
    pub async fn prepare(&self, attachment_id: AttachmentId) -> ServiceResult<DeletePreparation> {
        let id = *attachment_id.as_uuid();
        let attachment = self
            .metadata
            .get_attachment(id)
            .await
            .map_err(|e| fault(e.into(), id, "load attachment"))?
            .ok_or_else(|| ServiceError::NotFound(format!("attachment {attachment_id}")))?
            .attachment;

        let presigned = self
            .blobs
            .presign_delete(&attachment.storage_key, self.delete_url_ttl)
            .await
            .map_err(|e| fault(e.into(), id, "presign delete"))?;

        let marker = AttachmentDeletionRow {
            attachment_id: id,
            token: Uuid::new_v4().simple().to_string(),
            prepared_at: OffsetDateTime::now_utc(),
            expires_at: presigned.expires_at,
        };
        self.metadata
            .upsert_pending_deletion(&marker)
            .await
            .map_err(|e| fault(e.into(), id, "record pending deletion"))?;

        tracing::info!(
            attachment_id = %attachment_id,
            storage_key = %attachment.storage_key,
            "attachment deletion prepared"
        );

        Ok(DeletePreparation {
            attachment_id,
            delete_url: presigned.url,
            token: marker.token,
            expires_at: marker.expires_at,
        })
    }

    /// Make sure the blob is gone, then remove the metadata row.
    ///
    /// A second confirm for the same attachment returns `NotFound`, which
    /// [`ServiceError::is_benign`] reports as nothing left to do.
    pub async fn confirm(&self, attachment_id: AttachmentId) -> ServiceResult<DeleteConfirmation> {
        let id = *attachment_id.as_uuid();
        let attachment = self
            .metadata
            .get_attachment(id)
            .await
            .map_err(|e| fault(e.into(), id, "load attachment"))?
            .ok_or_else(|| ServiceError::NotFound(format!("attachment {attachment_id}")))?
            .attachment;

        self.ensure_blob_deleted(id, &attachment.storage_key).await?;

        let removed = self
            .metadata
            .delete_attachment(id)
            .await
            .map_err(|e| fault(e.into(), id, "delete attachment row"))?;
        if !removed {
            // Another confirm removed the row between our read and delete.
            return Err(ServiceError::NotFound(format!("attachment {attachment_id}")));
        }

        tracing::info!(
            attachment_id = %attachment_id,
            storage_key = %attachment.storage_key,
            "attachment deleted"
        );

        Ok(DeleteConfirmation {
            attachment_id,
            storage_key: attachment.storage_key,
            status: AttachmentStatus::Deleted,
        })
    }

    /// Delete the blob if the client has not already done so.
    pub(crate) async fn ensure_blob_deleted(&self, id: Uuid, storage_key: &str) -> ServiceResult<()> {
        let present = self
            .blobs
            .exists(storage_key)
            .await
            .map_err(|e| fault(e.into(), id, "check blob"))?;
        if present {
            self.blobs
                .delete(storage_key)
                .await
                .map_err(|e| fault(e.into(), id, "delete blob"))?;
        }
        Ok(())
    }
}

fn fault(err: ServiceError, attachment_id: Uuid, step: &str) -> ServiceError {
    if let ServiceError::StorageFault(detail) = &err {
        tracing::error!(%attachment_id, step, error = %detail, "attachment deletion failed");
    }
    err
}
