//! Attachment reads, download links and owner changes.

use crate::error::{ServiceError, ServiceResult};
use casebook_core::attachment::{AttachmentId, AttachmentOwner, AttachmentRecord};
use casebook_metadata::MetadataStore;
use casebook_storage::{BlobStore, PresignedUrl};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Read-side and ownership operations on recorded attachments.
#[derive(Clone)]
pub struct AttachmentService {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    download_url_ttl: Duration,
}

impl AttachmentService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        download_url_ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            blobs,
            download_url_ttl,
        }
    }

    pub async fn get(&self, attachment_id: AttachmentId) -> ServiceResult<AttachmentRecord> {
        let found = self
            .metadata
            .get_attachment(*attachment_id.as_uuid())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("attachment {attachment_id}")))?;
        Ok(found.into_record()?)
    }

    /// Presigned GET for the attachment's bytes.
    pub async fn download_url(&self, attachment_id: AttachmentId) -> ServiceResult<PresignedUrl> {
        let record = self.get(attachment_id).await?;
        let url = self
            .blobs
            .presign_get(&record.storage_key, self.download_url_ttl)
            .await
            .map_err(|e| {
                tracing::error!(%attachment_id, error = %e, "failed to presign download");
                ServiceError::from(e)
            })?;
        Ok(url)
    }

    /// Move an attachment to a new owner, or detach it with `None`.
    pub async fn link(
        &self,
        attachment_id: AttachmentId,
        owner: Option<AttachmentOwner>,
    ) -> ServiceResult<AttachmentRecord> {
        self.metadata
            .set_attachment_owner(
                *attachment_id.as_uuid(),
                owner.as_ref(),
                OffsetDateTime::now_utc(),
            )
            .await
            .map_err(|e| match e {
                casebook_metadata::MetadataError::NotFound(_) => {
                    ServiceError::NotFound(format!("attachment {attachment_id}"))
                }
                other => other.into(),
            })?;

        tracing::info!(
            %attachment_id,
            owner_type = owner.as_ref().map(|o| o.kind.as_str()),
            owner_id = owner.as_ref().map(|o| o.id.to_string()),
            "attachment owner updated"
        );
        self.get(attachment_id).await
    }

    /// Attachments belonging to `owner`, oldest first.
    pub async fn list_for_owner(&self, owner: &AttachmentOwner) -> ServiceResult<Vec<AttachmentRecord>> {
        self.metadata
            .list_attachments_by_owner(owner)
            .await?
            .into_iter()
            .map(|a| a.into_record().map_err(ServiceError::from))
            .collect()
    }
}
