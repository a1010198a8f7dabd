//! Attachment repository trait.

use crate::error::MetadataResult;
use crate::models::{AttachmentDeletionRow, AttachmentRow, AttachmentWithDeletion};
use async_trait::async_trait;
use casebook_core::attachment::AttachmentOwner;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for attachment metadata and pending deletions.
#[async_trait]
pub trait AttachmentRepo: Send + Sync {
    async fn insert_attachment(&self, row: &AttachmentRow) -> MetadataResult<()>;

    /// Get an attachment together with its pending-deletion marker.
    async fn get_attachment(
        &self,
        attachment_id: Uuid,
    ) -> MetadataResult<Option<AttachmentWithDeletion>>;

    /// Whether any attachment row points at `storage_key`.
    async fn attachment_exists_for_key(&self, storage_key: &str) -> MetadataResult<bool>;

    /// List attachments owned by an entity, oldest first.
    async fn list_attachments_by_owner(
        &self,
        owner: &AttachmentOwner,
    ) -> MetadataResult<Vec<AttachmentWithDeletion>>;

    /// Replace the owner. All four owner columns are rewritten in one statement.
    /// Fails with `NotFound` if the attachment does not exist.
    async fn set_attachment_owner(
        &self,
        attachment_id: Uuid,
        owner: Option<&AttachmentOwner>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete an attachment row. Returns `false` if no row was removed,
    /// which lets concurrent confirms detect that another one won.
    async fn delete_attachment(&self, attachment_id: Uuid) -> MetadataResult<bool>;

    /// Insert or replace the pending-deletion marker for an attachment.
    async fn upsert_pending_deletion(&self, row: &AttachmentDeletionRow) -> MetadataResult<()>;

    /// Remove a pending-deletion marker. Returns `false` if there was none.
    async fn clear_pending_deletion(&self, attachment_id: Uuid) -> MetadataResult<bool>;

    /// Pending deletions prepared before `prepared_before`, oldest first.
    async fn list_pending_deletions(
        &self,
        prepared_before: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<AttachmentDeletionRow>>;
}
