//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::UploadSessionRow;
use async_trait::async_trait;
use casebook_core::upload::UploadState;
use time::OffsetDateTime;

/// Repository for multipart upload sessions.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a new upload session.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by the blob store's upload id.
    async fn get_session(&self, upload_id: &str) -> MetadataResult<Option<UploadSessionRow>>;

    /// Move a session from `from` to `to` if it is still in `from`.
    /// Returns `false` when the session is missing or in another state.
    async fn transition_session(
        &self,
        upload_id: &str,
        from: UploadState,
        to: UploadState,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Open sessions whose `expires_at` is before `now`, oldest first.
    async fn get_expired_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;
}
