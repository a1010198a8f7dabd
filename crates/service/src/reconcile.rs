//! Sweep for interrupted deletes and abandoned uploads.
//!
//! A prepare whose confirm never arrives leaves an attachment pending
//! deletion. Once the marker is older than the grace period:
//! - blob gone: the client deleted it, so finish the delete;
//! - blob present and the delete URL has expired: revert to active.
//!
//! Open upload sessions past `expires_at` are aborted at the blob store and
//! marked expired. An object assembled for such a session without an
//! attachment row is deleted first.

use crate::error::ServiceResult;
use casebook_core::config::ReconcileConfig;
use casebook_core::upload::UploadState;
use casebook_metadata::MetadataStore;
use casebook_metadata::models::AttachmentDeletionRow;
use casebook_storage::BlobStore;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

/// Counters from one reconcile pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Pending deletions looked at.
    pub deletions_examined: u64,
    /// Deletions finished because the blob was already gone.
    pub deletions_finished: u64,
    /// Deletions reverted because the blob survived the delete URL.
    pub deletions_reverted: u64,
    /// Upload sessions aborted and marked expired.
    pub uploads_expired: u64,
    /// Items skipped after a store error; retried next pass.
    pub errors: u64,
}

enum DeletionOutcome {
    Finished,
    Reverted,
    Waiting,
}

#[derive(Clone)]
pub struct Reconciler {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    grace_period: time::Duration,
    batch_size: u32,
}

impl Reconciler {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            metadata,
            blobs,
            grace_period: config.grace_period(),
            batch_size: config.batch_size.max(1),
        }
    }

    pub async fn run_once(&self) -> ServiceResult<ReconcileStats> {
        self.run_once_at(OffsetDateTime::now_utc()).await
    }

    /// One pass with an explicit clock.
    pub async fn run_once_at(&self, now: OffsetDateTime) -> ServiceResult<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        let cutoff = now - self.grace_period;
        let pending = self
            .metadata
            .list_pending_deletions(cutoff, self.batch_size)
            .await?;
        for marker in pending {
            stats.deletions_examined += 1;
            match self.reconcile_deletion(&marker, now).await {
                Ok(DeletionOutcome::Finished) => stats.deletions_finished += 1,
                Ok(DeletionOutcome::Reverted) => stats.deletions_reverted += 1,
                Ok(DeletionOutcome::Waiting) => {}
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(
                        attachment_id = %marker.attachment_id,
                        error = %e,
                        "failed to reconcile pending deletion"
                    );
                }
            }
        }

        let expired = self
            .metadata
            .get_expired_sessions(now, self.batch_size)
            .await?;
        for session in expired {
            if let Err(e) = self
                .blobs
                .abort_multipart(&session.storage_key, &session.upload_id)
                .await
            {
                stats.errors += 1;
                tracing::warn!(upload_id = %session.upload_id, error = %e, "failed to abort expired upload");
                continue;
            }
            if let Err(e) = self.remove_unrecorded_object(&session.storage_key).await {
                stats.errors += 1;
                tracing::warn!(upload_id = %session.upload_id, error = %e, "failed to remove unrecorded upload object");
                continue;
            }
            match self
                .metadata
                .transition_session(&session.upload_id, UploadState::Open, UploadState::Expired, now)
                .await
            {
                Ok(true) => stats.uploads_expired += 1,
                // Completed or aborted by a client in the meantime.
                Ok(false) => {}
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(upload_id = %session.upload_id, error = %e, "failed to mark upload expired");
                }
            }
        }

        tracing::info!(
            deletions_examined = stats.deletions_examined,
            deletions_finished = stats.deletions_finished,
            deletions_reverted = stats.deletions_reverted,
            uploads_expired = stats.uploads_expired,
            errors = stats.errors,
            "reconcile pass finished"
        );
        Ok(stats)
    }

    /// Delete an object assembled for a session that never got an attachment
    /// row. Objects with a row belong to a completed upload and are kept.
    async fn remove_unrecorded_object(&self, storage_key: &str) -> ServiceResult<()> {
        if !self.blobs.exists(storage_key).await? {
            return Ok(());
        }
        if self.metadata.attachment_exists_for_key(storage_key).await? {
            return Ok(());
        }
        self.blobs.delete(storage_key).await?;
        tracing::info!(storage_key, "removed object left by an unrecorded upload");
        Ok(())
    }

    async fn reconcile_deletion(
        &self,
        marker: &AttachmentDeletionRow,
        now: OffsetDateTime,
    ) -> ServiceResult<DeletionOutcome> {
        let Some(found) = self.metadata.get_attachment(marker.attachment_id).await? else {
            // Row already gone; the marker went with it.
            return Ok(DeletionOutcome::Waiting);
        };
        let storage_key = &found.attachment.storage_key;

        if !self.blobs.exists(storage_key).await? {
            if self.metadata.delete_attachment(marker.attachment_id).await? {
                tracing::info!(
                    attachment_id = %marker.attachment_id,
                    storage_key = %storage_key,
                    "finished interrupted attachment deletion"
                );
                return Ok(DeletionOutcome::Finished);
            }
            return Ok(DeletionOutcome::Waiting);
        }

        if marker.expires_at < now {
            self.metadata
                .clear_pending_deletion(marker.attachment_id)
                .await?;
            tracing::info!(
                attachment_id = %marker.attachment_id,
                storage_key = %storage_key,
                "reverted abandoned attachment deletion"
            );
            return Ok(DeletionOutcome::Reverted);
        }

        Ok(DeletionOutcome::Waiting)
    }
}
