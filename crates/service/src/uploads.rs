//! Multipart upload lifecycle: initialize, complete, abort.

use crate::error::{ServiceError, ServiceResult};
use casebook_core::MAX_PART_COUNT;
use casebook_core::attachment::{AttachmentRecord, AttachmentStatus, storage_key_for};
use casebook_core::config::AttachmentConfig;
use casebook_core::upload::{
    AbortUploadRequest, CompleteUploadRequest, InitUploadRequest, InitUploadResponse, PartUrl,
    UploadState, part_count, validate_parts,
};
use casebook_metadata::MetadataStore;
use casebook_metadata::models::{AttachmentRow, UploadSessionRow};
use casebook_storage::BlobStore;
use std::sync::Arc;
use time::OffsetDateTime;

const MISSING_PARAMETERS: &str = "missing required parameters: upload_id and storage_key";

/// Drives multipart uploads against the blob store and records the result.
#[derive(Clone)]
pub struct UploadCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    config: AttachmentConfig,
}

impl UploadCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        config: AttachmentConfig,
    ) -> Self {
        Self {
            metadata,
            blobs,
            config,
        }
    }

    fn validate_init(&self, req: &InitUploadRequest) -> ServiceResult<()> {
        if !self.config.enabled {
            return Err(ServiceError::Validation(
                "attachment uploads are disabled".to_string(),
            ));
        }
        if req.file_name.trim().is_empty() {
            return Err(ServiceError::Validation(
                "file_name must not be empty".to_string(),
            ));
        }
        if req.file_size == 0 {
            return Err(ServiceError::Validation(
                "file_size must be greater than zero".to_string(),
            ));
        }
        if req.file_size > self.config.max_file_size {
            return Err(ServiceError::Validation(format!(
                "file_size {} exceeds the maximum of {} bytes",
                req.file_size, self.config.max_file_size
            )));
        }
        if !self.config.is_type_allowed(&req.file_type) {
            return Err(ServiceError::Validation(format!(
                "file type '{}' is not allowed",
                req.file_type
            )));
        }
        Ok(())
    }

    /// Start a multipart upload and hand out one presigned URL per part.
    pub async fn initialize(&self, req: InitUploadRequest) -> ServiceResult<InitUploadResponse> {
        self.validate_init(&req)?;

        let chunk_size = self.config.chunk_size;
        let parts = part_count(req.file_size, chunk_size);
        if parts == 0 || parts > MAX_PART_COUNT {
            return Err(ServiceError::Validation(format!(
                "file would need {parts} parts of {chunk_size} bytes (limit {MAX_PART_COUNT})"
            )));
        }
        // Bounded by MAX_PART_COUNT above.
        let parts = parts as u32;

        let storage_key = storage_key_for(req.owner.as_ref(), &req.file_name);
        let upload_id = self
            .blobs
            .create_multipart(&storage_key, &req.file_type)
            .await
            .map_err(|e| fault(e.into(), &storage_key, None, "create multipart upload"))?;

        let urls = match self
            .blobs
            .presign_upload_parts(&storage_key, &upload_id, parts, self.config.upload_url_ttl())
            .await
        {
            Ok(urls) => urls,
            Err(e) => {
                self.discard(&storage_key, &upload_id).await;
                return Err(fault(
                    e.into(),
                    &storage_key,
                    Some(&upload_id),
                    "presign upload parts",
                ));
            }
        };

        let now = OffsetDateTime::now_utc();
        let expires_at = now + self.config.upload_session_ttl();
        let session = UploadSessionRow {
            upload_id: upload_id.clone(),
            storage_key: storage_key.clone(),
            file_name: req.file_name.clone(),
            file_size: i64::try_from(req.file_size).unwrap_or(i64::MAX),
            file_type: req.file_type.clone(),
            chunk_size: i64::try_from(chunk_size).unwrap_or(i64::MAX),
            part_count: i64::from(parts),
            owner_type: req.owner.as_ref().map(|o| o.kind.as_str().to_string()),
            owner_id: req.owner.as_ref().map(|o| o.id),
            state: UploadState::Open.as_str().to_string(),
            created_at: now,
            updated_at: now,
            expires_at,
        };
        if let Err(e) = self.metadata.create_session(&session).await {
            self.discard(&storage_key, &upload_id).await;
            return Err(fault(
                e.into(),
                &storage_key,
                Some(&upload_id),
                "record upload session",
            ));
        }

        tracing::info!(
            upload_id = %upload_id,
            storage_key = %storage_key,
            file_size = req.file_size,
            part_count = parts,
            "upload initialized"
        );

        Ok(InitUploadResponse {
            upload_id,
            storage_key,
            chunk_size,
            part_count: parts,
            part_urls: urls
                .into_iter()
                .zip(1u32..)
                .map(|(url, part_number)| PartUrl {
                    part_number,
                    url: url.url,
                })
                .collect(),
            expires_at,
        })
    }

    /// Assemble the uploaded parts and record the attachment.
    pub async fn complete(&self, req: CompleteUploadRequest) -> ServiceResult<AttachmentRecord> {
        if req.upload_id.trim().is_empty() || req.storage_key.trim().is_empty() {
            return Err(ServiceError::Validation(MISSING_PARAMETERS.to_string()));
        }

        let session = self.open_session(&req.upload_id, &req.storage_key).await?;
        let expected = u32::try_from(session.part_count).unwrap_or(0);
        validate_parts(&req.parts, expected)?;

        let owner = match req.owner {
            Some(owner) => Some(owner),
            None => session.owner()?,
        };

        self.blobs
            .complete_multipart(&session.storage_key, &session.upload_id, &req.parts)
            .await
            .map_err(|e| {
                fault(
                    e.into(),
                    &session.storage_key,
                    Some(&session.upload_id),
                    "complete multipart upload",
                )
            })?;

        let now = OffsetDateTime::now_utc();
        let row = AttachmentRow::new(
            session.storage_key.clone(),
            session.file_name.clone(),
            u64::try_from(session.file_size).unwrap_or(0),
            session.file_type.clone(),
            owner.as_ref(),
            now,
        );
        if let Err(e) = self.metadata.insert_attachment(&row).await {
            let err = fault(
                e.into(),
                &session.storage_key,
                Some(&session.upload_id),
                "record attachment",
            );
            self.discard_assembled(&session).await;
            return Err(err);
        }

        let transitioned = self
            .metadata
            .transition_session(&session.upload_id, UploadState::Open, UploadState::Completed, now)
            .await
            .map_err(|e| {
                fault(
                    e.into(),
                    &session.storage_key,
                    Some(&session.upload_id),
                    "mark session completed",
                )
            })?;
        if !transitioned {
            tracing::warn!(
                upload_id = %session.upload_id,
                "upload session left the open state while completing"
            );
        }

        tracing::info!(
            upload_id = %session.upload_id,
            attachment_id = %row.attachment_id,
            storage_key = %session.storage_key,
            "upload completed"
        );

        Ok(row.into_record(AttachmentStatus::Active)?)
    }

    /// Discard an upload. Works with zero parts uploaded and for uploads the
    /// blob store has already forgotten.
    pub async fn abort(&self, req: AbortUploadRequest) -> ServiceResult<()> {
        if req.upload_id.trim().is_empty() || req.storage_key.trim().is_empty() {
            return Err(ServiceError::Validation(MISSING_PARAMETERS.to_string()));
        }

        let session = self
            .metadata
            .get_session(&req.upload_id)
            .await
            .map_err(|e| fault(e.into(), &req.storage_key, Some(&req.upload_id), "load session"))?;
        if let Some(session) = &session
            && session.storage_key != req.storage_key
        {
            return Err(ServiceError::Validation(
                "storage_key does not match the upload".to_string(),
            ));
        }

        self.blobs
            .abort_multipart(&req.storage_key, &req.upload_id)
            .await
            .map_err(|e| {
                fault(
                    e.into(),
                    &req.storage_key,
                    Some(&req.upload_id),
                    "abort multipart upload",
                )
            })?;

        if session.is_some() {
            self.metadata
                .transition_session(
                    &req.upload_id,
                    UploadState::Open,
                    UploadState::Aborted,
                    OffsetDateTime::now_utc(),
                )
                .await
                .map_err(|e| {
                    fault(
                        e.into(),
                        &req.storage_key,
                        Some(&req.upload_id),
                        "mark session aborted",
                    )
                })?;
        }

        tracing::info!(upload_id = %req.upload_id, storage_key = %req.storage_key, "upload aborted");
        Ok(())
    }

    /// Load a session that can still be completed.
    async fn open_session(&self, upload_id: &str, storage_key: &str) -> ServiceResult<UploadSessionRow> {
        let session = self
            .metadata
            .get_session(upload_id)
            .await
            .map_err(|e| fault(e.into(), storage_key, Some(upload_id), "load session"))?
            .ok_or_else(|| ServiceError::Validation(format!("unknown upload {upload_id}")))?;

        if session.storage_key != storage_key {
            return Err(ServiceError::Validation(
                "storage_key does not match the upload".to_string(),
            ));
        }

        let state = session.state()?;
        if !state.is_active() {
            return Err(ServiceError::Validation(format!(
                "upload {upload_id} is {}",
                state.as_str()
            )));
        }
        if session.expires_at < OffsetDateTime::now_utc() {
            return Err(ServiceError::Validation(format!(
                "upload {upload_id} has expired"
            )));
        }
        Ok(session)
    }

    /// Best-effort cleanup when the object was assembled but could not be
    /// recorded. The multipart upload is gone, so a retried complete cannot
    /// succeed. If the object cannot be deleted the session stays open and
    /// the reconciler removes the object once the session expires.
    async fn discard_assembled(&self, session: &UploadSessionRow) {
        if let Err(e) = self.blobs.delete(&session.storage_key).await {
            tracing::warn!(
                upload_id = %session.upload_id,
                storage_key = %session.storage_key,
                error = %e,
                "failed to delete unrecorded upload; left for the reconciler"
            );
            return;
        }
        if let Err(e) = self
            .metadata
            .transition_session(
                &session.upload_id,
                UploadState::Open,
                UploadState::Aborted,
                OffsetDateTime::now_utc(),
            )
            .await
        {
            tracing::warn!(upload_id = %session.upload_id, error = %e, "failed to mark upload aborted");
        }
    }

    /// Best-effort abort after a failure part way through initialization.
    async fn discard(&self, storage_key: &str, upload_id: &str) {
        if let Err(e) = self.blobs.abort_multipart(storage_key, upload_id).await {
            tracing::warn!(upload_id, storage_key, error = %e, "failed to abort orphaned multipart upload");
        }
    }
}

fn fault(err: ServiceError, storage_key: &str, upload_id: Option<&str>, step: &str) -> ServiceError {
    if let ServiceError::StorageFault(detail) = &err {
        tracing::error!(storage_key, upload_id, step, error = %detail, "upload operation failed");
    }
    err
}
