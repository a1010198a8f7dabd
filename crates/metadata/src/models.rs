//! Database models mapping to the metadata schema.

use casebook_core::attachment::{
    AttachmentId, AttachmentOwner, AttachmentRecord, AttachmentStatus, OwnerKind,
};
use casebook_core::upload::UploadState;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Projects
// =============================================================================

/// Project record: the parent scope for sequence ids.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub project_id: Uuid,
    pub project_key: String,
    pub name: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Sequenced entities
// =============================================================================

/// Test case record. `tc_id` is unique per project, soft-deleted rows included.
#[derive(Debug, Clone, FromRow)]
pub struct TestCaseRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub tc_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Caller-supplied fields for a new test case.
#[derive(Debug, Clone)]
pub struct TestCaseDraft {
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub status: String,
}

/// Defect record. `defect_id` is unique per project, soft-deleted rows included.
#[derive(Debug, Clone, FromRow)]
pub struct DefectRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub defect_id: String,
    pub title: String,
    pub description: Option<String>,
    pub severity: String,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Caller-supplied fields for a new defect.
#[derive(Debug, Clone)]
pub struct DefectDraft {
    pub title: String,
    pub description: Option<String>,
    pub severity: String,
    pub status: String,
}

// =============================================================================
// Attachments
// =============================================================================

/// Attachment record. At most one of the owner columns is set.
#[derive(Debug, Clone, FromRow)]
pub struct AttachmentRow {
    pub attachment_id: Uuid,
    pub storage_key: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub test_case_id: Option<Uuid>,
    pub test_step_id: Option<Uuid>,
    pub defect_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl AttachmentRow {
    /// Build a row for a freshly assembled upload.
    pub fn new(
        storage_key: String,
        file_name: String,
        file_size: u64,
        file_type: String,
        owner: Option<&AttachmentOwner>,
        now: OffsetDateTime,
    ) -> Self {
        let (test_case_id, test_step_id, defect_id, comment_id) =
            AttachmentOwner::to_columns(owner);
        Self {
            attachment_id: Uuid::new_v4(),
            storage_key,
            file_name,
            file_size: i64::try_from(file_size).unwrap_or(i64::MAX),
            file_type,
            test_case_id,
            test_step_id,
            defect_id,
            comment_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn owner(&self) -> casebook_core::Result<Option<AttachmentOwner>> {
        AttachmentOwner::from_columns(
            self.test_case_id,
            self.test_step_id,
            self.defect_id,
            self.comment_id,
        )
    }

    /// Convert to the caller-facing record with the given derived status.
    pub fn into_record(self, status: AttachmentStatus) -> casebook_core::Result<AttachmentRecord> {
        let owner = self.owner()?;
        Ok(AttachmentRecord {
            id: AttachmentId::from_uuid(self.attachment_id),
            storage_key: self.storage_key,
            file_name: self.file_name,
            file_size: u64::try_from(self.file_size).unwrap_or(0),
            file_type: self.file_type,
            owner,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// In-flight deletion marker written by the prepare phase.
#[derive(Debug, Clone, FromRow)]
pub struct AttachmentDeletionRow {
    pub attachment_id: Uuid,
    pub token: String,
    pub prepared_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// An attachment joined with its pending-deletion marker, if any.
#[derive(Debug, Clone)]
pub struct AttachmentWithDeletion {
    pub attachment: AttachmentRow,
    pub deletion: Option<AttachmentDeletionRow>,
}

impl AttachmentWithDeletion {
    pub fn status(&self) -> AttachmentStatus {
        if self.deletion.is_some() {
            AttachmentStatus::PendingDelete
        } else {
            AttachmentStatus::Active
        }
    }

    pub fn into_record(self) -> casebook_core::Result<AttachmentRecord> {
        let status = self.status();
        self.attachment.into_record(status)
    }
}

// =============================================================================
// Upload sessions
// =============================================================================

/// Multipart upload session. `upload_id` is issued by the blob store.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub upload_id: String,
    pub storage_key: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub chunk_size: i64,
    pub part_count: i64,
    pub owner_type: Option<String>,
    pub owner_id: Option<Uuid>,
    pub state: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl UploadSessionRow {
    pub fn state(&self) -> casebook_core::Result<UploadState> {
        UploadState::parse(&self.state)
    }

    pub fn owner(&self) -> casebook_core::Result<Option<AttachmentOwner>> {
        match (self.owner_type.as_deref(), self.owner_id) {
            (Some(kind), Some(id)) => Ok(Some(AttachmentOwner::new(OwnerKind::parse(kind)?, id))),
            (None, None) => Ok(None),
            _ => Err(casebook_core::Error::InvalidOwner(format!(
                "upload {} has a partial owner",
                self.upload_id
            ))),
        }
    }
}
