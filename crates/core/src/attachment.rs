//! Attachment identity, ownership and status.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an attachment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Generate a new random attachment ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid attachment ID: {e}")))
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttachmentId({})", self.0)
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity kinds an attachment can belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    TestCase,
    TestStep,
    Defect,
    Comment,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestCase => "test_case",
            Self::TestStep => "test_step",
            Self::Defect => "defect",
            Self::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "test_case" => Ok(Self::TestCase),
            "test_step" => Ok(Self::TestStep),
            "defect" => Ok(Self::Defect),
            "comment" => Ok(Self::Comment),
            other => Err(crate::Error::InvalidOwner(format!(
                "unknown owner type '{other}'"
            ))),
        }
    }
}

/// The single entity an attachment belongs to.
///
/// Ownership is exclusive: an attachment has at most one owner at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentOwner {
    #[serde(rename = "type")]
    pub kind: OwnerKind,
    pub id: Uuid,
}

impl AttachmentOwner {
    pub fn new(kind: OwnerKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    /// Rebuild an owner from the four nullable owner columns.
    ///
    /// Returns an error if more than one column is set.
    pub fn from_columns(
        test_case_id: Option<Uuid>,
        test_step_id: Option<Uuid>,
        defect_id: Option<Uuid>,
        comment_id: Option<Uuid>,
    ) -> crate::Result<Option<Self>> {
        let set: Vec<Self> = [
            test_case_id.map(|id| Self::new(OwnerKind::TestCase, id)),
            test_step_id.map(|id| Self::new(OwnerKind::TestStep, id)),
            defect_id.map(|id| Self::new(OwnerKind::Defect, id)),
            comment_id.map(|id| Self::new(OwnerKind::Comment, id)),
        ]
        .into_iter()
        .flatten()
        .collect();

        match set.as_slice() {
            [] => Ok(None),
            [owner] => Ok(Some(*owner)),
            _ => Err(crate::Error::InvalidOwner(format!(
                "attachment has {} owners, expected at most one",
                set.len()
            ))),
        }
    }

    /// Split into `(test_case_id, test_step_id, defect_id, comment_id)`.
    pub fn to_columns(
        owner: Option<&Self>,
    ) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>, Option<Uuid>) {
        let pick = |kind: OwnerKind| owner.filter(|o| o.kind == kind).map(|o| o.id);
        (
            pick(OwnerKind::TestCase),
            pick(OwnerKind::TestStep),
            pick(OwnerKind::Defect),
            pick(OwnerKind::Comment),
        )
    }
}

/// Attachment lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStatus {
    /// Uploaded and visible.
    Active,
    /// A delete was prepared and has not been confirmed yet.
    PendingDelete,
    /// Metadata was removed after the blob deletion was confirmed.
    Deleted,
}

impl AttachmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// Attachment metadata as exposed to callers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttachmentRecord {
    pub id: AttachmentId,
    pub storage_key: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub owner: Option<AttachmentOwner>,
    pub status: AttachmentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Maximum length of the file-name part of a storage key.
const MAX_KEY_FILE_NAME_LEN: usize = 128;

/// Reduce a user-supplied file name to a storage-key-safe form.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
/// Leading dots are stripped so keys never contain `..` segments.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.replace("..", "_");
    let cleaned = cleaned.trim_start_matches('.');
    let truncated: String = cleaned.chars().take(MAX_KEY_FILE_NAME_LEN).collect();
    if truncated.is_empty() {
        "file".to_string()
    } else {
        truncated
    }
}

/// Build the blob storage key for a new upload.
///
/// Layout: `attachments/<owner kind or "unlinked">/<uuid>-<sanitized name>`.
pub fn storage_key_for(owner: Option<&AttachmentOwner>, file_name: &str) -> String {
    let scope = owner.map(|o| o.kind.as_str()).unwrap_or("unlinked");
    format!(
        "attachments/{}/{}-{}",
        scope,
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}
