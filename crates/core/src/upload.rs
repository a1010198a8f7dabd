//! Multipart upload session types and part validation.

use crate::attachment::AttachmentOwner;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Upload session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Session is open and parts may be uploaded.
    Open,
    /// Parts were assembled and the attachment was recorded.
    Completed,
    /// Session was explicitly aborted.
    Aborted,
    /// Session expired without completing.
    Expired,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            "expired" => Ok(Self::Expired),
            other => Err(crate::Error::UploadSession(format!(
                "unknown upload state '{other}'"
            ))),
        }
    }

    /// Check if the session can still be completed or aborted.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Expired)
    }
}

/// Number of parts needed to upload `file_size` bytes in `chunk_size` pieces.
pub fn part_count(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Request to start a multipart upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    /// Entity the attachment will belong to, if already known.
    #[serde(default)]
    pub owner: Option<AttachmentOwner>,
}

/// A presigned URL for one part of a multipart upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartUrl {
    pub part_number: u32,
    pub url: String,
}

/// Response from starting a multipart upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadResponse {
    pub upload_id: String,
    pub storage_key: String,
    pub chunk_size: u64,
    pub part_count: u32,
    pub part_urls: Vec<PartUrl>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// A part acknowledged by the blob store, identified by number and integrity tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Request to assemble uploaded parts and record the attachment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub storage_key: String,
    #[serde(default)]
    pub parts: Vec<CompletedPart>,
    /// Overrides the owner given at initialization.
    #[serde(default)]
    pub owner: Option<AttachmentOwner>,
}

/// Request to discard an in-progress multipart upload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AbortUploadRequest {
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub storage_key: String,
}

/// Check that `parts` is exactly `1..=expected`, ascending, with non-empty tags.
pub fn validate_parts(parts: &[CompletedPart], expected: u32) -> crate::Result<()> {
    if let Some(part) = parts.iter().find(|p| p.part_number == 0) {
        return Err(crate::Error::InvalidParts(format!(
            "part numbers start at 1, got {}",
            part.part_number
        )));
    }

    if let Some(part) = parts.iter().find(|p| p.etag.trim().is_empty()) {
        return Err(crate::Error::InvalidParts(format!(
            "part {} has an empty etag",
            part.part_number
        )));
    }

    for pair in parts.windows(2) {
        let (prev, next) = (pair[0].part_number, pair[1].part_number);
        if next == prev {
            return Err(crate::Error::InvalidParts(format!("duplicate part {next}")));
        }
        if next < prev {
            return Err(crate::Error::InvalidParts(format!(
                "parts out of order: part {next} listed after part {prev}"
            )));
        }
    }

    if let Some(part) = parts.iter().find(|p| p.part_number > expected) {
        return Err(crate::Error::InvalidParts(format!(
            "part {} exceeds expected part count {}",
            part.part_number, expected
        )));
    }

    // Strictly ascending and bounded by `expected`, so the first gap is the first missing part.
    let mut next_expected = 1u32;
    for part in parts {
        if part.part_number != next_expected {
            break;
        }
        next_expected += 1;
    }
    if next_expected <= expected {
        return Err(crate::Error::InvalidParts(format!(
            "missing part {next_expected} of {expected}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(numbers: &[u32]) -> Vec<CompletedPart> {
        numbers
            .iter()
            .map(|n| CompletedPart {
                part_number: *n,
                etag: format!("etag-{n}"),
            })
            .collect()
    }

    #[test]
    fn test_upload_state_flags() {
        assert!(UploadState::Open.is_active());
        assert!(!UploadState::Open.is_terminal());
        for state in [
            UploadState::Completed,
            UploadState::Aborted,
            UploadState::Expired,
        ] {
            assert!(!state.is_active());
            assert!(state.is_terminal());
            assert_eq!(UploadState::parse(state.as_str()).unwrap(), state);
        }
        assert!(UploadState::parse("committing").is_err());
    }

    #[test]
    fn test_part_count() {
        assert_eq!(part_count(100, 64), 2);
        assert_eq!(part_count(128, 64), 2);
        assert_eq!(part_count(1, 64), 1);
        assert_eq!(part_count(0, 64), 0);
        assert_eq!(part_count(10, 0), 0);
    }

    #[test]
    fn test_validate_parts_accepts_complete_sequence() {
        validate_parts(&parts(&[1, 2, 3]), 3).unwrap();
        validate_parts(&parts(&[1]), 1).unwrap();
    }

    #[test]
    fn test_validate_parts_reports_missing_part() {
        let err = validate_parts(&parts(&[1, 3]), 3).unwrap_err();
        assert!(err.to_string().contains("missing part 2 of 3"), "{err}");

        let err = validate_parts(&parts(&[1, 2]), 3).unwrap_err();
        assert!(err.to_string().contains("missing part 3"), "{err}");

        let err = validate_parts(&[], 2).unwrap_err();
        assert!(err.to_string().contains("missing part 1"), "{err}");
    }

    #[test]
    fn test_validate_parts_rejects_disorder_and_duplicates() {
        let err = validate_parts(&parts(&[2, 1, 3]), 3).unwrap_err();
        assert!(err.to_string().contains("out of order"), "{err}");

        let err = validate_parts(&parts(&[1, 1, 2]), 2).unwrap_err();
        assert!(err.to_string().contains("duplicate part 1"), "{err}");

        let err = validate_parts(&parts(&[1, 2, 3, 4]), 3).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");

        let err = validate_parts(&parts(&[0, 1]), 1).unwrap_err();
        assert!(err.to_string().contains("start at 1"), "{err}");
    }

    #[test]
    fn test_validate_parts_rejects_empty_etag() {
        let mut list = parts(&[1, 2]);
        list[1].etag = " ".to_string();
        let err = validate_parts(&list, 2).unwrap_err();
        assert!(err.to_string().contains("part 2 has an empty etag"), "{err}");
    }
}
