//! Core domain types for the casebook test-management backend.
//!
//! This crate defines the data model shared by every other crate:
//! - Per-project sequence ids (`tc7`, `DEF-12`)
//! - Attachment identity, ownership and status
//! - Multipart upload sessions and part manifests
//! - Application configuration

pub mod attachment;
pub mod config;
pub mod error;
pub mod sequence;
pub mod upload;

pub use attachment::{AttachmentId, AttachmentOwner, AttachmentRecord, AttachmentStatus, OwnerKind};
pub use error::{Error, Result};
pub use sequence::{SequenceId, SequenceKind};
pub use upload::{CompletedPart, UploadState};

/// Default multipart chunk size: 10 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default maximum attachment size: 500 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Maximum number of parts in one multipart upload (S3 limit).
pub const MAX_PART_COUNT: u64 = 10_000;
