//! Attachment lifecycle and sequence id services for casebook.
//!
//! Framework-independent logic shared by the HTTP server and background tasks:
//! - [`SequenceAllocator`]: per-project `tcN` / `DEF-N` ids with collision retry
//! - [`TwoPhaseDeleter`]: prepare/confirm attachment deletion
//! - [`UploadCoordinator`]: multipart upload initialize / complete / abort
//! - [`Reconciler`]: finishes or reverts interrupted deletes, expires stale uploads

pub mod allocator;
pub mod attachments;
pub mod deleter;
pub mod entities;
pub mod error;
pub mod reconcile;
pub mod uploads;

pub use allocator::SequenceAllocator;
pub use attachments::AttachmentService;
pub use deleter::{DeleteConfirmation, DeletePreparation, TwoPhaseDeleter};
pub use entities::EntityService;
pub use error::{ServiceError, ServiceResult};
pub use reconcile::{ReconcileStats, Reconciler};
pub use uploads::UploadCoordinator;

use casebook_core::config::AppConfig;
use casebook_metadata::MetadataStore;
use casebook_storage::BlobStore;
use std::sync::Arc;

/// All services wired to the same stores.
#[derive(Clone)]
pub struct Services {
    pub entities: EntityService,
    pub uploads: UploadCoordinator,
    pub attachments: AttachmentService,
    pub deleter: TwoPhaseDeleter,
    pub reconciler: Reconciler,
}

impl Services {
    pub fn new(
        config: &AppConfig,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let allocator = SequenceAllocator::new(&config.allocator);
        Self {
            entities: EntityService::new(metadata.clone(), allocator),
            uploads: UploadCoordinator::new(
                metadata.clone(),
                blobs.clone(),
                config.attachments.clone(),
            ),
            attachments: AttachmentService::new(
                metadata.clone(),
                blobs.clone(),
                config.attachments.download_url_ttl(),
            ),
            deleter: TwoPhaseDeleter::new(
                metadata.clone(),
                blobs.clone(),
                config.attachments.delete_url_ttl(),
            ),
            reconciler: Reconciler::new(metadata, blobs, &config.reconcile),
        }
    }
}
