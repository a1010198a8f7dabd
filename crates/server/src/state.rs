//! Application state shared across handlers.

use casebook_core::config::AppConfig;
use casebook_metadata::MetadataStore;
use casebook_service::Services;
use casebook_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob storage backend.
    pub blobs: Arc<dyn BlobStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Services wired to the two stores above.
    pub services: Services,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let services = Services::new(&config, metadata.clone(), blobs.clone());
        Self {
            config: Arc::new(config),
            blobs,
            metadata,
            services,
        }
    }
}
