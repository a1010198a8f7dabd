//! Metadata store abstraction and the SQLite implementation for casebook.
//!
//! This crate provides the relational data model:
//! - Projects, the parent scope for sequence ids
//! - Test cases and defects with per-project unique sequence ids
//! - Attachments, their exclusive owner and pending-deletion markers
//! - Multipart upload sessions

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{CounterStore, DefectSequences, TestCaseSequences};
pub use store::{MetadataStore, SqliteStore};

use casebook_core::config::MetadataConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(path, Duration::from_secs(*busy_timeout_secs)).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
