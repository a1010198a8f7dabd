//! Project repository trait.

use crate::error::MetadataResult;
use crate::models::ProjectRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for projects.
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// Create a project. Fails with `AlreadyExists` if the key is taken.
    async fn create_project(&self, project: &ProjectRow) -> MetadataResult<()>;

    async fn get_project(&self, project_id: Uuid) -> MetadataResult<Option<ProjectRow>>;

    async fn get_project_by_key(&self, project_key: &str) -> MetadataResult<Option<ProjectRow>>;

    /// List all projects ordered by key.
    async fn list_projects(&self) -> MetadataResult<Vec<ProjectRow>>;
}
