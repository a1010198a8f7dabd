//! Defect repository trait.

use crate::error::MetadataResult;
use crate::models::DefectRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for defects.
#[async_trait]
pub trait DefectRepo: Send + Sync {
    /// Count defects in a project, soft-deleted ones included.
    async fn count_defects(&self, project_id: Uuid) -> MetadataResult<u64>;

    async fn get_defect_by_defect_id(
        &self,
        project_id: Uuid,
        defect_id: &str,
    ) -> MetadataResult<Option<DefectRow>>;

    /// Insert a defect. Fails with `UniqueViolation` if `defect_id` is taken.
    async fn insert_defect(&self, row: &DefectRow) -> MetadataResult<()>;

    async fn get_defect(&self, id: Uuid) -> MetadataResult<Option<DefectRow>>;

    async fn list_defects(&self, project_id: Uuid) -> MetadataResult<Vec<DefectRow>>;

    async fn soft_delete_defect(&self, id: Uuid, deleted_at: OffsetDateTime)
    -> MetadataResult<()>;
}
