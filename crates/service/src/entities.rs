//! Projects and the sequenced records (test cases, defects) inside them.

use crate::allocator::SequenceAllocator;
use crate::error::{ServiceError, ServiceResult};
use casebook_metadata::models::{DefectDraft, DefectRow, ProjectRow, TestCaseDraft, TestCaseRow};
use casebook_metadata::{DefectSequences, MetadataStore, TestCaseSequences};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Entity operations that need sequence ids.
#[derive(Clone)]
pub struct EntityService {
    metadata: Arc<dyn MetadataStore>,
    allocator: SequenceAllocator,
    test_cases: TestCaseSequences,
    defects: DefectSequences,
}

impl EntityService {
    pub fn new(metadata: Arc<dyn MetadataStore>, allocator: SequenceAllocator) -> Self {
        Self {
            test_cases: TestCaseSequences::new(metadata.clone()),
            defects: DefectSequences::new(metadata.clone()),
            metadata,
            allocator,
        }
    }

    pub async fn create_project(&self, project_key: &str, name: &str) -> ServiceResult<ProjectRow> {
        let project_key = project_key.trim();
        if project_key.is_empty() {
            return Err(ServiceError::Validation(
                "project_key must not be empty".to_string(),
            ));
        }
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("name must not be empty".to_string()));
        }

        let row = ProjectRow {
            project_id: Uuid::new_v4(),
            project_key: project_key.to_string(),
            name: name.trim().to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.metadata.create_project(&row).await?;
        tracing::info!(project_id = %row.project_id, project_key = %row.project_key, "project created");
        Ok(row)
    }

    pub async fn get_project(&self, project_id: Uuid) -> ServiceResult<ProjectRow> {
        self.metadata
            .get_project(project_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("project {project_id}")))
    }

    pub async fn list_projects(&self) -> ServiceResult<Vec<ProjectRow>> {
        Ok(self.metadata.list_projects().await?)
    }

    /// Create a test case with the next free `tcN` id in the project.
    pub async fn create_test_case(
        &self,
        project_id: Uuid,
        draft: TestCaseDraft,
    ) -> ServiceResult<TestCaseRow> {
        require_title(&draft.title)?;
        self.get_project(project_id).await?;
        let row = self
            .allocator
            .allocate(&self.test_cases, &project_id.to_string(), &draft)
            .await?;
        tracing::info!(%project_id, tc_id = %row.tc_id, "test case created");
        Ok(row)
    }

    /// Live test case by id. Soft-deleted rows are reported as not found.
    pub async fn get_test_case(&self, id: Uuid) -> ServiceResult<TestCaseRow> {
        self.metadata
            .get_test_case(id)
            .await?
            .filter(|row| row.deleted_at.is_none())
            .ok_or_else(|| ServiceError::NotFound(format!("test case {id}")))
    }

    pub async fn list_test_cases(&self, project_id: Uuid) -> ServiceResult<Vec<TestCaseRow>> {
        self.get_project(project_id).await?;
        Ok(self.metadata.list_test_cases(project_id).await?)
    }

    /// Soft delete. The `tcN` id stays reserved.
    pub async fn delete_test_case(&self, id: Uuid) -> ServiceResult<()> {
        self.metadata
            .soft_delete_test_case(id, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(test_case_id = %id, "test case deleted");
        Ok(())
    }

    /// Create a defect with the next free `DEF-N` id in the project.
    pub async fn create_defect(&self, project_id: Uuid, draft: DefectDraft) -> ServiceResult<DefectRow> {
        require_title(&draft.title)?;
        self.get_project(project_id).await?;
        let row = self
            .allocator
            .allocate(&self.defects, &project_id.to_string(), &draft)
            .await?;
        tracing::info!(%project_id, defect_id = %row.defect_id, "defect created");
        Ok(row)
    }

    /// Live defect by id. Soft-deleted rows are reported as not found.
    pub async fn get_defect(&self, id: Uuid) -> ServiceResult<DefectRow> {
        self.metadata
            .get_defect(id)
            .await?
            .filter(|row| row.deleted_at.is_none())
            .ok_or_else(|| ServiceError::NotFound(format!("defect {id}")))
    }

    pub async fn list_defects(&self, project_id: Uuid) -> ServiceResult<Vec<DefectRow>> {
        self.get_project(project_id).await?;
        Ok(self.metadata.list_defects(project_id).await?)
    }

    /// Soft delete. The `DEF-N` id stays reserved.
    pub async fn delete_defect(&self, id: Uuid) -> ServiceResult<()> {
        self.metadata
            .soft_delete_defect(id, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(defect_id = %id, "defect deleted");
        Ok(())
    }
}

fn require_title(title: &str) -> ServiceResult<()> {
    if title.trim().is_empty() {
        return Err(ServiceError::Validation("title must not be empty".to_string()));
    }
    Ok(())
}
