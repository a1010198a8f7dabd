//! Counter/entity stores consumed by the sequence id allocator.
//!
//! The allocator only needs three operations per entity kind: count the
//! records in a scope, probe for an id, and insert with a candidate id. The
//! adapters here expose the test case and defect repositories through that
//! narrow interface so the allocator stays generic.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{DefectDraft, DefectRow, TestCaseDraft, TestCaseRow};
use crate::store::MetadataStore;
use async_trait::async_trait;
use casebook_core::sequence::SequenceKind;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Store of records carrying a per-scope sequence id.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Caller-supplied fields for a new record.
    type Draft: Send + Sync;
    /// The persisted record.
    type Entity: Send;

    /// Which id family this store issues.
    fn kind(&self) -> SequenceKind;

    /// Number of records under `parent_key`, including soft-deleted ones.
    async fn count(&self, parent_key: &str) -> MetadataResult<u64>;

    /// Find a record by sequence id under `parent_key`.
    async fn find_by_sequence_id(
        &self,
        parent_key: &str,
        sequence_id: &str,
    ) -> MetadataResult<Option<Self::Entity>>;

    /// Insert a record. Must fail with [`MetadataError::UniqueViolation`] when
    /// `sequence_id` is already taken under `parent_key`.
    async fn create(
        &self,
        parent_key: &str,
        sequence_id: &str,
        draft: &Self::Draft,
    ) -> MetadataResult<Self::Entity>;
}

fn project_id(parent_key: &str) -> MetadataResult<Uuid> {
    Uuid::parse_str(parent_key).map_err(|_| {
        MetadataError::Constraint(format!("parent key '{parent_key}' is not a project id"))
    })
}

/// Test cases (`tc1`, `tc2`, ...) scoped by project.
#[derive(Clone)]
pub struct TestCaseSequences {
    store: Arc<dyn MetadataStore>,
}

impl TestCaseSequences {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CounterStore for TestCaseSequences {
    type Draft = TestCaseDraft;
    type Entity = TestCaseRow;

    fn kind(&self) -> SequenceKind {
        SequenceKind::TestCase
    }

    async fn count(&self, parent_key: &str) -> MetadataResult<u64> {
        self.store.count_test_cases(project_id(parent_key)?).await
    }

    async fn find_by_sequence_id(
        &self,
        parent_key: &str,
        sequence_id: &str,
    ) -> MetadataResult<Option<TestCaseRow>> {
        self.store
            .get_test_case_by_tc_id(project_id(parent_key)?, sequence_id)
            .await
    }

    async fn create(
        &self,
        parent_key: &str,
        sequence_id: &str,
        draft: &TestCaseDraft,
    ) -> MetadataResult<TestCaseRow> {
        let row = TestCaseRow {
            id: Uuid::new_v4(),
            project_id: project_id(parent_key)?,
            tc_id: sequence_id.to_string(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            priority: draft.priority.clone(),
            status: draft.status.clone(),
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        self.store.insert_test_case(&row).await?;
        Ok(row)
    }
}

/// Defects (`DEF-1`, `DEF-2`, ...) scoped by project.
#[derive(Clone)]
pub struct DefectSequences {
    store: Arc<dyn MetadataStore>,
}

impl DefectSequences {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CounterStore for DefectSequences {
    type Draft = DefectDraft;
    type Entity = DefectRow;

    fn kind(&self) -> SequenceKind {
        SequenceKind::Defect
    }

    async fn count(&self, parent_key: &str) -> MetadataResult<u64> {
        self.store.count_defects(project_id(parent_key)?).await
    }

    async fn find_by_sequence_id(
        &self,
        parent_key: &str,
        sequence_id: &str,
    ) -> MetadataResult<Option<DefectRow>> {
        self.store
            .get_defect_by_defect_id(project_id(parent_key)?, sequence_id)
            .await
    }

    async fn create(
        &self,
        parent_key: &str,
        sequence_id: &str,
        draft: &DefectDraft,
    ) -> MetadataResult<DefectRow> {
        let row = DefectRow {
            id: Uuid::new_v4(),
            project_id: project_id(parent_key)?,
            defect_id: sequence_id.to_string(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            severity: draft.severity.clone(),
            status: draft.status.clone(),
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        self.store.insert_defect(&row).await?;
        Ok(row)
    }
}
