//! Test case repository trait.

use crate::error::MetadataResult;
use crate::models::TestCaseRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for test cases.
#[async_trait]
pub trait TestCaseRepo: Send + Sync {
    /// Count test cases in a project, soft-deleted ones included.
    async fn count_test_cases(&self, project_id: Uuid) -> MetadataResult<u64>;

    /// Look up a test case by its per-project sequence id, soft-deleted ones included.
    async fn get_test_case_by_tc_id(
        &self,
        project_id: Uuid,
        tc_id: &str,
    ) -> MetadataResult<Option<TestCaseRow>>;

    /// Insert a test case. Fails with `UniqueViolation` if `tc_id` is taken.
    async fn insert_test_case(&self, row: &TestCaseRow) -> MetadataResult<()>;

    async fn get_test_case(&self, id: Uuid) -> MetadataResult<Option<TestCaseRow>>;

    /// List live test cases in a project, in sequence order.
    async fn list_test_cases(&self, project_id: Uuid) -> MetadataResult<Vec<TestCaseRow>>;

    /// Mark a test case deleted. The row keeps its `tc_id` so it is never reissued.
    /// Fails with `NotFound` if the row is missing or already deleted.
    async fn soft_delete_test_case(
        &self,
        id: Uuid,
        deleted_at: OffsetDateTime,
    ) -> MetadataResult<()>;
}
