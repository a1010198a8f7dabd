//! Projects, test cases and defects.

use crate::error::ApiResult;
use crate::handlers::common::{parse_json, parse_uuid};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use bytes::Bytes;
use casebook_core::SequenceKind;
use casebook_metadata::models::{DefectDraft, DefectRow, ProjectRow, TestCaseDraft, TestCaseRow};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Projects
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub project_key: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub project_id: Uuid,
    pub project_key: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<ProjectRow> for ProjectResponse {
    fn from(row: ProjectRow) -> Self {
        Self {
            project_id: row.project_id,
            project_key: row.project_key,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

/// POST /v1/projects
pub async fn create_project(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ProjectResponse>)> {
    let req: CreateProjectRequest = parse_json(&body)?;
    let row = state
        .services
        .entities
        .create_project(&req.project_key, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

/// GET /v1/projects
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<ProjectResponse>>> {
    let rows = state.services.entities.list_projects().await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// GET /v1/projects/{project_id}
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectResponse>> {
    let project_id = parse_uuid(&project_id, "project id")?;
    let row = state.services.entities.get_project(project_id).await?;
    Ok(Json(row.into()))
}

// =============================================================================
// Test cases
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTestCaseRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_test_case_status")]
    pub status: String,
}

fn default_priority() -> String {
    "MEDIUM".to_string()
}

fn default_test_case_status() -> String {
    "DRAFT".to_string()
}

#[derive(Debug, Serialize)]
pub struct TestCaseResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub tc_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<TestCaseRow> for TestCaseResponse {
    fn from(row: TestCaseRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            tc_id: row.tc_id,
            title: row.title,
            description: row.description,
            priority: row.priority,
            status: row.status,
            created_at: row.created_at,
        }
    }
}

/// POST /v1/projects/{project_id}/testcases
pub async fn create_test_case(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<TestCaseResponse>)> {
    let project_id = parse_uuid(&project_id, "project id")?;
    let req: CreateTestCaseRequest = parse_json(&body)?;
    let draft = TestCaseDraft {
        title: req.title,
        description: req.description,
        priority: req.priority,
        status: req.status,
    };

    let row = state
        .services
        .entities
        .create_test_case(project_id, draft)
        .await
        .inspect_err(metrics::record_allocation_failure)?;
    metrics::SEQUENCE_IDS_ALLOCATED
        .with_label_values(&[SequenceKind::TestCase.as_str()])
        .inc();
    Ok((StatusCode::CREATED, Json(row.into())))
}

/// GET /v1/projects/{project_id}/testcases
pub async fn list_test_cases(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<TestCaseResponse>>> {
    let project_id = parse_uuid(&project_id, "project id")?;
    let rows = state.services.entities.list_test_cases(project_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// GET /v1/testcases/{id}
pub async fn get_test_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TestCaseResponse>> {
    let id = parse_uuid(&id, "test case id")?;
    let row = state.services.entities.get_test_case(id).await?;
    Ok(Json(row.into()))
}

/// DELETE /v1/testcases/{id}
pub async fn delete_test_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_uuid(&id, "test case id")?;
    state.services.entities.delete_test_case(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Defects
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateDefectRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_defect_status")]
    pub status: String,
}

fn default_severity() -> String {
    "MEDIUM".to_string()
}

fn default_defect_status() -> String {
    "NEW".to_string()
}

#[derive(Debug, Serialize)]
pub struct DefectResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub defect_id: String,
    pub title: String,
    pub description: Option<String>,
    pub severity: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<DefectRow> for DefectResponse {
    fn from(row: DefectRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            defect_id: row.defect_id,
            title: row.title,
            description: row.description,
            severity: row.severity,
            status: row.status,
            created_at: row.created_at,
        }
    }
}

/// POST /v1/projects/{project_id}/defects
pub async fn create_defect(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<DefectResponse>)> {
    let project_id = parse_uuid(&project_id, "project id")?;
    let req: CreateDefectRequest = parse_json(&body)?;
    let draft = DefectDraft {
        title: req.title,
        description: req.description,
        severity: req.severity,
        status: req.status,
    };

    let row = state
        .services
        .entities
        .create_defect(project_id, draft)
        .await
        .inspect_err(metrics::record_allocation_failure)?;
    metrics::SEQUENCE_IDS_ALLOCATED
        .with_label_values(&[SequenceKind::Defect.as_str()])
        .inc();
    Ok((StatusCode::CREATED, Json(row.into())))
}

/// GET /v1/projects/{project_id}/defects
pub async fn list_defects(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<DefectResponse>>> {
    let project_id = parse_uuid(&project_id, "project id")?;
    let rows = state.services.entities.list_defects(project_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// GET /v1/defects/{id}
pub async fn get_defect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DefectResponse>> {
    let id = parse_uuid(&id, "defect id")?;
    let row = state.services.entities.get_defect(id).await?;
    Ok(Json(row.into()))
}

/// DELETE /v1/defects/{id}
pub async fn delete_defect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_uuid(&id, "defect id")?;
    state.services.entities.delete_defect(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
