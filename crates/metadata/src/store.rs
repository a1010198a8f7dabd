//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AttachmentRepo, DefectRepo, ProjectRepo, TestCaseRepo, UploadRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    ProjectRepo + TestCaseRepo + DefectRepo + AttachmentRepo + UploadRepo + Send + Sync
{
    /// Apply the schema.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite database and apply the schema.
    pub async fn new(path: impl AsRef<Path>, busy_timeout: Duration) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            // A single connection serialises writers; uniqueness is still
            // decided by the indexes, not by this setting.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "opened sqlite metadata store");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use casebook_core::attachment::{AttachmentOwner, OwnerKind};
    use casebook_core::upload::UploadState;
    use std::collections::HashMap;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn count_to_u64(count: i64) -> u64 {
        u64::try_from(count).unwrap_or(0)
    }

    fn owner_column(kind: OwnerKind) -> &'static str {
        match kind {
            OwnerKind::TestCase => "test_case_id",
            OwnerKind::TestStep => "test_step_id",
            OwnerKind::Defect => "defect_id",
            OwnerKind::Comment => "comment_id",
        }
    }

    #[async_trait]
    impl ProjectRepo for SqliteStore {
        async fn create_project(&self, project: &ProjectRow) -> MetadataResult<()> {
            let result = sqlx::query(
                "INSERT INTO projects (project_id, project_key, name, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(project.project_id)
            .bind(&project.project_key)
            .bind(&project.name)
            .bind(project.created_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(MetadataError::AlreadyExists(format!(
                        "project_key '{}' already exists",
                        project.project_key
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_project(&self, project_id: Uuid) -> MetadataResult<Option<ProjectRow>> {
            let row =
                sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE project_id = ?")
                    .bind(project_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_project_by_key(
            &self,
            project_key: &str,
        ) -> MetadataResult<Option<ProjectRow>> {
            let row =
                sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE project_key = ?")
                    .bind(project_key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn list_projects(&self) -> MetadataResult<Vec<ProjectRow>> {
            let rows =
                sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY project_key")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl TestCaseRepo for SqliteStore {
        async fn count_test_cases(&self, project_id: Uuid) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM test_cases WHERE project_id = ?")
                    .bind(project_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count_to_u64(count))
        }

        async fn get_test_case_by_tc_id(
            &self,
            project_id: Uuid,
            tc_id: &str,
        ) -> MetadataResult<Option<TestCaseRow>> {
            let row = sqlx::query_as::<_, TestCaseRow>(
                "SELECT * FROM test_cases WHERE project_id = ? AND tc_id = ?",
            )
            .bind(project_id)
            .bind(tc_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn insert_test_case(&self, row: &TestCaseRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO test_cases (
                    id, project_id, tc_id, title, description, priority, status,
                    created_at, deleted_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id)
            .bind(row.project_id)
            .bind(&row.tc_id)
            .bind(&row.title)
            .bind(&row.description)
            .bind(&row.priority)
            .bind(&row.status)
            .bind(row.created_at)
            .bind(row.deleted_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, format!("test_cases ({}, {})", row.project_id, row.tc_id))
            })?;
            Ok(())
        }

        async fn get_test_case(&self, id: Uuid) -> MetadataResult<Option<TestCaseRow>> {
            let row = sqlx::query_as::<_, TestCaseRow>("SELECT * FROM test_cases WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_test_cases(&self, project_id: Uuid) -> MetadataResult<Vec<TestCaseRow>> {
            let rows = sqlx::query_as::<_, TestCaseRow>(
                r#"
                SELECT * FROM test_cases
                WHERE project_id = ? AND deleted_at IS NULL
                ORDER BY created_at, rowid
                "#,
            )
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn soft_delete_test_case(
            &self,
            id: Uuid,
            deleted_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE test_cases SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
            )
            .bind(deleted_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("test case {id} not found")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DefectRepo for SqliteStore {
        async fn count_defects(&self, project_id: Uuid) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM defects WHERE project_id = ?")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(count_to_u64(count))
        }

        async fn get_defect_by_defect_id(
            &self,
            project_id: Uuid,
            defect_id: &str,
        ) -> MetadataResult<Option<DefectRow>> {
            let row = sqlx::query_as::<_, DefectRow>(
                "SELECT * FROM defects WHERE project_id = ? AND defect_id = ?",
            )
            .bind(project_id)
            .bind(defect_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn insert_defect(&self, row: &DefectRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO defects (
                    id, project_id, defect_id, title, description, severity, status,
                    created_at, deleted_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id)
            .bind(row.project_id)
            .bind(&row.defect_id)
            .bind(&row.title)
            .bind(&row.description)
            .bind(&row.severity)
            .bind(&row.status)
            .bind(row.created_at)
            .bind(row.deleted_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(
                    e,
                    format!("defects ({}, {})", row.project_id, row.defect_id),
                )
            })?;
            Ok(())
        }

        async fn get_defect(&self, id: Uuid) -> MetadataResult<Option<DefectRow>> {
            let row = sqlx::query_as::<_, DefectRow>("SELECT * FROM defects WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_defects(&self, project_id: Uuid) -> MetadataResult<Vec<DefectRow>> {
            let rows = sqlx::query_as::<_, DefectRow>(
                r#"
                SELECT * FROM defects
                WHERE project_id = ? AND deleted_at IS NULL
                ORDER BY created_at, rowid
                "#,
            )
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn soft_delete_defect(
            &self,
            id: Uuid,
            deleted_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE defects SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                    .bind(deleted_at)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("defect {id} not found")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AttachmentRepo for SqliteStore {
        async fn insert_attachment(&self, row: &AttachmentRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO attachments (
                    attachment_id, storage_key, file_name, file_size, file_type,
                    test_case_id, test_step_id, defect_id, comment_id,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.attachment_id)
            .bind(&row.storage_key)
            .bind(&row.file_name)
            .bind(row.file_size)
            .bind(&row.file_type)
            .bind(row.test_case_id)
            .bind(row.test_step_id)
            .bind(row.defect_id)
            .bind(row.comment_id)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, format!("attachments {}", row.storage_key)))?;
            Ok(())
        }

        async fn get_attachment(
            &self,
            attachment_id: Uuid,
        ) -> MetadataResult<Option<AttachmentWithDeletion>> {
            let Some(attachment) = sqlx::query_as::<_, AttachmentRow>(
                "SELECT * FROM attachments WHERE attachment_id = ?",
            )
            .bind(attachment_id)
            .fetch_optional(&self.pool)
            .await?
            else {
                return Ok(None);
            };

            let deletion = sqlx::query_as::<_, AttachmentDeletionRow>(
                "SELECT * FROM attachment_deletions WHERE attachment_id = ?",
            )
            .bind(attachment_id)
            .fetch_optional(&self.pool)
            .await?;

            Ok(Some(AttachmentWithDeletion {
                attachment,
                deletion,
            }))
        }

        async fn attachment_exists_for_key(&self, storage_key: &str) -> MetadataResult<bool> {
            let found: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM attachments WHERE storage_key = ?")
                    .bind(storage_key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(found.is_some())
        }

        async fn list_attachments_by_owner(
            &self,
            owner: &AttachmentOwner,
        ) -> MetadataResult<Vec<AttachmentWithDeletion>> {
            let column = owner_column(owner.kind);

            let attachments = sqlx::query_as::<_, AttachmentRow>(&format!(
                "SELECT * FROM attachments WHERE {column} = ? ORDER BY created_at, rowid"
            ))
            .bind(owner.id)
            .fetch_all(&self.pool)
            .await?;

            let deletions = sqlx::query_as::<_, AttachmentDeletionRow>(&format!(
                r#"
                SELECT d.* FROM attachment_deletions d
                JOIN attachments a ON a.attachment_id = d.attachment_id
                WHERE a.{column} = ?
                "#
            ))
            .bind(owner.id)
            .fetch_all(&self.pool)
            .await?;

            let mut by_id: HashMap<Uuid, AttachmentDeletionRow> = deletions
                .into_iter()
                .map(|d| (d.attachment_id, d))
                .collect();

            Ok(attachments
                .into_iter()
                .map(|attachment| {
                    let deletion = by_id.remove(&attachment.attachment_id);
                    AttachmentWithDeletion {
                        attachment,
                        deletion,
                    }
                })
                .collect())
        }

        async fn set_attachment_owner(
            &self,
            attachment_id: Uuid,
            owner: Option<&AttachmentOwner>,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let (test_case_id, test_step_id, defect_id, comment_id) =
                AttachmentOwner::to_columns(owner);

            let result = sqlx::query(
                r#"
                UPDATE attachments
                SET test_case_id = ?, test_step_id = ?, defect_id = ?, comment_id = ?,
                    updated_at = ?
                WHERE attachment_id = ?
                "#,
            )
            .bind(test_case_id)
            .bind(test_step_id)
            .bind(defect_id)
            .bind(comment_id)
            .bind(updated_at)
            .bind(attachment_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "attachment {attachment_id} not found"
                )));
            }
            Ok(())
        }

        async fn delete_attachment(&self, attachment_id: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM attachments WHERE attachment_id = ?")
                .bind(attachment_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn upsert_pending_deletion(&self, row: &AttachmentDeletionRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO attachment_deletions (attachment_id, token, prepared_at, expires_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(attachment_id) DO UPDATE SET
                    token = excluded.token,
                    prepared_at = excluded.prepared_at,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(row.attachment_id)
            .bind(&row.token)
            .bind(row.prepared_at)
            .bind(row.expires_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                // The attachment was removed between lookup and marker write.
                Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                    Err(MetadataError::NotFound(format!(
                        "attachment {} not found",
                        row.attachment_id
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn clear_pending_deletion(&self, attachment_id: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM attachment_deletions WHERE attachment_id = ?")
                .bind(attachment_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_pending_deletions(
            &self,
            prepared_before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<AttachmentDeletionRow>> {
            let rows = sqlx::query_as::<_, AttachmentDeletionRow>(
                r#"
                SELECT * FROM attachment_deletions
                WHERE prepared_at < ?
                ORDER BY prepared_at
                LIMIT ?
                "#,
            )
            .bind(prepared_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    upload_id, storage_key, file_name, file_size, file_type,
                    chunk_size, part_count, owner_type, owner_id, state,
                    created_at, updated_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.upload_id)
            .bind(&session.storage_key)
            .bind(&session.file_name)
            .bind(session.file_size)
            .bind(&session.file_type)
            .bind(session.chunk_size)
            .bind(session.part_count)
            .bind(&session.owner_type)
            .bind(session.owner_id)
            .bind(&session.state)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(MetadataError::AlreadyExists(format!(
                        "upload {} already exists",
                        session.upload_id
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_session(&self, upload_id: &str) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn transition_session(
            &self,
            upload_id: &str,
            from: UploadState,
            to: UploadState,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET state = ?, updated_at = ? WHERE upload_id = ? AND state = ?",
            )
            .bind(to.as_str())
            .bind(updated_at)
            .bind(upload_id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_expired_sessions(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                r#"
                SELECT * FROM upload_sessions
                WHERE state = 'open' AND expires_at < ?
                ORDER BY expires_at
                LIMIT ?
                "#,
            )
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    project_id BLOB PRIMARY KEY,
    project_key TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Sequence ids are unique per project. Soft-deleted rows keep their id.
CREATE TABLE IF NOT EXISTS test_cases (
    id BLOB PRIMARY KEY,
    project_id BLOB NOT NULL REFERENCES projects(project_id),
    tc_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    priority TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted_at TEXT,
    UNIQUE (project_id, tc_id)
);
CREATE INDEX IF NOT EXISTS idx_test_cases_project ON test_cases(project_id, created_at);

CREATE TABLE IF NOT EXISTS defects (
    id BLOB PRIMARY KEY,
    project_id BLOB NOT NULL REFERENCES projects(project_id),
    defect_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    severity TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted_at TEXT,
    UNIQUE (project_id, defect_id)
);
CREATE INDEX IF NOT EXISTS idx_defects_project ON defects(project_id, created_at);

-- At most one owner column may be set.
CREATE TABLE IF NOT EXISTS attachments (
    attachment_id BLOB PRIMARY KEY,
    storage_key TEXT NOT NULL UNIQUE,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    file_type TEXT NOT NULL,
    test_case_id BLOB,
    test_step_id BLOB,
    defect_id BLOB,
    comment_id BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (
        (test_case_id IS NOT NULL) + (test_step_id IS NOT NULL) +
        (defect_id IS NOT NULL) + (comment_id IS NOT NULL) <= 1
    )
);
CREATE INDEX IF NOT EXISTS idx_attachments_test_case ON attachments(test_case_id);
CREATE INDEX IF NOT EXISTS idx_attachments_test_step ON attachments(test_step_id);
CREATE INDEX IF NOT EXISTS idx_attachments_defect ON attachments(defect_id);
CREATE INDEX IF NOT EXISTS idx_attachments_comment ON attachments(comment_id);

-- In-flight deletion markers written by the prepare phase.
CREATE TABLE IF NOT EXISTS attachment_deletions (
    attachment_id BLOB PRIMARY KEY
        REFERENCES attachments(attachment_id) ON DELETE CASCADE,
    token TEXT NOT NULL,
    prepared_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attachment_deletions_prepared ON attachment_deletions(prepared_at);

CREATE TABLE IF NOT EXISTS upload_sessions (
    upload_id TEXT PRIMARY KEY,
    storage_key TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    file_type TEXT NOT NULL,
    chunk_size INTEGER NOT NULL,
    part_count INTEGER NOT NULL,
    owner_type TEXT,
    owner_id BLOB,
    state TEXT NOT NULL DEFAULT 'open',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_state ON upload_sessions(state, expires_at);
"#;
