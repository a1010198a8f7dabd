//! Services wired to a temporary SQLite database and an in-memory blob store.

use bytes::Bytes;
use casebook_core::attachment::{AttachmentOwner, AttachmentRecord};
use casebook_core::config::AppConfig;
use casebook_metadata::models::{AttachmentRow, ProjectRow};
use casebook_metadata::{MetadataStore, SqliteStore};
use casebook_service::Services;
use casebook_storage::MemoryBackend;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestHarness {
    pub config: AppConfig,
    pub metadata: Arc<dyn MetadataStore>,
    pub sqlite: Arc<SqliteStore>,
    pub blobs: Arc<MemoryBackend>,
    pub services: Services,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::for_testing()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let sqlite = Arc::new(
            SqliteStore::new(temp_dir.path().join("casebook.db"), Duration::from_secs(5))
                .await
                .expect("Failed to create metadata store"),
        );
        let metadata: Arc<dyn MetadataStore> = sqlite.clone();
        let blobs = Arc::new(MemoryBackend::new());
        let services = Services::new(&config, metadata.clone(), blobs.clone());

        Self {
            config,
            metadata,
            sqlite,
            blobs,
            services,
            _temp_dir: temp_dir,
        }
    }

    /// Create a project directly in the store.
    pub async fn project(&self) -> ProjectRow {
        let row = ProjectRow {
            project_id: Uuid::new_v4(),
            project_key: format!("P{}", Uuid::new_v4().simple()),
            name: "Test project".to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.metadata
            .create_project(&row)
            .await
            .expect("Failed to create project");
        row
    }

    /// Make every attachment insert fail at the database.
    pub async fn reject_attachment_inserts(&self) {
        sqlx::query(
            "CREATE TRIGGER reject_attachments BEFORE INSERT ON attachments \
             BEGIN SELECT RAISE(ABORT, 'attachment inserts disabled'); END",
        )
        .execute(self.sqlite.pool())
        .await
        .expect("Failed to install trigger");
    }

    /// Record an attachment and store its bytes, bypassing the upload flow.
    pub async fn seed_attachment(&self, owner: Option<AttachmentOwner>) -> AttachmentRecord {
        let key = format!("attachments/seeded/{}-notes.txt", Uuid::new_v4());
        let row = AttachmentRow::new(
            key.clone(),
            "notes.txt".to_string(),
            5,
            "text/plain".to_string(),
            owner.as_ref(),
            OffsetDateTime::now_utc(),
        );
        self.metadata
            .insert_attachment(&row)
            .await
            .expect("Failed to insert attachment");
        self.blobs.put_object(&key, Bytes::from_static(b"hello"));
        row.into_record(casebook_core::AttachmentStatus::Active)
            .expect("valid attachment row")
    }
}
