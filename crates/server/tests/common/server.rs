//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use casebook_core::attachment::{AttachmentOwner, AttachmentRecord, AttachmentStatus};
use casebook_core::config::{AppConfig, MetadataConfig, ServerConfig, StorageConfig};
use casebook_metadata::models::AttachmentRow;
use casebook_metadata::{MetadataStore, SqliteStore};
use casebook_server::{AppState, create_router};
use casebook_storage::{BlobStore, FilesystemBackend, MemoryBackend, UrlSigner};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// Base URL the filesystem backend signs blob URLs against.
pub const PUBLIC_BASE_URL: &str = "http://casebook.test";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Set when the server runs on the in-memory blob store.
    pub memory: Option<Arc<MemoryBackend>>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Test server on the in-memory blob store.
    pub async fn new() -> Self {
        let memory = Arc::new(MemoryBackend::new());
        Self::build(StorageConfig::Memory, memory.clone(), Some(memory), |_| {}).await
    }

    /// Test server on the filesystem blob store, serving signed blob URLs.
    pub async fn with_filesystem() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("blobs");
        let secret = "test-signing-secret";
        let blobs = Arc::new(
            FilesystemBackend::new(&storage_path, UrlSigner::new(PUBLIC_BASE_URL, secret))
                .await
                .expect("Failed to create storage backend"),
        );
        let storage = StorageConfig::Filesystem {
            path: storage_path,
            signing_secret: Some(secret.to_string()),
        };
        Self::build_in(temp_dir, storage, blobs, None, |_| {}).await
    }

    /// Memory-backed test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let memory = Arc::new(MemoryBackend::new());
        Self::build(StorageConfig::Memory, memory.clone(), Some(memory), modifier).await
    }

    async fn build<F>(
        storage: StorageConfig,
        blobs: Arc<dyn BlobStore>,
        memory: Option<Arc<MemoryBackend>>,
        modifier: F,
    ) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        Self::build_in(temp_dir, storage, blobs, memory, modifier).await
    }

    async fn build_in<F>(
        temp_dir: TempDir,
        storage: StorageConfig,
        blobs: Arc<dyn BlobStore>,
        memory: Option<Arc<MemoryBackend>>,
        modifier: F,
    ) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let db_path = temp_dir.path().join("casebook.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, Duration::from_secs(5))
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            server: ServerConfig {
                public_base_url: PUBLIC_BASE_URL.to_string(),
                ..Default::default()
            },
            storage,
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                busy_timeout_secs: 5,
            },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        casebook_server::metrics::register_metrics();
        let state = AppState::new(config, blobs, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            memory,
            _temp_dir: temp_dir,
        }
    }

    /// The in-memory blob store. Panics on a filesystem-backed server.
    pub fn memory(&self) -> &MemoryBackend {
        self.memory
            .as_deref()
            .expect("server is not backed by the memory store")
    }

    /// Send a request with an optional JSON body and decode the JSON reply.
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(v) => Bytes::from(serde_json::to_vec(&v).unwrap()),
            None => Bytes::new(),
        };
        let (status, _, bytes) = self.raw(method, uri, body).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Send a request with a raw body.
    pub async fn raw(&self, method: &str, uri: &str, body: Bytes) -> (StatusCode, HeaderMap, Bytes) {
        let mut builder = Request::builder().method(method).uri(uri);
        if !body.is_empty() {
            builder = builder.header("Content-Type", "application/json");
        }
        let request = builder.body(Body::from(body)).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, bytes)
    }

    /// Create a project over the API and return its id.
    pub async fn project(&self, key: &str) -> String {
        let (status, body) = self
            .json(
                "POST",
                "/v1/projects",
                Some(serde_json::json!({ "project_key": key, "name": format!("{key} project") })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["project_id"].as_str().unwrap().to_string()
    }

    /// Record an attachment with bytes in the memory store, bypassing uploads.
    pub async fn seed_attachment(&self, owner: Option<AttachmentOwner>) -> AttachmentRecord {
        let key = format!("attachments/seeded/{}-report.pdf", Uuid::new_v4());
        let row = AttachmentRow::new(
            key.clone(),
            "report.pdf".to_string(),
            3,
            "application/pdf".to_string(),
            owner.as_ref(),
            OffsetDateTime::now_utc(),
        );
        self.state
            .metadata
            .insert_attachment(&row)
            .await
            .expect("Failed to insert attachment");
        self.memory().put_object(&key, Bytes::from_static(b"pdf"));
        row.into_record(AttachmentStatus::Active)
            .expect("valid attachment row")
    }
}

/// Path and query of an absolute URL issued by the server.
#[allow(dead_code)]
pub fn local_path(url: &str) -> &str {
    url.strip_prefix(PUBLIC_BASE_URL)
        .unwrap_or_else(|| panic!("URL not on this server: {url}"))
}
