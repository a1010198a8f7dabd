//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL, used to build signed blob URLs for the
    /// filesystem backend (e.g., "https://casebook.example.com").
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: default_public_base_url(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage, served through signed `/v1/blobs` URLs.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
        /// Secret used to sign blob URLs. A random secret is generated at
        /// startup when unset, which invalidates outstanding URLs on restart.
        /// WARNING: Prefer CASEBOOK_STORAGE__SIGNING_SECRET over storing it in config.
        #[serde(default)]
        signing_secret: Option<String>,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the default credential chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the default credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
    /// In-process storage for tests and local experiments. Contents are lost on exit.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
            signing_secret: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem {
                signing_secret: Some(secret),
                ..
            } if secret.len() < 16 => {
                Err("storage.signing_secret must be at least 16 bytes".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// How long a writer waits on a locked database before failing.
        #[serde(default = "default_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/casebook.db"),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

/// Attachment upload and link configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentConfig {
    /// Accept attachment uploads (default: true).
    #[serde(default = "default_attachments_enabled")]
    pub enabled: bool,
    /// Largest accepted file in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Multipart part size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Accepted MIME types.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Lifetime of presigned part upload URLs.
    #[serde(default = "default_upload_url_ttl_secs")]
    pub upload_url_ttl_secs: u64,
    /// Lifetime of presigned delete URLs issued by prepare.
    #[serde(default = "default_delete_url_ttl_secs")]
    pub delete_url_ttl_secs: u64,
    /// Lifetime of presigned download URLs.
    #[serde(default = "default_download_url_ttl_secs")]
    pub download_url_ttl_secs: u64,
    /// How long an upload session may stay open before the reconciler expires it.
    #[serde(default = "default_upload_session_ttl_secs")]
    pub upload_session_ttl_secs: u64,
}

fn default_attachments_enabled() -> bool {
    true
}

fn default_max_file_size() -> u64 {
    crate::DEFAULT_MAX_FILE_SIZE
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_allowed_types() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/svg+xml",
        "application/pdf",
        "text/plain",
        "text/csv",
        "application/json",
        "application/xml",
        "text/xml",
        "application/zip",
        "application/msword",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "video/mp4",
        "video/webm",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_upload_url_ttl_secs() -> u64 {
    3600
}

fn default_delete_url_ttl_secs() -> u64 {
    900 // 15 minutes
}

fn default_download_url_ttl_secs() -> u64 {
    3600
}

fn default_upload_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            enabled: default_attachments_enabled(),
            max_file_size: default_max_file_size(),
            chunk_size: default_chunk_size(),
            allowed_types: default_allowed_types(),
            upload_url_ttl_secs: default_upload_url_ttl_secs(),
            delete_url_ttl_secs: default_delete_url_ttl_secs(),
            download_url_ttl_secs: default_download_url_ttl_secs(),
            upload_session_ttl_secs: default_upload_session_ttl_secs(),
        }
    }
}

/// S3 rejects non-final parts smaller than this.
const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

impl AttachmentConfig {
    pub fn upload_url_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_url_ttl_secs)
    }

    pub fn delete_url_ttl(&self) -> Duration {
        Duration::from_secs(self.delete_url_ttl_secs)
    }

    pub fn download_url_ttl(&self) -> Duration {
        Duration::from_secs(self.download_url_ttl_secs)
    }

    /// Upload session lifetime as a `time::Duration`, saturating on overflow.
    pub fn upload_session_ttl(&self) -> time::Duration {
        let secs = i64::try_from(self.upload_session_ttl_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Check whether a MIME type is on the allow-list (parameters such as
    /// `; charset=utf-8` are ignored, comparison is case-insensitive).
    pub fn is_type_allowed(&self, file_type: &str) -> bool {
        let essence = file_type.split(';').next().unwrap_or("").trim();
        self.allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(essence))
    }

    /// Validate attachment settings.
    /// Returns warnings for settings that work but are likely mistakes.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.chunk_size == 0 {
            return Err("attachments.chunk_size cannot be 0".to_string());
        }
        if self.max_file_size == 0 {
            return Err("attachments.max_file_size cannot be 0".to_string());
        }
        if self.delete_url_ttl_secs == 0
            || self.upload_url_ttl_secs == 0
            || self.download_url_ttl_secs == 0
        {
            return Err("attachments URL lifetimes must be at least 1 second".to_string());
        }

        let max_parts = crate::upload::part_count(self.max_file_size, self.chunk_size);
        if max_parts > crate::MAX_PART_COUNT {
            return Err(format!(
                "attachments.chunk_size={} splits a {} byte file into {} parts; \
                 the blob store accepts at most {}",
                self.chunk_size,
                self.max_file_size,
                max_parts,
                crate::MAX_PART_COUNT
            ));
        }

        if self.chunk_size < S3_MIN_PART_SIZE {
            warnings.push(format!(
                "attachments.chunk_size={} is below the 5 MiB S3 minimum part size. \
                 Multi-part uploads will fail against S3-compatible stores.",
                self.chunk_size
            ));
        }

        if self.allowed_types.is_empty() {
            warnings.push(
                "attachments.allowed_types is empty. Every upload will be rejected.".to_string(),
            );
        }

        Ok(warnings)
    }
}

/// Sequence id allocator tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Attempts before giving up on a contended scope.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` sleeps `n * base_backoff_ms`.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Upper bound on a whole allocation including backoff.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    100
}

fn default_deadline_ms() -> u64 {
    10_000
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

impl AllocatorConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("allocator.max_attempts must be at least 1".to_string());
        }
        if self.deadline_ms == 0 {
            return Err("allocator.deadline_ms must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Background reconciliation of interrupted deletes and stale uploads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Run the reconciler on a timer (default: false).
    /// `/v1/admin/reconcile` works regardless of this setting.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between passes.
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
    /// Pending deletions younger than this are left alone.
    #[serde(default = "default_reconcile_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Items handled per category per pass.
    #[serde(default = "default_reconcile_batch_size")]
    pub batch_size: u32,
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_reconcile_grace_period_secs() -> u64 {
    3600
}

fn default_reconcile_batch_size() -> u32 {
    100
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_reconcile_interval_secs(),
            grace_period_secs: default_reconcile_grace_period_secs(),
            batch_size: default_reconcile_batch_size(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn grace_period(&self) -> time::Duration {
        let secs = i64::try_from(self.grace_period_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        // tokio::time::interval panics on a zero period
        if self.interval_secs == 0 {
            return Err("reconcile.interval_secs cannot be 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("reconcile.batch_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub attachments: AttachmentConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl AppConfig {
    /// Create a test configuration with in-memory storage and small chunks.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            storage: StorageConfig::Memory,
            attachments: AttachmentConfig {
                chunk_size: 64,
                max_file_size: 64 * 1024,
                ..AttachmentConfig::default()
            },
            allocator: AllocatorConfig {
                base_backoff_ms: 1,
                ..AllocatorConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section. Returns collected warnings on success.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.storage.validate()?;
        self.allocator.validate()?;
        self.reconcile.validate()?;
        self.attachments.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.attachments.chunk_size, 10 * 1024 * 1024);
        assert_eq!(config.attachments.max_file_size, 500 * 1024 * 1024);
        assert_eq!(config.attachments.delete_url_ttl(), Duration::from_secs(900));
        assert_eq!(config.allocator.max_attempts, 5);
        assert_eq!(config.allocator.base_backoff(), Duration::from_millis(100));
        assert_eq!(config.allocator.deadline(), Duration::from_secs(10));
        assert!(!config.reconcile.enabled);
        assert!(config.server.metrics_enabled);
    }

    #[test]
    fn test_default_config_validates_cleanly() {
        let warnings = AppConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_testing_config_warns_about_small_chunks() {
        let warnings = AppConfig::for_testing().validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("5 MiB")));
    }

    #[test]
    fn test_attachment_config_rejects_too_many_parts() {
        let config = AttachmentConfig {
            chunk_size: 1024,
            max_file_size: 1024 * 10_001,
            ..AttachmentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_type_allowed_ignores_parameters_and_case() {
        let config = AttachmentConfig::default();
        assert!(config.is_type_allowed("image/png"));
        assert!(config.is_type_allowed("Text/Plain; charset=utf-8"));
        assert!(!config.is_type_allowed("application/x-msdownload"));
        assert!(!config.is_type_allowed(""));
    }

    #[test]
    fn test_storage_config_s3_validate_partial_credentials() {
        let invalid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(invalid.validate().is_err());

        let valid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: Some("secret-key".to_string()),
            force_path_style: false,
        };
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_storage_config_short_signing_secret_rejected() {
        let config = StorageConfig::Filesystem {
            path: PathBuf::from("/tmp/blobs"),
            signing_secret: Some("short".to_string()),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_memory_tag() {
        let config: StorageConfig = serde_json::from_str(r#"{"type":"memory"}"#).unwrap();
        assert!(matches!(config, StorageConfig::Memory));
    }

    #[test]
    fn test_reconcile_zero_interval_rejected_only_when_enabled() {
        let mut config = ReconcileConfig {
            interval_secs: 0,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_ok());
        config.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_section_uses_field_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"allocator":{"max_attempts":3}}"#).unwrap();
        assert_eq!(config.allocator.max_attempts, 3);
        assert_eq!(config.allocator.base_backoff_ms, 100);
        assert_eq!(config.attachments.chunk_size, crate::DEFAULT_CHUNK_SIZE);
    }
}
