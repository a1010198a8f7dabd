//! Blob storage abstraction and backends for casebook attachments.
//!
//! This crate provides:
//! - Multipart upload orchestration with per-part presigned PUT URLs
//! - Presigned GET and DELETE URLs
//! - Backends: S3-compatible, local filesystem (HMAC-signed URLs served by
//!   the casebook server itself), and in-memory

pub mod backends;
pub mod error;
pub mod signing;
pub mod traits;

pub use backends::{FilesystemBackend, MemoryBackend, S3Backend};
pub use error::{StorageError, StorageResult};
pub use signing::{BLOB_ROUTE_PREFIX, BlobOp, SignedBlobQuery, UrlSigner};
pub use traits::{BlobStore, LocalBlobHost, PresignMethod, PresignedUrl};

use casebook_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
///
/// `public_base_url` is where this service is reachable; the filesystem
/// backend builds its signed URLs against it.
pub async fn from_config(
    config: &StorageConfig,
    public_base_url: &str,
) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem {
            path,
            signing_secret,
        } => {
            let signer = match signing_secret {
                Some(secret) => UrlSigner::new(public_base_url, secret.as_bytes().to_vec()),
                None => {
                    tracing::warn!(
                        "storage.signing_secret not set; generated a random one, blob URLs will not survive a restart"
                    );
                    UrlSigner::random(public_base_url)
                }
            };
            let backend = FilesystemBackend::new(path, signer).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("store"),
            signing_secret: Some("0123456789abcdef".to_string()),
        };

        let store = from_config(&config, "http://localhost:8080").await.unwrap();
        assert_eq!(store.backend_name(), "filesystem");
        assert!(store.local_host().is_some());
        store.health_check().await.unwrap();

        let url = store
            .presign_get("a/b", std::time::Duration::from_secs(10))
            .await
            .unwrap();
        assert!(url.url.starts_with("http://localhost:8080/v1/blobs/a/b?"));
    }

    #[tokio::test]
    async fn from_config_s3_ok() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: Some("minio:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: Some("casebook".to_string()),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: true,
        };

        let store = from_config(&config, "http://unused").await.unwrap();
        assert_eq!(store.backend_name(), "s3");
        assert!(store.local_host().is_none());
    }

    #[tokio::test]
    async fn from_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };

        match from_config(&config, "http://unused").await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn from_config_rejects_short_signing_secret() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().to_path_buf(),
            signing_secret: Some("short".to_string()),
        };
        assert!(matches!(
            from_config(&config, "http://h").await,
            Err(StorageError::Config(_))
        ));
    }
}
