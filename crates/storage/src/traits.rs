//! Storage trait definitions.

use crate::error::StorageResult;
use crate::signing::UrlSigner;
use async_trait::async_trait;
use bytes::Bytes;
use casebook_core::upload::CompletedPart;
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

/// HTTP method a presigned URL authorises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresignMethod {
    Get,
    Put,
    Delete,
}

/// A time-limited, self-authorising URL for a single operation.
#[derive(Clone, Debug, Serialize)]
pub struct PresignedUrl {
    pub method: PresignMethod,
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl PresignedUrl {
    pub fn new(method: PresignMethod, url: String, ttl: Duration) -> Self {
        Self {
            method,
            url,
            expires_at: expires_at(ttl),
        }
    }
}

/// `now + ttl`, saturating instead of overflowing.
pub(crate) fn expires_at(ttl: Duration) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
    now.checked_add(ttl).unwrap_or(now)
}

/// Blob store holding attachment bytes.
///
/// Clients move bytes directly to and from the store through presigned URLs;
/// the service only orchestrates multipart sessions and deletion.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Start a multipart upload and return the store-issued upload id.
    async fn create_multipart(&self, key: &str, content_type: &str) -> StorageResult<String>;

    /// Presign one PUT URL per part, for parts `1..=part_count`, in order.
    async fn presign_upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        part_count: u32,
        ttl: Duration,
    ) -> StorageResult<Vec<PresignedUrl>>;

    /// Assemble uploaded parts into the final object.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()>;

    /// Discard a multipart upload and any uploaded parts.
    /// An upload the store does not know is treated as already aborted.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    /// Presign a DELETE of the object.
    async fn presign_delete(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl>;

    /// Presign a GET of the object.
    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;

    /// Access to locally hosted blobs, for backends whose presigned URLs
    /// point back at this service's `/v1/blobs` routes.
    fn local_host(&self) -> Option<&dyn LocalBlobHost> {
        None
    }

    /// Check backend connectivity and health.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Operations behind the signed `/v1/blobs` URLs issued by local backends.
#[async_trait]
pub trait LocalBlobHost: Send + Sync {
    /// Signer used to issue and verify blob URLs.
    fn signer(&self) -> &UrlSigner;

    /// Store one part of a multipart upload and return its etag.
    async fn write_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Read a whole object.
    async fn read_object(&self, key: &str) -> StorageResult<Bytes>;

    /// Delete an object (same semantics as [`BlobStore::delete`]).
    async fn remove_object(&self, key: &str) -> StorageResult<()>;
}
