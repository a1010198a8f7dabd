//! In-memory blob backend.
//!
//! Used by tests and `type = "memory"` deployments. Presigned URLs use the
//! `memory://` scheme and are not dereferenceable; tests drive uploads through
//! [`MemoryBackend::put_part`] instead.

use crate::backends::filesystem::part_etag;
use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, PresignMethod, PresignedUrl};
use async_trait::async_trait;
use bytes::Bytes;
use casebook_core::upload::CompletedPart;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Bytes>,
    uploads: HashMap<String, PendingUpload>,
}

/// In-memory blob store with simple fault injection.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    failing: AtomicBool,
    delete_calls: AtomicUsize,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent store operation fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `delete` calls made, successful or not.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Store an object directly.
    pub fn put_object(&self, key: &str, data: Bytes) {
        self.lock().objects.insert(key.to_string(), data);
    }

    /// Read an object directly.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).cloned()
    }

    /// Number of multipart uploads still open.
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Upload one part, as a client would through its presigned URL.
    pub fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        self.check_failing()?;
        let mut inner = self.lock();
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;
        let etag = part_etag(&data);
        upload.parts.insert(part_number, data);
        Ok(etag)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain maps behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failing(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "injected store failure",
            )));
        }
        Ok(())
    }

    fn url(op: &str, key: &str, extra: &str) -> String {
        format!("memory://{key}?op={op}{extra}")
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn create_multipart(&self, key: &str, _content_type: &str) -> StorageResult<String> {
        self.check_failing()?;
        let upload_id = Uuid::new_v4().simple().to_string();
        self.lock().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn presign_upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        part_count: u32,
        ttl: Duration,
    ) -> StorageResult<Vec<PresignedUrl>> {
        self.check_failing()?;
        Ok((1..=part_count)
            .map(|part| {
                PresignedUrl::new(
                    PresignMethod::Put,
                    Self::url("put_part", key, &format!("&upload_id={upload_id}&part={part}")),
                    ttl,
                )
            })
            .collect())
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        self.check_failing()?;
        let mut inner = self.lock();
        let upload = match inner.uploads.get(upload_id) {
            Some(upload) if upload.key == key => upload,
            _ => return Err(StorageError::UploadNotFound(upload_id.to_string())),
        };

        let mut assembled = Vec::new();
        for part in parts {
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::InvalidPart(format!("part {} was never uploaded", part.part_number))
            })?;
            if part_etag(data) != part.etag.trim_matches('"') {
                return Err(StorageError::InvalidPart(format!(
                    "part {} etag mismatch",
                    part.part_number
                )));
            }
            assembled.extend_from_slice(data);
        }

        inner.uploads.remove(upload_id);
        inner.objects.insert(key.to_string(), Bytes::from(assembled));
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.check_failing()?;
        let mut inner = self.lock();
        if inner.uploads.get(upload_id).is_some_and(|u| u.key == key) {
            inner.uploads.remove(upload_id);
        }
        Ok(())
    }

    async fn presign_delete(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl> {
        self.check_failing()?;
        Ok(PresignedUrl::new(
            PresignMethod::Delete,
            Self::url("delete", key, ""),
            ttl,
        ))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl> {
        self.check_failing()?;
        Ok(PresignedUrl::new(
            PresignMethod::Get,
            Self::url("get", key, ""),
            ttl,
        ))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        self.lock().objects.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.check_failing()?;
        Ok(self.lock().objects.contains_key(key))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.check_failing()
    }
}
