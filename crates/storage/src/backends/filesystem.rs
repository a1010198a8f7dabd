//! Local filesystem blob backend.
//!
//! Objects live under `<root>/objects/<key>`. Multipart uploads stage parts
//! under `<root>/uploads/<upload_id>/` and are concatenated on completion.
//! Presigned URLs are HMAC-signed links to this service's `/v1/blobs` routes.

use crate::error::{StorageError, StorageResult};
use crate::signing::{BlobOp, UrlSigner};
use crate::traits::{BlobStore, LocalBlobHost, PresignMethod, PresignedUrl};
use async_trait::async_trait;
use bytes::Bytes;
use casebook_core::upload::CompletedPart;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

const OBJECTS_DIR: &str = "objects";
const UPLOADS_DIR: &str = "uploads";
const UPLOAD_META_FILE: &str = "key";

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
    objects: PathBuf,
    uploads: PathBuf,
    signer: UrlSigner,
}

impl std::fmt::Debug for FilesystemBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBackend")
            .field("root", &self.root)
            .field("signer", &self.signer)
            .finish()
    }
}

/// Hex-encoded SHA-256 of a part, used as its etag.
pub fn part_etag(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>, signer: UrlSigner) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        let objects = root.join(OBJECTS_DIR);
        let uploads = root.join(UPLOADS_DIR);
        fs::create_dir_all(&objects).await?;
        fs::create_dir_all(&uploads).await?;
        Ok(Self {
            root,
            objects,
            uploads,
            signer,
        })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs the checks on the blocking pool since `canonicalize` and
    /// `symlink_metadata` hit the filesystem.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.objects.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Returns an error if the key would escape the objects root, including
    /// through symlinks.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\')
        {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in Path::new(key).components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Walk up to the nearest existing ancestor (or the path itself) and make
        // sure it resolves inside the root.
        let mut probe = Some(path.as_path());
        while let Some(candidate) = probe {
            match std::fs::symlink_metadata(candidate) {
                Ok(meta) => {
                    let canonical = candidate.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    probe = candidate.parent();
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(path)
    }

    /// Directory for a multipart upload. Upload ids are issued here as
    /// simple UUIDs, so anything else is rejected outright.
    fn upload_dir(&self, upload_id: &str) -> StorageResult<PathBuf> {
        if upload_id.len() != 32 || !upload_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        Ok(self.uploads.join(upload_id))
    }

    fn part_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("part-{part_number:05}"))
    }

    /// Load the key a multipart upload was created for, checking it matches.
    async fn upload_for_key(&self, key: &str, upload_id: &str) -> StorageResult<PathBuf> {
        let dir = self.upload_dir(upload_id)?;
        let stored = match fs::read_to_string(dir.join(UPLOAD_META_FILE)).await {
            Ok(stored) => stored,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::UploadNotFound(upload_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if stored != key {
            return Err(StorageError::UploadNotFound(format!(
                "{upload_id} is not an upload for {key}"
            )));
        }
        Ok(dir)
    }

    /// Write bytes to `path` via a temp file and rename.
    async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn create_multipart(&self, key: &str, content_type: &str) -> StorageResult<String> {
        // Validate the key up front so a bad key fails at initialization.
        self.key_path(key).await?;

        let upload_id = Uuid::new_v4().simple().to_string();
        let dir = self.upload_dir(&upload_id)?;
        fs::create_dir_all(&dir).await?;
        Self::write_atomic(&dir.join(UPLOAD_META_FILE), key.as_bytes()).await?;
        Ok(upload_id)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn presign_upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        part_count: u32,
        ttl: Duration,
    ) -> StorageResult<Vec<PresignedUrl>> {
        (1..=part_count)
            .map(|part| {
                let url =
                    self.signer
                        .sign_url(BlobOp::PutPart, key, Some(upload_id), Some(part), ttl)?;
                Ok(PresignedUrl::new(PresignMethod::Put, url, ttl))
            })
            .collect()
    }

    #[instrument(skip(self, parts), fields(backend = "filesystem", parts = parts.len()))]
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let dir = self.upload_for_key(key, upload_id).await?;

        let mut assembled = Vec::new();
        for part in parts {
            let data = match fs::read(Self::part_path(&dir, part.part_number)).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::InvalidPart(format!(
                        "part {} was never uploaded",
                        part.part_number
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            let actual = part_etag(&data);
            if actual != part.etag.trim_matches('"') {
                return Err(StorageError::InvalidPart(format!(
                    "part {} etag mismatch",
                    part.part_number
                )));
            }
            assembled.extend_from_slice(&data);
        }

        let path = self.key_path(key).await?;
        Self::write_atomic(&path, &assembled).await?;

        if let Err(e) = fs::remove_dir_all(&dir).await {
            tracing::warn!(upload_id, error = %e, "failed to remove staged parts");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        let dir = match self.upload_for_key(key, upload_id).await {
            Ok(dir) => dir,
            Err(StorageError::UploadNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn presign_delete(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl> {
        let url = self.signer.sign_url(BlobOp::Delete, key, None, None, ttl)?;
        Ok(PresignedUrl::new(PresignMethod::Delete, url, ttl))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl> {
        let url = self.signer.sign_url(BlobOp::Get, key, None, None, ttl)?;
        Ok(PresignedUrl::new(PresignMethod::Get, url, ttl))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    fn local_host(&self) -> Option<&dyn LocalBlobHost> {
        Some(self)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalBlobHost for FilesystemBackend {
    fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn write_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        if part_number == 0 || u64::from(part_number) > casebook_core::MAX_PART_COUNT {
            return Err(StorageError::InvalidPart(format!(
                "part number {part_number} out of range"
            )));
        }
        let dir = self.upload_for_key(key, upload_id).await?;
        Self::write_atomic(&Self::part_path(&dir, part_number), &data).await?;
        Ok(part_etag(&data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn read_object(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_object(&self, key: &str) -> StorageResult<()> {
        BlobStore::delete(self, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend(dir: &Path) -> FilesystemBackend {
        FilesystemBackend::new(dir, UrlSigner::random("http://localhost"))
            .await
            .unwrap()
    }

    #[test]
    fn test_part_etag_is_lowercase_hex_sha256() {
        assert_eq!(
            part_etag(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(part_etag(b"").len(), 64);
    }

    #[tokio::test]
    async fn test_multipart_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;
        let key = "attachments/unlinked/x-notes.txt";

        let upload_id = backend.create_multipart(key, "text/plain").await.unwrap();
        let e1 = backend
            .write_part(key, &upload_id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        let e2 = backend
            .write_part(key, &upload_id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();

        backend
            .complete_multipart(
                key,
                &upload_id,
                &[
                    CompletedPart {
                        part_number: 1,
                        etag: e1,
                    },
                    CompletedPart {
                        part_number: 2,
                        etag: format!("\"{e2}\""),
                    },
                ],
            )
            .await
            .unwrap();

        assert!(backend.exists(key).await.unwrap());
        assert_eq!(
            backend.read_object(key).await.unwrap(),
            Bytes::from_static(b"hello world")
        );
        // Staging directory is gone, so a late abort is a no-op.
        backend.abort_multipart(key, &upload_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_rejects_wrong_etag_and_missing_part() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;
        let key = "k/obj";

        let upload_id = backend.create_multipart(key, "text/plain").await.unwrap();
        backend
            .write_part(key, &upload_id, 1, Bytes::from_static(b"a"))
            .await
            .unwrap();

        let err = backend
            .complete_multipart(
                key,
                &upload_id,
                &[CompletedPart {
                    part_number: 1,
                    etag: "bogus".to_string(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPart(_)));

        let err = backend
            .complete_multipart(
                key,
                &upload_id,
                &[CompletedPart {
                    part_number: 2,
                    etag: part_etag(b"b"),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPart(_)));
        assert!(!backend.exists(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_abort_unknown_upload_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend.abort_multipart("k", "not-an-upload").await.unwrap();
        backend
            .abort_multipart("k", &Uuid::new_v4().simple().to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_id_bound_to_key() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        let upload_id = backend.create_multipart("a/one", "text/plain").await.unwrap();
        let err = backend
            .write_part("a/two", &upload_id, 1, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;
        let key = "k/obj";

        let upload_id = backend.create_multipart(key, "text/plain").await.unwrap();
        let etag = backend
            .write_part(key, &upload_id, 1, Bytes::from_static(b"a"))
            .await
            .unwrap();
        backend
            .complete_multipart(
                key,
                &upload_id,
                &[CompletedPart {
                    part_number: 1,
                    etag,
                }],
            )
            .await
            .unwrap();

        backend.delete(key).await.unwrap();
        assert!(!backend.exists(key).await.unwrap());
        backend.delete(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../../etc/passwd").await.is_err());
        assert!(backend.create_multipart("../x", "text/plain").await.is_err());

        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        symlink(outside.path(), dir.path().join(OBJECTS_DIR).join("escape")).unwrap();
        let err = backend.exists("escape/file").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_presigned_urls_point_at_blob_routes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        let urls = backend
            .presign_upload_parts("k/obj", "u", 3, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(urls.len(), 3);
        assert!(urls[2].url.contains("part=3"));
        assert!(urls.iter().all(|u| u.method == PresignMethod::Put));

        let del = backend
            .presign_delete("k/obj", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(del.url.starts_with("http://localhost/v1/blobs/k/obj?op=delete"));
    }
}
