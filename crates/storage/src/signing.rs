//! HMAC-signed blob URLs for locally hosted backends.
//!
//! A signed URL looks like
//! `{base}/v1/blobs/{key}?op=put_part&upload_id=..&part=3&expires=1700000000&sig=..`.
//! The signature covers the operation, key, upload id, part number and expiry,
//! so a URL cannot be replayed for a different object or operation.

use crate::error::{StorageError, StorageResult};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Characters escaped inside one key segment or query value.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Blob route prefix served by the HTTP layer.
pub const BLOB_ROUTE_PREFIX: &str = "/v1/blobs";

/// Operation a signed blob URL authorises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobOp {
    PutPart,
    Get,
    Delete,
}

impl BlobOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PutPart => "put_part",
            Self::Get => "get",
            Self::Delete => "delete",
        }
    }
}

/// Query parameters carried by a signed blob URL.
#[derive(Clone, Debug, Deserialize)]
pub struct SignedBlobQuery {
    pub op: BlobOp,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub part: Option<u32>,
    pub expires: i64,
    pub sig: String,
}

/// Issues and verifies signed blob URLs.
#[derive(Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: Vec<u8>,
}

impl fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(base_url: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    /// Signer with a fresh random secret. URLs do not survive a restart.
    pub fn random(base_url: impl Into<String>) -> Self {
        let mut secret = Vec::with_capacity(32);
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
        Self::new(base_url, secret)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn signature(
        &self,
        op: BlobOp,
        key: &str,
        upload_id: Option<&str>,
        part: Option<u32>,
        expires: i64,
    ) -> StorageResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| StorageError::Config("invalid signing secret".to_string()))?;
        mac.update(op.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(upload_id.unwrap_or("").as_bytes());
        mac.update(b"\n");
        mac.update(part.map(|p| p.to_string()).unwrap_or_default().as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Build a signed URL valid for `ttl`.
    pub fn sign_url(
        &self,
        op: BlobOp,
        key: &str,
        upload_id: Option<&str>,
        part: Option<u32>,
        ttl: Duration,
    ) -> StorageResult<String> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = OffsetDateTime::now_utc()
            .unix_timestamp()
            .saturating_add(ttl_secs);
        self.sign_url_at(op, key, upload_id, part, expires)
    }

    fn sign_url_at(
        &self,
        op: BlobOp,
        key: &str,
        upload_id: Option<&str>,
        part: Option<u32>,
        expires: i64,
    ) -> StorageResult<String> {
        let sig = URL_SAFE_NO_PAD.encode(
            self.signature(op, key, upload_id, part, expires)?
                .finalize()
                .into_bytes(),
        );

        let path = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");

        let mut url = format!(
            "{}{}/{}?op={}",
            self.base_url,
            BLOB_ROUTE_PREFIX,
            path,
            op.as_str()
        );
        if let Some(upload_id) = upload_id {
            url.push_str("&upload_id=");
            url.push_str(&utf8_percent_encode(upload_id, SEGMENT).to_string());
        }
        if let Some(part) = part {
            url.push_str(&format!("&part={part}"));
        }
        url.push_str(&format!("&expires={expires}&sig={sig}"));
        Ok(url)
    }

    /// Check a request against its signature and expiry.
    pub fn verify(&self, key: &str, query: &SignedBlobQuery) -> StorageResult<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.verify_at(key, query, now)
    }

    fn verify_at(&self, key: &str, query: &SignedBlobQuery, now: i64) -> StorageResult<()> {
        let provided = URL_SAFE_NO_PAD
            .decode(query.sig.as_bytes())
            .map_err(|_| StorageError::InvalidSignature)?;

        self.signature(
            query.op,
            key,
            query.upload_id.as_deref(),
            query.part,
            query.expires,
        )?
        .verify_slice(&provided)
        .map_err(|_| StorageError::InvalidSignature)?;

        // Checked after the MAC so a forged expiry cannot be probed.
        if now > query.expires {
            return Err(StorageError::SignatureExpired);
        }
        Ok(())
    }
}
