//! LFS payload store capability
//!
//! Oversize payloads live in an S3-compatible object store under their
//! SHA-256 digest, outside the backend's versioned key space. The bridge
//! never streams payload bytes itself: clients upload and download through
//! presigned URLs issued here.

use crate::errors::BridgeResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A presigned transfer URL with its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub href: String,
    pub expires_at: DateTime<Utc>,
}

/// Storage key for an LFS payload, fanned out to keep prefixes balanced
pub fn payload_key(oid: &str) -> String {
    format!("lfs/{}/{}/{}", &oid[..2], &oid[2..4], oid)
}

/// Content-addressed payload storage
///
/// `oid` is always the payload's SHA-256 hex digest, so identical payloads
/// deduplicate globally across repositories.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn exists(&self, oid: &str) -> BridgeResult<bool>;

    /// Size of a stored payload, `None` when absent
    async fn size(&self, oid: &str) -> BridgeResult<Option<u64>>;

    /// Store a payload the server itself extracted from a push
    async fn put(&self, oid: &str, content: Bytes) -> BridgeResult<()>;

    async fn presign_download(&self, oid: &str) -> BridgeResult<PresignedUrl>;

    async fn presign_upload(&self, oid: &str) -> BridgeResult<PresignedUrl>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_keys_fan_out_by_digest_prefix() {
        let oid = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(payload_key(oid), format!("lfs/e3/b0/{oid}"));
    }
}
