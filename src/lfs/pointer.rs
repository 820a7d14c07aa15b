//! LFS pointer files
//!
//! A pointer is a small text stand-in committed in place of an oversize
//! payload. The payload itself lives in the object store under its SHA-256
//! digest and moves only over presigned URLs negotiated through the batch
//! API.
//!
//! ## Format
//!
//! ```text
//! version https://git-lfs.github.com/spec/v1
//! oid sha256:<64 hex chars>
//! size <bytes>
//! ```

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Fixed first line every pointer starts with; also the detection signature
pub const POINTER_SIGNATURE: &str = "version https://git-lfs.github.com/spec/v1";

/// Largest blob worth sniffing for the pointer signature. Real pointers are
/// around 130 bytes; anything past this is payload, not pointer.
pub const MAX_POINTER_SIZE: usize = 1024;

/// Parsed LFS pointer: payload digest, size, and the implied algorithm tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsPointer {
    oid: String,
    size: u64,
}

impl LfsPointer {
    pub fn new(oid: String, size: u64) -> Self {
        LfsPointer { oid, size }
    }

    /// Build a pointer for a payload, computing its SHA-256
    pub fn for_payload(content: &[u8]) -> Self {
        LfsPointer {
            oid: payload_digest(content),
            size: content.len() as u64,
        }
    }

    /// SHA-256 hex digest of the referenced payload
    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Render the canonical pointer text
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(format!(
            "{}\noid sha256:{}\nsize {}\n",
            POINTER_SIGNATURE, self.oid, self.size
        ))
    }

    /// Parse pointer text; `None` when the content is not a pointer
    pub fn parse(content: &[u8]) -> Option<LfsPointer> {
        if !is_pointer(content) {
            return None;
        }
        let text = std::str::from_utf8(content).ok()?;

        let mut oid = None;
        let mut size = None;
        for line in text.lines().skip(1) {
            if let Some(rest) = line.strip_prefix("oid sha256:") {
                let rest = rest.trim();
                if rest.len() == 64 && rest.chars().all(|c| c.is_ascii_hexdigit()) {
                    oid = Some(rest.to_lowercase());
                }
            } else if let Some(rest) = line.strip_prefix("size ") {
                size = rest.trim().parse::<u64>().ok();
            }
        }

        Some(LfsPointer {
            oid: oid?,
            size: size?,
        })
    }
}

/// Cheap signature check, usable on blob content of any size
pub fn is_pointer(content: &[u8]) -> bool {
    content.len() <= MAX_POINTER_SIZE && content.starts_with(POINTER_SIGNATURE.as_bytes())
}

/// SHA-256 hex digest of a payload, the LFS object id
pub fn payload_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
