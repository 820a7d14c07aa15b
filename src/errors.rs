//! Protocol error taxonomy
//!
//! Every failure mode of the bridge maps to one of these variants. None of
//! them is retried internally: each one is terminal for the current request
//! and is reported through the protocol's native channel (a pkt-line error
//! frame for Git operations, an HTTP error or per-object JSON error for LFS
//! batch requests).

use crate::artifacts::objects::object_id::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed pkt-line framing (bad length prefix, truncated frame).
    #[error("malformed pkt-line: {0}")]
    Framing(String),

    /// Corrupt or incomplete pack stream, including a delta whose base
    /// cannot be resolved.
    #[error("invalid pack: {0}")]
    PackFormat(String),

    /// The pack's trailing checksum does not match its contents. The whole
    /// transfer is rejected; no object from the pack is applied.
    #[error("pack checksum mismatch: expected {expected}, computed {actual}")]
    Integrity { expected: String, actual: String },

    /// A referenced object id could not be resolved, e.g. a `want` for an
    /// id the server never advertised.
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    /// The compare-and-swap ref update lost a race. Recoverable by the
    /// client via fetch-then-retry; the ref is left untouched.
    #[error("ref {reference} moved: expected {expected}, found {actual}")]
    Conflict {
        reference: String,
        expected: String,
        actual: String,
    },

    /// The Git <-> backend mapping cannot be performed for this input.
    #[error("cannot translate: {0}")]
    Translation(String),

    /// A backend or object-store call failed for reasons outside the
    /// protocol itself.
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Backend(anyhow::Error::from(e))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        BridgeError::Backend(anyhow::Error::from(e))
    }
}

impl BridgeError {
    /// Short status token used in receive-pack `ng` report lines.
    pub fn report_token(&self) -> &'static str {
        match self {
            BridgeError::Framing(_) => "malformed request",
            BridgeError::PackFormat(_) => "unpack failed",
            BridgeError::Integrity { .. } => "pack corrupt",
            BridgeError::UnknownObject(_) => "missing object",
            BridgeError::Conflict { .. } => "fetch first",
            BridgeError::Translation(_) => "not translatable",
            BridgeError::Backend(_) => "internal error",
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
