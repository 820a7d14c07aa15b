//! LFS batch API
//!
//! The client posts a list of (oid, size) pairs with an operation; the
//! response carries, per object, either transfer actions with presigned
//! URLs or an error. The server never proxies payload bytes: uploads and
//! downloads go straight between the client and the object store.
//!
//! Upload responses omit the actions entirely when the payload already
//! exists under its digest, which is how the protocol spells "skip the
//! upload" (payloads deduplicate globally across repositories).

use crate::areas::object_store::PayloadStore;
use crate::errors::BridgeResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Media type both batch requests and responses use
pub const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Download,
}

/// One (oid, size) pair from the request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub oid: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub operation: Operation,
    #[serde(default)]
    pub transfers: Vec<String>,
    pub objects: Vec<ObjectSpec>,
    #[serde(default)]
    pub hash_algo: Option<String>,
}

/// A single transfer action: where to send or fetch the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub href: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub header: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Actions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<Action>,
}

/// Per-object error, with an HTTP-style code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectResponse {
    pub oid: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Actions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub transfer: String,
    pub objects: Vec<ObjectResponse>,
    pub hash_algo: String,
}

/// Verification request posted by the client after a successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub oid: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Process a batch request against the payload store
///
/// `verify_url` is this server's own verify endpoint for the repository,
/// advertised alongside every upload action.
pub async fn process_batch(
    store: &dyn PayloadStore,
    request: &BatchRequest,
    verify_url: &str,
) -> BridgeResult<BatchResponse> {
    let mut objects = Vec::with_capacity(request.objects.len());

    for spec in &request.objects {
        let object = match request.operation {
            Operation::Upload => process_upload(store, spec, verify_url).await?,
            Operation::Download => process_download(store, spec).await?,
        };
        objects.push(object);
    }

    Ok(BatchResponse {
        transfer: "basic".to_string(),
        objects,
        hash_algo: "sha256".to_string(),
    })
}

async fn process_upload(
    store: &dyn PayloadStore,
    spec: &ObjectSpec,
    verify_url: &str,
) -> BridgeResult<ObjectResponse> {
    if store.exists(&spec.oid).await? {
        tracing::debug!(oid = %short(&spec.oid), "payload already stored, skipping upload");
        return Ok(ObjectResponse {
            oid: spec.oid.clone(),
            size: spec.size,
            authenticated: Some(true),
            // No actions: the client skips the transfer
            actions: None,
            error: None,
        });
    }

    let upload = store.presign_upload(&spec.oid).await?;
    Ok(ObjectResponse {
        oid: spec.oid.clone(),
        size: spec.size,
        authenticated: Some(true),
        actions: Some(Actions {
            upload: Some(Action {
                href: upload.href,
                header: BTreeMap::new(),
                expires_at: upload.expires_at,
            }),
            download: None,
            verify: Some(Action {
                href: verify_url.to_string(),
                header: BTreeMap::new(),
                expires_at: upload.expires_at,
            }),
        }),
        error: None,
    })
}

async fn process_download(
    store: &dyn PayloadStore,
    spec: &ObjectSpec,
) -> BridgeResult<ObjectResponse> {
    if !store.exists(&spec.oid).await? {
        return Ok(ObjectResponse {
            oid: spec.oid.clone(),
            size: spec.size,
            authenticated: None,
            actions: None,
            error: Some(ObjectError {
                code: 404,
                message: "Object not found".to_string(),
            }),
        });
    }

    let download = store.presign_download(&spec.oid).await?;
    Ok(ObjectResponse {
        oid: spec.oid.clone(),
        size: spec.size,
        authenticated: Some(true),
        actions: Some(Actions {
            upload: None,
            download: Some(Action {
                href: download.href,
                header: BTreeMap::new(),
                expires_at: download.expires_at,
            }),
            verify: None,
        }),
        error: None,
    })
}

/// Confirm an uploaded payload exists with the size the client claims
pub async fn verify_upload(
    store: &dyn PayloadStore,
    request: &VerifyRequest,
) -> BridgeResult<Result<(), ObjectError>> {
    let Some(stored) = store.size(&request.oid).await? else {
        return Ok(Err(ObjectError {
            code: 404,
            message: "Object not found in storage".to_string(),
        }));
    };

    if let Some(size) = request.size
        && stored != size
    {
        return Ok(Err(ObjectError {
            code: 400,
            message: format!("Size mismatch: expected {size}, stored {stored}"),
        }));
    }

    Ok(Ok(()))
}

fn short(oid: &str) -> &str {
    &oid[..oid.len().min(8)]
}
