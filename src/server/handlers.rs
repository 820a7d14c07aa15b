//! HTTP endpoint handlers
//!
//! Smart HTTP, the `HEAD` convenience endpoint, and the LFS batch/verify
//! API. Handlers are extractor shims: decode the request, run the
//! permission check, call the bridge, set the media type.

use crate::errors::BridgeError;
use crate::lfs::batch::{BatchRequest, LFS_MEDIA_TYPE, Operation, VerifyRequest};
use crate::protocol::advertisement::GitService;
use crate::server::AppState;
use crate::server::auth::{Credentials, parse_basic};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct InfoRefsQuery {
    service: String,
}

/// `GET /{namespace}/{repo}.git/info/refs?service=...`
pub async fn info_refs(
    State(state): State<AppState>,
    Path((namespace, repo)): Path<(String, String)>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(repo) = repo_id(&namespace, &repo) else {
        return not_a_repo();
    };
    let Some(service) = GitService::try_parse(&query.service) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("unknown service: {}", query.service),
        )
            .into_response();
    };

    let actor = credentials(&headers);
    let allowed = match service {
        GitService::UploadPack => state.policy.can_read(&repo, actor.as_ref()).await,
        GitService::ReceivePack => state.policy.can_write(&repo, actor.as_ref()).await,
    };
    if !allowed {
        return denied(actor.as_ref());
    }

    match state.bridge.handle_info_refs(&repo, service).await {
        Ok(advertisement) => (
            [
                (
                    header::CONTENT_TYPE,
                    format!("application/x-{service}-advertisement"),
                ),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            advertisement,
        )
            .into_response(),
        Err(error) => bridge_failure(error),
    }
}

/// `GET /{namespace}/{repo}.git/HEAD`
pub async fn head(
    State(state): State<AppState>,
    Path((namespace, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Some(repo) = repo_id(&namespace, &repo) else {
        return not_a_repo();
    };
    let actor = credentials(&headers);
    if !state.policy.can_read(&repo, actor.as_ref()).await {
        return denied(actor.as_ref());
    }

    match state.bridge.handle_head(&repo).await {
        Ok(reference) => (
            [(header::CONTENT_TYPE, "text/plain".to_string())],
            reference,
        )
            .into_response(),
        Err(error) => bridge_failure(error),
    }
}

/// `POST /{namespace}/{repo}.git/git-upload-pack`
pub async fn upload_pack(
    State(state): State<AppState>,
    Path((namespace, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(repo) = repo_id(&namespace, &repo) else {
        return not_a_repo();
    };
    let actor = credentials(&headers);
    if !state.policy.can_read(&repo, actor.as_ref()).await {
        return denied(actor.as_ref());
    }

    match state.bridge.handle_upload_pack(&repo, &body).await {
        Ok(response) => (
            [
                (
                    header::CONTENT_TYPE,
                    "application/x-git-upload-pack-result".to_string(),
                ),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            response,
        )
            .into_response(),
        Err(error) => bridge_failure(error),
    }
}

/// `POST /{namespace}/{repo}.git/git-receive-pack`
pub async fn receive_pack(
    State(state): State<AppState>,
    Path((namespace, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(repo) = repo_id(&namespace, &repo) else {
        return not_a_repo();
    };
    let actor = credentials(&headers);
    if !state.policy.can_write(&repo, actor.as_ref()).await {
        return denied(actor.as_ref());
    }

    match state.bridge.handle_receive_pack(&repo, &body).await {
        Ok(report) => (
            [
                (
                    header::CONTENT_TYPE,
                    "application/x-git-receive-pack-result".to_string(),
                ),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            report,
        )
            .into_response(),
        Err(error) => bridge_failure(error),
    }
}

/// `POST /{namespace}/{repo}.git/info/lfs/objects/batch`
pub async fn lfs_batch(
    State(state): State<AppState>,
    Path((namespace, repo)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> Response {
    let Some(repo) = repo_id(&namespace, &repo) else {
        return not_a_repo();
    };
    let actor = credentials(&headers);
    let allowed = match request.operation {
        Operation::Upload => state.policy.can_write(&repo, actor.as_ref()).await,
        Operation::Download => state.policy.can_read(&repo, actor.as_ref()).await,
    };
    if !allowed {
        return denied(actor.as_ref());
    }

    match state.bridge.handle_lfs_batch(&repo, &request).await {
        Ok(response) => lfs_json(StatusCode::OK, &response),
        Err(error) => bridge_failure(error),
    }
}

/// `POST /{namespace}/{repo}.git/info/lfs/verify`
pub async fn lfs_verify(
    State(state): State<AppState>,
    Path((namespace, repo)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> Response {
    let Some(repo) = repo_id(&namespace, &repo) else {
        return not_a_repo();
    };
    let actor = credentials(&headers);
    if !state.policy.can_write(&repo, actor.as_ref()).await {
        return denied(actor.as_ref());
    }

    match state.bridge.handle_lfs_verify(&repo, &request).await {
        Ok(Ok(())) => lfs_json(
            StatusCode::OK,
            &json!({ "message": "Object verified successfully" }),
        ),
        Ok(Err(object_error)) => lfs_json(
            StatusCode::from_u16(object_error.code).unwrap_or(StatusCode::BAD_REQUEST),
            &json!({ "message": object_error.message }),
        ),
        Err(error) => bridge_failure(error),
    }
}

/// Join the two path segments into the repository id, stripping `.git`
fn repo_id(namespace: &str, repo: &str) -> Option<String> {
    let name = repo.strip_suffix(".git")?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some(format!("{namespace}/{name}"))
}

fn credentials(headers: &HeaderMap) -> Option<Credentials> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic)
}

fn not_a_repo() -> Response {
    (StatusCode::NOT_FOUND, "not a git repository").into_response()
}

/// 401 for anonymous requests, 403 for authenticated-but-denied ones
fn denied(actor: Option<&Credentials>) -> Response {
    match actor {
        None => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"brig\"")],
            "authentication required",
        )
            .into_response(),
        Some(_) => (StatusCode::FORBIDDEN, "permission denied").into_response(),
    }
}

fn lfs_json<T: serde::Serialize>(status: StatusCode, payload: &T) -> Response {
    match serde_json::to_vec(payload) {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, LFS_MEDIA_TYPE)],
            body,
        )
            .into_response(),
        Err(error) => {
            error!(%error, "failed to encode LFS response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn bridge_failure(error: BridgeError) -> Response {
    let status = match &error {
        BridgeError::Framing(_) | BridgeError::PackFormat(_) | BridgeError::Integrity { .. } => {
            StatusCode::BAD_REQUEST
        }
        BridgeError::UnknownObject(_) => StatusCode::NOT_FOUND,
        BridgeError::Conflict { .. } => StatusCode::CONFLICT,
        BridgeError::Translation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BridgeError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!(%error, %status, "request failed");
    (status, error.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn repo_id_requires_the_git_suffix() {
        assert_eq!(
            repo_id("models", "bert-base.git"),
            Some("models/bert-base".to_string())
        );
        assert_eq!(repo_id("models", "bert-base"), None);
        assert_eq!(repo_id("models", ".git"), None);
    }
}
