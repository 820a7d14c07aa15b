//! REST implementations of the backend and payload-store capabilities
//!
//! Talks to the external version-control service's HTTP API with Basic
//! credentials. Listing endpoints are paged; the client loops until the
//! server reports no more results. A commit request carries the
//! compare-and-swap precondition in its body; the service answers `409`
//! when the branch head moved, which surfaces as
//! [`BridgeError::Conflict`](crate::errors::BridgeError).

use crate::areas::backend::{Backend, BackendBranch, BackendCommitInfo, BackendEntry};
use crate::areas::object_store::{PayloadStore, PresignedUrl, payload_key};
use crate::errors::{BridgeError, BridgeResult};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const PAGE_SIZE: u32 = 1000;

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct BranchPayload {
    id: String,
    commit_id: Option<String>,
}

impl From<BranchPayload> for BackendBranch {
    fn from(payload: BranchPayload) -> Self {
        BackendBranch {
            name: payload.id,
            head: payload.commit_id.filter(|id| !id.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    id: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    committer: String,
    #[serde(default)]
    message: String,
    creation_date: i64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl TryFrom<CommitPayload> for BackendCommitInfo {
    type Error = anyhow::Error;

    fn try_from(payload: CommitPayload) -> anyhow::Result<Self> {
        let created_at = DateTime::<Utc>::from_timestamp(payload.creation_date, 0)
            .context("commit creation_date out of range")?;
        Ok(BackendCommitInfo {
            id: payload.id,
            parents: payload.parents,
            committer: payload.committer,
            message: payload.message,
            created_at,
            metadata: payload.metadata,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ObjectStatsPayload {
    path: String,
    #[serde(default)]
    path_type: String,
    #[serde(default)]
    size_bytes: u64,
    #[serde(default)]
    checksum: String,
}

#[derive(Debug, Default, Deserialize)]
struct PaginationPayload {
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_offset: String,
}

#[derive(Debug, Deserialize)]
struct PagePayload<T> {
    results: Vec<T>,
    #[serde(default)]
    pagination: PaginationPayload,
}

#[derive(Debug, Serialize)]
struct CreateBranchBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CommitBody<'a> {
    message: &'a str,
    metadata: &'a BTreeMap<String, String>,
    /// Compare-and-swap precondition; `null` expects an empty branch
    expected_head: Option<&'a str>,
}

/// REST [`Backend`] client
pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl RestBackend {
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str) -> Self {
        RestBackend {
            http: reqwest::Client::new(),
            base_url: format!("{}/api/v1", endpoint.trim_end_matches('/')),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
    }

    async fn check(response: reqwest::Response) -> BridgeResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BridgeError::Backend(anyhow::anyhow!(
            "backend returned {status}: {body}"
        )))
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn default_branch(&self, repo: &str) -> BridgeResult<String> {
        let url = format!("{}/repositories/{repo}", self.base_url);
        let response = Self::check(self.request(reqwest::Method::GET, url).send().await?).await?;
        let payload: RepositoryPayload = response.json().await?;
        Ok(payload.default_branch)
    }

    async fn get_branch(&self, repo: &str, branch: &str) -> BridgeResult<Option<BackendBranch>> {
        let url = format!("{}/repositories/{repo}/branches/{branch}", self.base_url);
        let response = self.request(reqwest::Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let payload: BranchPayload = Self::check(response).await?.json().await?;
        Ok(Some(payload.into()))
    }

    async fn list_branches(&self, repo: &str) -> BridgeResult<Vec<BackendBranch>> {
        let url = format!("{}/repositories/{repo}/branches", self.base_url);
        let amount = PAGE_SIZE.to_string();
        let mut branches = Vec::new();
        let mut after = String::new();

        loop {
            let response = self
                .request(reqwest::Method::GET, url.clone())
                .query(&[("after", after.as_str()), ("amount", amount.as_str())])
                .send()
                .await?;
            let page: PagePayload<BranchPayload> = Self::check(response).await?.json().await?;

            branches.extend(page.results.into_iter().map(BackendBranch::from));
            if !page.pagination.has_more {
                return Ok(branches);
            }
            after = page.pagination.next_offset;
        }
    }

    async fn create_branch(
        &self,
        repo: &str,
        name: &str,
        source: Option<&str>,
    ) -> BridgeResult<()> {
        let url = format!("{}/repositories/{repo}/branches", self.base_url);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&CreateBranchBody { name, source })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_branch(&self, repo: &str, branch: &str) -> BridgeResult<()> {
        let url = format!("{}/repositories/{repo}/branches/{branch}", self.base_url);
        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get_commit(&self, repo: &str, commit_id: &str) -> BridgeResult<BackendCommitInfo> {
        let url = format!("{}/repositories/{repo}/commits/{commit_id}", self.base_url);
        let response = Self::check(self.request(reqwest::Method::GET, url).send().await?).await?;
        let payload: CommitPayload = response.json().await?;
        payload.try_into().map_err(BridgeError::Backend)
    }

    async fn list_entries(&self, repo: &str, reference: &str) -> BridgeResult<Vec<BackendEntry>> {
        let url = format!(
            "{}/repositories/{repo}/refs/{reference}/objects/ls",
            self.base_url
        );
        let amount = PAGE_SIZE.to_string();
        let mut entries = Vec::new();
        let mut after = String::new();

        loop {
            let response = self
                .request(reqwest::Method::GET, url.clone())
                .query(&[("after", after.as_str()), ("amount", amount.as_str())])
                .send()
                .await?;
            let page: PagePayload<ObjectStatsPayload> = Self::check(response).await?.json().await?;

            entries.extend(
                page.results
                    .into_iter()
                    .filter(|stats| stats.path_type.is_empty() || stats.path_type == "object")
                    .map(|stats| BackendEntry {
                        path: stats.path,
                        size_bytes: stats.size_bytes,
                        checksum: stats.checksum,
                    }),
            );
            if !page.pagination.has_more {
                return Ok(entries);
            }
            after = page.pagination.next_offset;
        }
    }

    async fn get_entry(&self, repo: &str, reference: &str, path: &str) -> BridgeResult<Bytes> {
        let url = format!(
            "{}/repositories/{repo}/refs/{reference}/objects",
            self.base_url
        );
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[("path", path)])
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?)
    }

    async fn stage_entry(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: Bytes,
    ) -> BridgeResult<()> {
        let url = format!(
            "{}/repositories/{repo}/branches/{branch}/objects",
            self.base_url
        );
        let response = self
            .request(reqwest::Method::POST, url)
            .query(&[("path", path)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_entry(&self, repo: &str, branch: &str, path: &str) -> BridgeResult<()> {
        let url = format!(
            "{}/repositories/{repo}/branches/{branch}/objects",
            self.base_url
        );
        let response = self
            .request(reqwest::Method::DELETE, url)
            .query(&[("path", path)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn commit(
        &self,
        repo: &str,
        branch: &str,
        message: &str,
        metadata: BTreeMap<String, String>,
        expected_head: Option<&str>,
    ) -> BridgeResult<BackendCommitInfo> {
        let url = format!(
            "{}/repositories/{repo}/branches/{branch}/commits",
            self.base_url
        );
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&CommitBody {
                message,
                metadata: &metadata,
                expected_head,
            })
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let actual = response.text().await.unwrap_or_default();
            return Err(BridgeError::Conflict {
                reference: branch.to_string(),
                expected: expected_head.unwrap_or("<none>").to_string(),
                actual,
            });
        }

        let payload: CommitPayload = Self::check(response).await?.json().await?;
        payload.try_into().map_err(BridgeError::Backend)
    }
}

#[derive(Debug, Serialize)]
struct PresignBody<'a> {
    key: String,
    operation: &'a str,
}

#[derive(Debug, Deserialize)]
struct PresignPayload {
    url: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct StatPayload {
    size_bytes: u64,
}

/// REST [`PayloadStore`] against the storage gateway's presign API
///
/// The gateway fronts the S3-compatible store; payload bytes only ever move
/// between the client and the store over the URLs issued here, with one
/// exception: `put` uploads payloads the server itself extracted from a
/// push, via a presigned PUT.
pub struct RestPayloadStore {
    http: reqwest::Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl RestPayloadStore {
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str) -> Self {
        RestPayloadStore {
            http: reqwest::Client::new(),
            base_url: format!("{}/api/v1/storage", endpoint.trim_end_matches('/')),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    async fn presign(&self, oid: &str, operation: &str) -> BridgeResult<PresignedUrl> {
        let response = self
            .http
            .post(format!("{}/presign", self.base_url))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .json(&PresignBody {
                key: payload_key(oid),
                operation,
            })
            .send()
            .await?;
        let payload: PresignPayload = RestBackend::check(response).await?.json().await?;
        Ok(PresignedUrl {
            href: payload.url,
            expires_at: payload.expires_at,
        })
    }

    async fn stat(&self, oid: &str) -> BridgeResult<Option<StatPayload>> {
        let response = self
            .http
            .get(format!("{}/stat", self.base_url))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .query(&[("key", payload_key(oid))])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(RestBackend::check(response).await?.json().await?))
    }
}

#[async_trait]
impl PayloadStore for RestPayloadStore {
    async fn exists(&self, oid: &str) -> BridgeResult<bool> {
        Ok(self.stat(oid).await?.is_some())
    }

    async fn size(&self, oid: &str) -> BridgeResult<Option<u64>> {
        Ok(self.stat(oid).await?.map(|stat| stat.size_bytes))
    }

    async fn put(&self, oid: &str, content: Bytes) -> BridgeResult<()> {
        let target = self.presign(oid, "upload").await?;
        let response = self.http.put(target.href).body(content).send().await?;
        RestBackend::check(response).await?;
        Ok(())
    }

    async fn presign_download(&self, oid: &str) -> BridgeResult<PresignedUrl> {
        self.presign(oid, "download").await
    }

    async fn presign_upload(&self, oid: &str) -> BridgeResult<PresignedUrl> {
        self.presign(oid, "upload").await
    }
}
