//! In-memory backend and payload store
//!
//! Fixture implementations used by tests and local experiments. They model
//! the same semantics the REST implementations talk to over the wire:
//! branches with staged changes, atomic compare-and-swap commits, and a
//! content-addressed payload store issuing presigned-shaped URLs.
//!
//! Commit ids are derived from the snapshot content, so fixtures are stable
//! across runs.

use crate::areas::backend::{Backend, BackendBranch, BackendCommitInfo, BackendEntry};
use crate::areas::object_store::{PayloadStore, PresignedUrl, payload_key};
use crate::errors::{BridgeError, BridgeResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CommitRecord {
    info: BackendCommitInfo,
    entries: BTreeMap<String, Bytes>,
}

#[derive(Debug, Default)]
struct RepoState {
    default_branch: String,
    branches: BTreeMap<String, Option<String>>,
    commits: HashMap<String, CommitRecord>,
    /// Staged changes per branch: `None` marks a deletion
    staging: HashMap<String, BTreeMap<String, Option<Bytes>>>,
}

impl RepoState {
    fn snapshot(&self, reference: &str) -> BridgeResult<&BTreeMap<String, Bytes>> {
        let commit_id = match self.branches.get(reference) {
            Some(Some(head)) => head.as_str(),
            Some(None) => {
                static EMPTY: BTreeMap<String, Bytes> = BTreeMap::new();
                return Ok(&EMPTY);
            }
            None => reference,
        };

        self.commits
            .get(commit_id)
            .map(|record| &record.entries)
            .ok_or_else(|| BridgeError::Backend(anyhow::anyhow!("unknown reference {reference}")))
    }
}

/// In-memory [`Backend`] with compare-and-swap enforced under one mutex
#[derive(Default)]
pub struct MemoryBackend {
    repos: Mutex<HashMap<String, RepoState>>,
    /// Paths staged by `stage_entry` since construction, oldest first.
    /// Lets tests assert that unchanged paths are never re-uploaded.
    staged_log: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with an empty default branch
    pub async fn create_repo(&self, repo: &str, default_branch: &str) {
        let mut repos = self.repos.lock().await;
        let state = repos.entry(repo.to_string()).or_default();
        state.default_branch = default_branch.to_string();
        state.branches.entry(default_branch.to_string()).or_insert(None);
    }

    /// Paths staged so far, in order
    pub async fn staged_paths(&self) -> Vec<String> {
        self.staged_log.lock().await.clone()
    }

    async fn with_repo<T>(
        &self,
        repo: &str,
        f: impl FnOnce(&mut RepoState) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        let mut repos = self.repos.lock().await;
        let state = repos
            .get_mut(repo)
            .ok_or_else(|| BridgeError::Backend(anyhow::anyhow!("unknown repository {repo}")))?;
        f(state)
    }
}

/// Content digest used as a fixture commit id; 64 hex chars, so it can
/// never be mistaken for a Git id in logs
fn commit_digest(
    parent: Option<&str>,
    message: &str,
    entries: &BTreeMap<String, Bytes>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.unwrap_or(""));
    hasher.update([0]);
    hasher.update(message);
    for (path, content) in entries {
        hasher.update([0]);
        hasher.update(path);
        hasher.update([0]);
        hasher.update(content);
    }
    format!("{:x}", hasher.finalize())
}

fn entry_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("sha256:{:x}", hasher.finalize())
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn default_branch(&self, repo: &str) -> BridgeResult<String> {
        self.with_repo(repo, |state| Ok(state.default_branch.clone()))
            .await
    }

    async fn get_branch(&self, repo: &str, branch: &str) -> BridgeResult<Option<BackendBranch>> {
        self.with_repo(repo, |state| {
            Ok(state.branches.get(branch).map(|head| BackendBranch {
                name: branch.to_string(),
                head: head.clone(),
            }))
        })
        .await
    }

    async fn list_branches(&self, repo: &str) -> BridgeResult<Vec<BackendBranch>> {
        self.with_repo(repo, |state| {
            Ok(state
                .branches
                .iter()
                .map(|(name, head)| BackendBranch {
                    name: name.clone(),
                    head: head.clone(),
                })
                .collect())
        })
        .await
    }

    async fn create_branch(
        &self,
        repo: &str,
        name: &str,
        source: Option<&str>,
    ) -> BridgeResult<()> {
        self.with_repo(repo, |state| {
            let head = match source {
                Some(source) => match state.branches.get(source) {
                    Some(head) => head.clone(),
                    None if state.commits.contains_key(source) => Some(source.to_string()),
                    None => {
                        return Err(BridgeError::Backend(anyhow::anyhow!(
                            "unknown branch source {source}"
                        )));
                    }
                },
                None => None,
            };
            state.branches.insert(name.to_string(), head);
            Ok(())
        })
        .await
    }

    async fn delete_branch(&self, repo: &str, branch: &str) -> BridgeResult<()> {
        self.with_repo(repo, |state| {
            state.branches.remove(branch);
            state.staging.remove(branch);
            Ok(())
        })
        .await
    }

    async fn get_commit(&self, repo: &str, commit_id: &str) -> BridgeResult<BackendCommitInfo> {
        self.with_repo(repo, |state| {
            state
                .commits
                .get(commit_id)
                .map(|record| record.info.clone())
                .ok_or_else(|| {
                    BridgeError::Backend(anyhow::anyhow!("unknown commit {commit_id}"))
                })
        })
        .await
    }

    async fn list_entries(&self, repo: &str, reference: &str) -> BridgeResult<Vec<BackendEntry>> {
        self.with_repo(repo, |state| {
            Ok(state
                .snapshot(reference)?
                .iter()
                .map(|(path, content)| BackendEntry {
                    path: path.clone(),
                    size_bytes: content.len() as u64,
                    checksum: entry_checksum(content),
                })
                .collect())
        })
        .await
    }

    async fn get_entry(&self, repo: &str, reference: &str, path: &str) -> BridgeResult<Bytes> {
        self.with_repo(repo, |state| {
            state.snapshot(reference)?.get(path).cloned().ok_or_else(|| {
                BridgeError::Backend(anyhow::anyhow!("no entry {path} at {reference}"))
            })
        })
        .await
    }

    async fn stage_entry(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: Bytes,
    ) -> BridgeResult<()> {
        self.staged_log.lock().await.push(path.to_string());
        self.with_repo(repo, |state| {
            state
                .staging
                .entry(branch.to_string())
                .or_default()
                .insert(path.to_string(), Some(content));
            Ok(())
        })
        .await
    }

    async fn delete_entry(&self, repo: &str, branch: &str, path: &str) -> BridgeResult<()> {
        self.with_repo(repo, |state| {
            state
                .staging
                .entry(branch.to_string())
                .or_default()
                .insert(path.to_string(), None);
            Ok(())
        })
        .await
    }

    async fn commit(
        &self,
        repo: &str,
        branch: &str,
        message: &str,
        metadata: BTreeMap<String, String>,
        expected_head: Option<&str>,
    ) -> BridgeResult<BackendCommitInfo> {
        self.with_repo(repo, |state| {
            let current = state
                .branches
                .get(branch)
                .cloned()
                .ok_or_else(|| BridgeError::Backend(anyhow::anyhow!("unknown branch {branch}")))?;

            // The compare-and-swap: everything below happens under the lock
            if current.as_deref() != expected_head {
                return Err(BridgeError::Conflict {
                    reference: branch.to_string(),
                    expected: expected_head.unwrap_or("<none>").to_string(),
                    actual: current.as_deref().unwrap_or("<none>").to_string(),
                });
            }

            let mut entries = match &current {
                Some(head) => state
                    .commits
                    .get(head)
                    .map(|record| record.entries.clone())
                    .unwrap_or_default(),
                None => BTreeMap::new(),
            };
            for (path, change) in state.staging.remove(branch).unwrap_or_default() {
                match change {
                    Some(content) => {
                        entries.insert(path, content);
                    }
                    None => {
                        entries.remove(&path);
                    }
                }
            }

            let id = commit_digest(current.as_deref(), message, &entries);
            let info = BackendCommitInfo {
                id: id.clone(),
                parents: current.iter().cloned().collect(),
                committer: "memory-backend".to_string(),
                message: message.to_string(),
                created_at: Utc::now(),
                metadata,
            };

            state.commits.insert(
                id.clone(),
                CommitRecord {
                    info: info.clone(),
                    entries,
                },
            );
            state.branches.insert(branch.to_string(), Some(id));
            Ok(info)
        })
        .await
    }
}

/// In-memory [`PayloadStore`] issuing presigned-shaped URLs with real expiries
#[derive(Default)]
pub struct MemoryPayloadStore {
    payloads: Mutex<HashMap<String, Bytes>>,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a stored payload (for test assertions)
    pub async fn payload(&self, oid: &str) -> Option<Bytes> {
        self.payloads.lock().await.get(oid).cloned()
    }
}

#[async_trait]
impl PayloadStore for MemoryPayloadStore {
    async fn exists(&self, oid: &str) -> BridgeResult<bool> {
        Ok(self.payloads.lock().await.contains_key(oid))
    }

    async fn size(&self, oid: &str) -> BridgeResult<Option<u64>> {
        Ok(self
            .payloads
            .lock()
            .await
            .get(oid)
            .map(|content| content.len() as u64))
    }

    async fn put(&self, oid: &str, content: Bytes) -> BridgeResult<()> {
        self.payloads.lock().await.insert(oid.to_string(), content);
        Ok(())
    }

    async fn presign_download(&self, oid: &str) -> BridgeResult<PresignedUrl> {
        Ok(PresignedUrl {
            href: format!("https://storage.invalid/{}?op=get", payload_key(oid)),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn presign_upload(&self, oid: &str) -> BridgeResult<PresignedUrl> {
        Ok(PresignedUrl {
            href: format!("https://storage.invalid/{}?op=put", payload_key(oid)),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}
