//! External backend capability
//!
//! The durable side of the bridge: branches, commits, and a flat versioned
//! key space per branch. A backend commit is a snapshot of (path -> bytes)
//! entries, not a tree graph; the bridge flattens Git trees into that shape
//! and reconstructs them on read.
//!
//! Writes are staged on a branch and become durable through [`Backend::commit`],
//! whose `expected_head` argument is the compare-and-swap guard: the commit is
//! rejected with [`BridgeError::Conflict`](crate::errors::BridgeError) when the
//! branch head moved since the caller read it. That call is the single
//! serialization point for concurrent pushes.

use crate::errors::BridgeResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A branch in the backend's versioning model
///
/// `head` is `None` for a branch that exists but has no commits yet (a
/// freshly created repository).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendBranch {
    pub name: String,
    pub head: Option<String>,
}

/// Metadata of one backend commit
///
/// `metadata` carries the Git mapping recorded on push (commit sha, tree
/// sha, parent shas, author and committer lines); commits created outside
/// Git have none of those keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommitInfo {
    pub id: String,
    pub parents: Vec<String>,
    pub committer: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

/// One entry of a backend snapshot: a path with its stat information
///
/// `checksum` is the backend's content digest in `<algo>:<hex>` form when
/// known; it lets the bridge build LFS pointers without downloading the
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEntry {
    pub path: String,
    pub size_bytes: u64,
    pub checksum: String,
}

/// The external backend capability
///
/// The bridge is the only caller. A `reference` argument accepts either a
/// branch name or a commit id; `branch` arguments accept branch names only.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name of the repository's default branch (what `HEAD` points at)
    async fn default_branch(&self, repo: &str) -> BridgeResult<String>;

    /// Look up one branch, `None` when it does not exist
    async fn get_branch(&self, repo: &str, branch: &str) -> BridgeResult<Option<BackendBranch>>;

    async fn list_branches(&self, repo: &str) -> BridgeResult<Vec<BackendBranch>>;

    /// Create a branch pointing at `source` (a commit id or branch name);
    /// `None` creates an empty branch with no history
    async fn create_branch(&self, repo: &str, name: &str, source: Option<&str>)
    -> BridgeResult<()>;

    async fn delete_branch(&self, repo: &str, branch: &str) -> BridgeResult<()>;

    async fn get_commit(&self, repo: &str, commit_id: &str) -> BridgeResult<BackendCommitInfo>;

    /// Every entry of the snapshot at `reference`, fully paged
    async fn list_entries(&self, repo: &str, reference: &str) -> BridgeResult<Vec<BackendEntry>>;

    /// Content of one entry at `reference`
    async fn get_entry(&self, repo: &str, reference: &str, path: &str) -> BridgeResult<Bytes>;

    /// Stage new content for `path` on `branch`; durable only after `commit`
    async fn stage_entry(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: Bytes,
    ) -> BridgeResult<()>;

    /// Stage the removal of `path` on `branch`
    async fn delete_entry(&self, repo: &str, branch: &str, path: &str) -> BridgeResult<()>;

    /// Commit everything staged on `branch` as one atomic update
    ///
    /// `expected_head` is the compare-and-swap precondition: the current
    /// head commit id the caller observed, or `None` when the branch is
    /// expected to have no commits. A mismatch fails with
    /// [`BridgeError::Conflict`](crate::errors::BridgeError) and leaves both
    /// the branch and the staged entries untouched.
    async fn commit(
        &self,
        repo: &str,
        branch: &str,
        message: &str,
        metadata: BTreeMap<String, String>,
        expected_head: Option<&str>,
    ) -> BridgeResult<BackendCommitInfo>;
}

/// Metadata keys the bridge records on commits it creates from Git pushes
pub mod meta {
    /// Git commit sha the backend commit was translated from
    pub const GIT_COMMIT: &str = "git.commit";
    /// Root tree sha of that commit
    pub const GIT_TREE: &str = "git.tree";
    /// Space-separated parent shas
    pub const GIT_PARENTS: &str = "git.parents";
    /// Full `name <email> timestamp tz` author line
    pub const GIT_AUTHOR: &str = "git.author";
    /// Full committer line
    pub const GIT_COMMITTER: &str = "git.committer";
    /// Byte-exact commit message
    pub const GIT_MESSAGE: &str = "git.message";
    /// JSON object of path -> mode for entries that are not plain files
    pub const GIT_MODES: &str = "git.modes";
    /// Newline-joined extra headers (signatures, unknown fields)
    pub const GIT_HEADERS: &str = "git.headers";
}
