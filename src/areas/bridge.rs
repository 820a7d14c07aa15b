//! Git <-> backend translation
//!
//! The bridge is the only component that calls the external backend and the
//! payload store. It owns the two-way mapping between Git's tree-of-trees
//! commit graph and the backend's flat versioned key space:
//!
//! - **Reconstruct** (read path): every backend commit reachable from a
//!   branch head is rebuilt into a Git commit. Commits the bridge created
//!   from pushes carry mapping metadata and reconstruct byte-exactly;
//!   commits created outside Git are synthesized as parentless snapshots.
//! - **Flatten** (write path): each pushed commit along the first-parent
//!   chain becomes one backend commit. Only paths that differ from the
//!   previous snapshot are staged, and the final commit call carries the
//!   expected-head compare-and-swap guard.
//!
//! Oversize blobs are intercepted on both paths: on push the payload moves
//! to the object store and a pointer is committed in its place; on read,
//! oversize backend entries become pointer blobs without downloading the
//! payload.

use crate::areas::backend::{Backend, BackendEntry, meta};
use crate::areas::object_store::PayloadStore;
use crate::artifacts::negotiation::{
    LayeredSource, ObjectSet, ObjectSource, RefUpdate, closure, is_fast_forward, verify_connected,
};
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::{Author, Commit};
use crate::artifacts::objects::entry_mode::EntryMode;
use crate::artifacts::objects::object::{GitObject, Object, Packable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::{Tree, TreeEntry};
use crate::artifacts::pack::reader::read_pack;
use crate::artifacts::pack::writer::PackWriter;
use crate::errors::{BridgeError, BridgeResult};
use crate::lfs::batch::{self, BatchRequest, BatchResponse, ObjectError, VerifyRequest};
use crate::lfs::pointer::{self, LfsPointer};
use crate::protocol::advertisement::{GitService, ServiceAdvertisement};
use crate::protocol::receive_pack::{self, RefStatus};
use crate::protocol::upload_pack;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Email used for commits synthesized from backend-native commits, which
/// carry a committer name but no address
const SYNTHETIC_EMAIL: &str = "noreply@brig.local";

/// Tuning knobs the bridge needs beyond its two capabilities
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Payloads at or above this size are stored out of band
    pub lfs_threshold: u64,
    /// Public base URL of this server, used in `.lfsconfig` and verify hrefs
    pub public_url: String,
    /// Accept pushes that discard history
    pub allow_force_push: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        BridgeOptions {
            lfs_threshold: 1024 * 1024,
            public_url: "http://localhost:48888".to_string(),
            allow_force_push: false,
        }
    }
}

/// A branch's position in both versioning models
#[derive(Debug, Clone, Default)]
pub struct BranchState {
    pub backend_head: Option<String>,
    pub git_head: Option<ObjectId>,
}

/// Everything reconstructed from the backend for one request
pub struct MaterializedRepo {
    pub default_branch: String,
    /// Advertised (ref name, commit id) pairs, `HEAD` included
    pub refs: Vec<(String, ObjectId)>,
    pub objects: ObjectSet,
    pub branches: HashMap<String, BranchState>,
    /// Git commit id -> backend commit id for every reconstructed commit
    pub commit_map: HashMap<ObjectId, String>,
}

/// One path of a flattened tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    pub oid: ObjectId,
    pub mode: EntryMode,
}

pub struct Bridge {
    backend: Arc<dyn Backend>,
    payloads: Arc<dyn PayloadStore>,
    options: BridgeOptions,
}

impl Bridge {
    pub fn new(
        backend: Arc<dyn Backend>,
        payloads: Arc<dyn PayloadStore>,
        options: BridgeOptions,
    ) -> Self {
        Bridge {
            backend,
            payloads,
            options,
        }
    }

    /// `GET {repo}.git/HEAD`
    pub async fn handle_head(&self, repo: &str) -> BridgeResult<String> {
        let default = self.backend.default_branch(repo).await?;
        Ok(format!("ref: refs/heads/{default}\n"))
    }

    /// `GET {repo}.git/info/refs?service=...`
    pub async fn handle_info_refs(&self, repo: &str, service: GitService) -> BridgeResult<Bytes> {
        let materialized = self.materialize_repo(repo, &HashSet::new()).await?;
        info!(repo, service = %service, refs = materialized.refs.len(), "advertising refs");
        ServiceAdvertisement::new(service, materialized.refs).to_bytes()
    }

    /// `POST {repo}.git/git-upload-pack`: negotiate and stream a pack
    ///
    /// Negotiation failures are reported in-band (the Git convention is an
    /// HTTP 200 carrying an error frame); only framing errors in the request
    /// itself surface as `Err`.
    pub async fn handle_upload_pack(&self, repo: &str, body: &[u8]) -> BridgeResult<Bytes> {
        let request = upload_pack::parse_request(body)?;
        let side_band = request.wants_side_band();

        match self.upload_pack_inner(repo, &request).await {
            Ok(response) => Ok(response),
            Err(error) => {
                warn!(repo, %error, "upload-pack failed");
                upload_pack::build_error(&error.to_string(), side_band)
            }
        }
    }

    async fn upload_pack_inner(
        &self,
        repo: &str,
        request: &upload_pack::UploadPackRequest,
    ) -> BridgeResult<Bytes> {
        if request.wants.is_empty() {
            return upload_pack::build_response(&[], false);
        }

        let haves: HashSet<String> = request
            .haves
            .iter()
            .map(|oid| oid.as_ref().to_string())
            .collect();
        let materialized = self.materialize_repo(repo, &haves).await?;

        let objects = closure(&request.wants, &request.haves, &materialized.objects)?;
        let pack = PackWriter::<Vec<u8>>::pack_objects(&objects)?;
        info!(
            repo,
            wants = request.wants.len(),
            haves = request.haves.len(),
            objects = objects.len(),
            pack_bytes = pack.len(),
            "serving pack"
        );

        upload_pack::build_response(&pack, request.wants_side_band())
    }

    /// `POST {repo}.git/git-receive-pack`: apply a push
    pub async fn handle_receive_pack(&self, repo: &str, body: &[u8]) -> BridgeResult<Bytes> {
        let request = receive_pack::parse_request(body)?;
        let side_band = request.wants_side_band();
        let materialized = self.materialize_repo(repo, &HashSet::new()).await?;

        // Thin packs may delta against objects only the server has
        let incoming = if request.pack.is_empty() {
            Ok(ObjectSet::new())
        } else {
            let known = &materialized.objects;
            read_pack(&request.pack, &|oid: &ObjectId| {
                known
                    .get(oid)
                    .and_then(|object| Some((object.object_type(), object.body().ok()?)))
            })
            .and_then(ObjectSet::from_objects)
        };

        let incoming = match incoming {
            Ok(incoming) => incoming,
            Err(error) => {
                warn!(repo, %error, "rejecting push: pack did not unpack");
                let failure = Err(error.report_token().to_string());
                let statuses: Vec<RefStatus> = request
                    .updates
                    .iter()
                    .map(|update| RefStatus {
                        name: update.name.clone(),
                        result: Err("unpacking failed".to_string()),
                    })
                    .collect();
                return receive_pack::build_report(&failure, &statuses, side_band);
            }
        };

        debug!(
            repo,
            updates = request.updates.len(),
            objects = incoming.len(),
            "processing push"
        );

        let mut statuses = Vec::with_capacity(request.updates.len());
        for update in &request.updates {
            let result = self
                .apply_update(repo, &materialized, &incoming, update)
                .await;
            match &result {
                Ok(()) => info!(repo, reference = %update.name, new = %update.new, "ref updated"),
                Err(error) => {
                    warn!(repo, reference = %update.name, %error, "ref update rejected");
                }
            }
            statuses.push(RefStatus {
                name: update.name.clone(),
                result: result.map_err(|error| error.report_token().to_string()),
            });
        }

        receive_pack::build_report(&Ok(()), &statuses, side_band)
    }

    /// `POST {repo}.git/info/lfs/objects/batch`
    pub async fn handle_lfs_batch(
        &self,
        repo: &str,
        request: &BatchRequest,
    ) -> BridgeResult<BatchResponse> {
        let verify_url = format!("{}/{repo}.git/info/lfs/verify", self.options.public_url);
        debug!(
            repo,
            operation = ?request.operation,
            objects = request.objects.len(),
            "LFS batch"
        );
        batch::process_batch(self.payloads.as_ref(), request, &verify_url).await
    }

    /// `POST {repo}.git/info/lfs/verify`
    pub async fn handle_lfs_verify(
        &self,
        repo: &str,
        request: &VerifyRequest,
    ) -> BridgeResult<Result<(), ObjectError>> {
        debug!(repo, oid = %request.oid, "LFS verify");
        batch::verify_upload(self.payloads.as_ref(), request).await
    }

    // ---- read path: backend -> Git ----

    /// Reconstruct every branch of a repository into Git objects
    ///
    /// `haves` prunes the walk: a reconstructed commit whose id the client
    /// already has is materialized (so shared subtrees subtract from the
    /// closure) but its ancestry is not descended into.
    pub async fn materialize_repo(
        &self,
        repo: &str,
        haves: &HashSet<String>,
    ) -> BridgeResult<MaterializedRepo> {
        let default_branch = self.backend.default_branch(repo).await?;
        let backend_branches = self.backend.list_branches(repo).await?;

        let mut objects = ObjectSet::new();
        let mut commit_map = HashMap::new();
        let mut built: HashMap<String, ObjectId> = HashMap::new();
        let mut blob_cache: HashMap<String, ObjectId> = HashMap::new();
        let mut branches = HashMap::new();
        let mut refs = Vec::new();

        for branch in &backend_branches {
            let git_head = match &branch.head {
                Some(head) => Some(
                    self.materialize_chain(
                        repo,
                        head,
                        haves,
                        &mut objects,
                        &mut built,
                        &mut blob_cache,
                    )
                    .await?,
                ),
                None => None,
            };

            if let Some(oid) = &git_head {
                refs.push((format!("refs/heads/{}", branch.name), oid.clone()));
                if branch.name == default_branch {
                    refs.push(("HEAD".to_string(), oid.clone()));
                }
            }
            branches.insert(
                branch.name.clone(),
                BranchState {
                    backend_head: branch.head.clone(),
                    git_head,
                },
            );
        }

        for (backend_id, git_id) in &built {
            commit_map.insert(git_id.clone(), backend_id.clone());
        }

        Ok(MaterializedRepo {
            default_branch,
            refs,
            objects,
            branches,
            commit_map,
        })
    }

    /// Rebuild the Git commit for `head` and its ancestry, parents first
    async fn materialize_chain(
        &self,
        repo: &str,
        head: &str,
        haves: &HashSet<String>,
        objects: &mut ObjectSet,
        built: &mut HashMap<String, ObjectId>,
        blob_cache: &mut HashMap<String, ObjectId>,
    ) -> BridgeResult<ObjectId> {
        // Depth-first over backend parent edges, then build in reverse so
        // every parent exists before its children reference it
        let mut order = Vec::new();
        let mut stack = vec![head.to_string()];
        let mut seen = HashSet::new();

        while let Some(backend_id) = stack.pop() {
            if built.contains_key(&backend_id) || !seen.insert(backend_id.clone()) {
                continue;
            }
            let info = self.backend.get_commit(repo, &backend_id).await?;

            // Only commits translated from Git have ancestry worth walking;
            // backend-native commits reconstruct as parentless snapshots.
            // A commit the client already has terminates the walk too.
            let descend = info.metadata.contains_key(meta::GIT_COMMIT)
                && !info
                    .metadata
                    .get(meta::GIT_COMMIT)
                    .is_some_and(|sha| haves.contains(sha));
            if descend {
                stack.extend(info.parents.iter().cloned());
            }
            order.push(info);
        }

        for info in order.into_iter().rev() {
            let backend_id = info.id.clone();
            if built.contains_key(&backend_id) {
                continue;
            }

            let exact = info.metadata.contains_key(meta::GIT_COMMIT);
            let modes = parse_recorded_modes(info.metadata.get(meta::GIT_MODES))?;
            let entries = self.backend.list_entries(repo, &backend_id).await?;
            let flat = self
                .build_snapshot_blobs(repo, &backend_id, &entries, &modes, !exact, objects, blob_cache)
                .await?;
            let tree_oid = build_nested_trees(&flat, objects)?;

            let commit = if exact {
                recorded_commit(&info.metadata, &tree_oid)?
            } else {
                let author = Author::new_with_timestamp(
                    if info.committer.is_empty() {
                        "unknown".to_string()
                    } else {
                        info.committer.clone()
                    },
                    SYNTHETIC_EMAIL.to_string(),
                    info.created_at.fixed_offset(),
                );
                Commit::new(vec![], tree_oid, author.clone(), author, info.message.clone())
            };

            let git_id = objects.insert(GitObject::Commit(commit))?;
            if exact
                && let Some(recorded) = info.metadata.get(meta::GIT_COMMIT)
                && git_id.as_ref() != recorded.as_str()
            {
                return Err(BridgeError::Translation(format!(
                    "backend commit {backend_id} reconstructed as {git_id}, recorded as {recorded}"
                )));
            }

            built.insert(backend_id, git_id);
        }

        built.get(head).cloned().ok_or_else(|| {
            BridgeError::Translation(format!("backend commit {head} was not reconstructed"))
        })
    }

    /// Build the blob layer for one backend snapshot
    ///
    /// Entries at or above the LFS threshold become pointer blobs from stat
    /// metadata, without downloading the payload. `inject` adds the
    /// generated `.gitattributes`/`.lfsconfig` pair for backend-native
    /// commits that track oversize payloads but never saw a Git push.
    #[allow(clippy::too_many_arguments)]
    async fn build_snapshot_blobs(
        &self,
        repo: &str,
        reference: &str,
        entries: &[BackendEntry],
        modes: &BTreeMap<String, EntryMode>,
        inject: bool,
        objects: &mut ObjectSet,
        blob_cache: &mut HashMap<String, ObjectId>,
    ) -> BridgeResult<BTreeMap<String, FlatEntry>> {
        let mut flat = BTreeMap::new();
        let mut lfs_paths = Vec::new();

        for entry in entries {
            let mode = modes.get(&entry.path).copied().unwrap_or_default();

            let cache_key = if entry.checksum.is_empty() {
                format!("{reference}:{}", entry.path)
            } else {
                entry.checksum.clone()
            };
            if let Some(oid) = blob_cache.get(&cache_key) {
                if entry.size_bytes >= self.options.lfs_threshold || is_cached_pointer(objects, oid)
                {
                    lfs_paths.push(entry.path.clone());
                }
                flat.insert(entry.path.clone(), FlatEntry { oid: oid.clone(), mode });
                continue;
            }

            // Entries small enough to be pointer files are sniffed first, so
            // a stored pointer is never wrapped in another pointer
            let sniffed = if entry.size_bytes <= pointer::MAX_POINTER_SIZE as u64 {
                Some(self.backend.get_entry(repo, reference, &entry.path).await?)
            } else {
                None
            };

            let content = match sniffed {
                Some(content) if pointer::is_pointer(&content) => {
                    lfs_paths.push(entry.path.clone());
                    content
                }
                _ if entry.size_bytes >= self.options.lfs_threshold => {
                    // Oversize: represent by a pointer built from stat
                    // metadata, without downloading the payload
                    let digest = match entry.checksum.strip_prefix("sha256:") {
                        Some(digest) => digest.to_string(),
                        None => {
                            // Backend does not expose the digest: last resort
                            let payload =
                                self.backend.get_entry(repo, reference, &entry.path).await?;
                            pointer::payload_digest(&payload)
                        }
                    };
                    lfs_paths.push(entry.path.clone());
                    LfsPointer::new(digest, entry.size_bytes).to_bytes()
                }
                Some(content) => content,
                None => self.backend.get_entry(repo, reference, &entry.path).await?,
            };

            let oid = objects.insert(GitObject::Blob(Blob::new(content)))?;
            blob_cache.insert(cache_key, oid.clone());
            flat.insert(entry.path.clone(), FlatEntry { oid, mode });
        }

        if inject && !lfs_paths.is_empty() {
            if !flat.contains_key(".gitattributes") {
                let oid = objects.insert(GitObject::Blob(Blob::new(generate_gitattributes(
                    &lfs_paths,
                ))))?;
                flat.insert(
                    ".gitattributes".to_string(),
                    FlatEntry {
                        oid,
                        mode: EntryMode::Regular,
                    },
                );
            }
            if !flat.contains_key(".lfsconfig") {
                let oid = objects.insert(GitObject::Blob(Blob::new(generate_lfsconfig(
                    &self.options.public_url,
                    repo,
                ))))?;
                flat.insert(
                    ".lfsconfig".to_string(),
                    FlatEntry {
                        oid,
                        mode: EntryMode::Regular,
                    },
                );
            }
        }

        Ok(flat)
    }

    // ---- write path: Git -> backend ----

    /// Apply one ref update command from a push
    async fn apply_update(
        &self,
        repo: &str,
        known: &MaterializedRepo,
        incoming: &ObjectSet,
        update: &RefUpdate,
    ) -> BridgeResult<()> {
        let Some(branch) = update.name.strip_prefix("refs/heads/") else {
            return Err(BridgeError::Translation(format!(
                "only branch refs can be pushed, not {}",
                update.name
            )));
        };
        let state = known.branches.get(branch);

        // Compare-and-swap precondition against the advertised ref value
        let current_git = state.and_then(|state| state.git_head.clone());
        match (&current_git, update.old.is_zero()) {
            (Some(current), false) if current == &update.old => {}
            (None, true) => {}
            (current, _) => {
                return Err(BridgeError::Conflict {
                    reference: update.name.clone(),
                    expected: update.old.to_string(),
                    actual: current
                        .as_ref()
                        .map(|oid| oid.to_string())
                        .unwrap_or_else(|| "<none>".to_string()),
                });
            }
        }

        if update.is_delete() {
            if branch == known.default_branch {
                return Err(BridgeError::Translation(
                    "the default branch cannot be deleted".to_string(),
                ));
            }
            if state.is_none() {
                return Err(BridgeError::UnknownObject(update.old.clone()));
            }
            return self.backend.delete_branch(repo, branch).await;
        }

        // Every object reachable from the new tip must be in the pack or
        // already known; checked before any backend mutation
        verify_connected(&update.new, incoming, &known.objects)?;

        let chain = collect_first_parent_chain(update, incoming, known)?;
        if !update.old.is_zero()
            && chain.base.as_ref() != Some(&update.old)
            && !self.options.allow_force_push
        {
            // Distinguish a merge whose sides are swapped from plain
            // history loss: both are rejected, with different reports
            if is_fast_forward(&update.old, &update.new, incoming, &known.objects) {
                return Err(BridgeError::Translation(format!(
                    "merge pushes must carry the current head {} as their first parent",
                    update.old
                )));
            }
            return Err(BridgeError::Conflict {
                reference: update.name.clone(),
                expected: update.old.to_string(),
                actual: current_git
                    .map(|oid| oid.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
            });
        }

        // A branch that does not exist yet is created from the backend
        // commit backing the chain's base, sharing its snapshot. The first
        // diff base is whatever snapshot the branch holds after this step.
        let (mut expected_head, base_head) = match state {
            Some(state) => (state.backend_head.clone(), state.git_head.clone()),
            None => {
                let source_git = chain
                    .base
                    .as_ref()
                    .filter(|base| known.commit_map.contains_key(*base))
                    .cloned();
                let source_backend = source_git
                    .as_ref()
                    .and_then(|git| known.commit_map.get(git))
                    .cloned();
                self.backend
                    .create_branch(repo, branch, source_backend.as_deref())
                    .await?;
                (source_backend, source_git)
            }
        };

        let layered = LayeredSource {
            upper: incoming,
            lower: &known.objects,
        };
        let mut previous_flat = match &base_head {
            Some(head) => {
                let commit = known
                    .objects
                    .get(head)
                    .and_then(GitObject::as_commit)
                    .ok_or_else(|| BridgeError::UnknownObject(head.clone()))?;
                flatten_tree(commit.tree_oid(), &known.objects)?
            }
            None => BTreeMap::new(),
        };

        // Ids change when a pointer is substituted; children must then
        // reference the rewritten parent
        let mut rewritten: HashMap<ObjectId, ObjectId> = HashMap::new();

        for commit in &chain.commits {
            let original_id = commit.object_id().map_err(BridgeError::Backend)?;
            let translated = self
                .translate_commit(commit, &layered, &rewritten)
                .await?;

            let staged = stage_snapshot_diff(
                self.backend.as_ref(),
                repo,
                branch,
                &previous_flat,
                &translated,
            )
            .await?;
            debug!(
                repo,
                branch,
                commit = %translated.id,
                staged,
                removed = previous_flat
                    .keys()
                    .filter(|path| !translated.flat.contains_key(*path))
                    .count(),
                "staged snapshot diff"
            );

            let info = self
                .backend
                .commit(
                    repo,
                    branch,
                    commit.message(),
                    translated.metadata.clone(),
                    expected_head.as_deref(),
                )
                .await?;

            if translated.id != original_id {
                rewritten.insert(original_id, translated.id.clone());
            }
            expected_head = Some(info.id);
            previous_flat = translated.flat;
        }

        Ok(())
    }

    /// Turn one pushed commit into backend-ready form: substitute pointers
    /// for oversize blobs, rebuild the tree, and record mapping metadata
    async fn translate_commit(
        &self,
        commit: &Commit,
        source: &(dyn ObjectSource + Sync),
        rewritten: &HashMap<ObjectId, ObjectId>,
    ) -> BridgeResult<TranslatedCommit> {
        let flat = flatten_tree(commit.tree_oid(), source)?;

        let mut scratch = ObjectSet::new();
        let mut final_flat = BTreeMap::new();
        let mut contents = HashMap::new();
        let mut modes = BTreeMap::new();

        for (path, entry) in &flat {
            let blob = source
                .get(&entry.oid)
                .and_then(GitObject::as_blob)
                .ok_or_else(|| BridgeError::UnknownObject(entry.oid.clone()))?;
            let mut content = blob.content().clone();

            if content.len() as u64 >= self.options.lfs_threshold && !pointer::is_pointer(&content)
            {
                // Payload goes to the object store; the pointer is what the
                // backend (and the committed tree) actually carries
                let substituted = LfsPointer::for_payload(&content);
                info!(
                    path,
                    size = content.len(),
                    oid = %substituted.oid(),
                    "substituting LFS pointer for oversize blob"
                );
                self.payloads.put(substituted.oid(), content).await?;
                content = substituted.to_bytes();
            }

            let oid = scratch.insert(GitObject::Blob(Blob::new(content.clone())))?;
            if entry.mode != EntryMode::Regular {
                modes.insert(path.clone(), entry.mode);
            }
            contents.insert(path.clone(), content);
            final_flat.insert(
                path.clone(),
                FlatEntry {
                    oid,
                    mode: entry.mode,
                },
            );
        }

        let tree_oid = build_nested_trees(&final_flat, &mut scratch)?;
        let parents = commit
            .parents()
            .iter()
            .map(|parent| rewritten.get(parent).unwrap_or(parent).clone())
            .collect();
        let final_commit = Commit::new(
            parents,
            tree_oid.clone(),
            commit.author().clone(),
            commit.committer().clone(),
            commit.message().to_string(),
        )
        .with_extra_headers(commit.extra_headers().to_vec());
        let id = final_commit.object_id().map_err(BridgeError::Backend)?;

        let mut metadata = BTreeMap::new();
        metadata.insert(meta::GIT_COMMIT.to_string(), id.to_string());
        metadata.insert(meta::GIT_TREE.to_string(), tree_oid.to_string());
        if !final_commit.parents().is_empty() {
            metadata.insert(
                meta::GIT_PARENTS.to_string(),
                final_commit
                    .parents()
                    .iter()
                    .map(|oid| oid.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }
        metadata.insert(
            meta::GIT_AUTHOR.to_string(),
            final_commit.author().display(),
        );
        metadata.insert(
            meta::GIT_COMMITTER.to_string(),
            final_commit.committer().display(),
        );
        metadata.insert(
            meta::GIT_MESSAGE.to_string(),
            final_commit.message().to_string(),
        );
        if !modes.is_empty() {
            let spelled: BTreeMap<&String, &str> = modes
                .iter()
                .map(|(path, mode)| (path, mode.as_str()))
                .collect();
            metadata.insert(
                meta::GIT_MODES.to_string(),
                serde_json::to_string(&spelled).map_err(|e| BridgeError::Backend(e.into()))?,
            );
        }
        if !final_commit.extra_headers().is_empty() {
            metadata.insert(
                meta::GIT_HEADERS.to_string(),
                final_commit.extra_headers().join("\n"),
            );
        }

        Ok(TranslatedCommit {
            id,
            flat: final_flat,
            contents,
            metadata,
        })
    }
}

/// A pushed commit after pointer substitution and tree rebuild
struct TranslatedCommit {
    id: ObjectId,
    flat: BTreeMap<String, FlatEntry>,
    contents: HashMap<String, Bytes>,
    metadata: BTreeMap<String, String>,
}

/// The pushed commits between the ref's old value and its new tip, oldest
/// first, plus the base commit the chain grew from (`None` for a root)
struct FirstParentChain {
    commits: Vec<Commit>,
    base: Option<ObjectId>,
}

fn collect_first_parent_chain(
    update: &RefUpdate,
    incoming: &ObjectSet,
    known: &MaterializedRepo,
) -> BridgeResult<FirstParentChain> {
    let mut commits = Vec::new();
    let mut cursor = update.new.clone();

    let base = loop {
        if !update.old.is_zero() && cursor == update.old {
            break Some(cursor);
        }
        match incoming.get(&cursor) {
            Some(object) => {
                let commit = object.as_commit().ok_or_else(|| {
                    BridgeError::Translation(format!("{cursor} is not a commit"))
                })?;
                commits.push(commit.clone());
                match commit.first_parent() {
                    Some(parent) => cursor = parent.clone(),
                    None => break None,
                }
            }
            // Shared history: the chain ends on a commit the server knows
            None if known.objects.contains(&cursor) => break Some(cursor),
            None => return Err(BridgeError::UnknownObject(cursor)),
        }
    };

    commits.reverse();
    Ok(FirstParentChain { commits, base })
}

/// Stage only the paths that differ from the previous snapshot, returning
/// how many were staged
async fn stage_snapshot_diff(
    backend: &dyn Backend,
    repo: &str,
    branch: &str,
    previous: &BTreeMap<String, FlatEntry>,
    translated: &TranslatedCommit,
) -> BridgeResult<usize> {
    let mut staged = 0;

    for (path, entry) in &translated.flat {
        if previous.get(path).map(|prev| &prev.oid) == Some(&entry.oid) {
            continue;
        }
        let content = translated
            .contents
            .get(path)
            .cloned()
            .ok_or_else(|| BridgeError::Translation(format!("no content for {path}")))?;
        backend.stage_entry(repo, branch, path, content).await?;
        staged += 1;
    }

    for path in previous.keys() {
        if !translated.flat.contains_key(path) {
            backend.delete_entry(repo, branch, path).await?;
        }
    }

    Ok(staged)
}

// ---- flatten / reconstruct ----

/// Flatten a tree graph into (path -> blob) entries
///
/// Gitlink entries cannot be represented in the backend's key space and
/// fail with a translation error.
pub fn flatten_tree(
    root: &ObjectId,
    source: &(dyn ObjectSource + Sync),
) -> BridgeResult<BTreeMap<String, FlatEntry>> {
    let mut flat = BTreeMap::new();
    let mut stack = vec![(String::new(), root.clone())];

    while let Some((prefix, tree_oid)) = stack.pop() {
        let tree = source
            .get(&tree_oid)
            .and_then(GitObject::as_tree)
            .ok_or_else(|| BridgeError::UnknownObject(tree_oid.clone()))?;

        for (name, entry) in tree.entries() {
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            };
            match entry.mode {
                EntryMode::Directory => stack.push((path, entry.oid.clone())),
                EntryMode::Gitlink => {
                    return Err(BridgeError::Translation(format!(
                        "submodule at {path} cannot be stored"
                    )));
                }
                mode => {
                    flat.insert(
                        path,
                        FlatEntry {
                            oid: entry.oid.clone(),
                            mode,
                        },
                    );
                }
            }
        }
    }

    Ok(flat)
}

/// Rebuild the tree graph for a flattened path set, inserting every tree
/// into `out` and returning the root id
///
/// The same path set always yields byte-identical trees: entries are sorted
/// by the tree's own ordering rule and shared subtrees deduplicate through
/// content addressing.
pub fn build_nested_trees(
    flat: &BTreeMap<String, FlatEntry>,
    out: &mut ObjectSet,
) -> BridgeResult<ObjectId> {
    let entries: Vec<(&str, &FlatEntry)> = flat
        .iter()
        .map(|(path, entry)| (path.as_str(), entry))
        .collect();
    build_tree_level(&entries, out)
}

fn build_tree_level(
    entries: &[(&str, &FlatEntry)],
    out: &mut ObjectSet,
) -> BridgeResult<ObjectId> {
    let mut tree = Tree::new();
    let mut subdirs: BTreeMap<&str, Vec<(&str, &FlatEntry)>> = BTreeMap::new();

    for (path, entry) in entries {
        match path.split_once('/') {
            Some((dir, rest)) => {
                if dir.is_empty() || rest.is_empty() {
                    return Err(BridgeError::Translation(format!(
                        "malformed path {path:?}"
                    )));
                }
                subdirs.entry(dir).or_default().push((rest, entry));
            }
            None => {
                if path.is_empty() {
                    return Err(BridgeError::Translation("empty path".to_string()));
                }
                tree.insert(path, TreeEntry::new(entry.mode, entry.oid.clone()));
            }
        }
    }

    for (dir, children) in subdirs {
        if tree.get(dir).is_some() {
            return Err(BridgeError::Translation(format!(
                "{dir} is both a file and a directory"
            )));
        }
        let child_oid = build_tree_level(&children, out)?;
        tree.insert(dir, TreeEntry::new(EntryMode::Directory, child_oid));
    }

    out.insert(GitObject::Tree(tree))
}

// ---- helpers ----

fn is_cached_pointer(objects: &ObjectSet, oid: &ObjectId) -> bool {
    objects
        .get(oid)
        .and_then(GitObject::as_blob)
        .is_some_and(|blob| pointer::is_pointer(blob.content()))
}

fn parse_recorded_modes(
    recorded: Option<&String>,
) -> BridgeResult<BTreeMap<String, EntryMode>> {
    let Some(recorded) = recorded else {
        return Ok(BTreeMap::new());
    };
    let spelled: BTreeMap<String, String> = serde_json::from_str(recorded)
        .map_err(|e| BridgeError::Translation(format!("unreadable mode record: {e}")))?;

    spelled
        .into_iter()
        .map(|(path, mode)| {
            EntryMode::from_octal_str(&mode)
                .map(|mode| (path, mode))
                .map_err(|e| BridgeError::Translation(e.to_string()))
        })
        .collect()
}

/// Rebuild a commit from the mapping metadata recorded at push time
fn recorded_commit(
    metadata: &BTreeMap<String, String>,
    tree_oid: &ObjectId,
) -> BridgeResult<Commit> {
    let recorded_tree = metadata
        .get(meta::GIT_TREE)
        .ok_or_else(|| BridgeError::Translation("commit record lacks a tree sha".to_string()))?;
    if tree_oid.as_ref() != recorded_tree {
        return Err(BridgeError::Translation(format!(
            "snapshot rebuilt to tree {tree_oid}, recorded as {recorded_tree}"
        )));
    }

    let parents = metadata
        .get(meta::GIT_PARENTS)
        .map(|parents| {
            parents
                .split(' ')
                .filter(|sha| !sha.is_empty())
                .map(|sha| ObjectId::try_parse(sha.to_string()))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .transpose()
        .map_err(|e| BridgeError::Translation(e.to_string()))?
        .unwrap_or_default();

    let author = metadata
        .get(meta::GIT_AUTHOR)
        .map(|line| Author::try_from(line.as_str()))
        .transpose()
        .map_err(|e| BridgeError::Translation(e.to_string()))?
        .ok_or_else(|| BridgeError::Translation("commit record lacks an author".to_string()))?;
    let committer = metadata
        .get(meta::GIT_COMMITTER)
        .map(|line| Author::try_from(line.as_str()))
        .transpose()
        .map_err(|e| BridgeError::Translation(e.to_string()))?
        .unwrap_or_else(|| author.clone());
    let message = metadata
        .get(meta::GIT_MESSAGE)
        .cloned()
        .unwrap_or_default();
    let extra_headers = metadata
        .get(meta::GIT_HEADERS)
        .map(|headers| headers.split('\n').map(String::from).collect())
        .unwrap_or_default();

    Ok(
        Commit::new(parents, tree_oid.clone(), author, committer, message)
            .with_extra_headers(extra_headers),
    )
}

fn generate_gitattributes(lfs_paths: &[String]) -> Bytes {
    let mut sorted: Vec<&String> = lfs_paths.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut out = String::from("# Git LFS tracking\n");
    for path in sorted {
        out.push_str(&format!("{path} filter=lfs diff=lfs merge=lfs -text\n"));
    }
    Bytes::from(out)
}

fn generate_lfsconfig(public_url: &str, repo: &str) -> Bytes {
    Bytes::from(format!(
        "[lfs]\n\turl = {public_url}/{repo}.git/info/lfs\n"
    ))
}
