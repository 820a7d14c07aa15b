//! Transfer negotiation
//!
//! For fetch: compute `closure(wants) \ reachable(haves)`, the minimal set
//! of objects the client is missing, by walking commit-parent and
//! tree-child edges with a visited set (content addressing makes duplicate
//! reachability common; every object is emitted at most once).
//!
//! For push: validate that the incoming pack plus the objects the server
//! already knows form a connected graph under each new tip, and that every
//! ref update satisfies its compare-and-swap precondition and the
//! fast-forward policy.

use crate::artifacts::objects::object::GitObject;
use crate::artifacts::objects::object::Object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{BridgeError, BridgeResult};
use std::collections::{HashMap, HashSet, VecDeque};

/// Read-only object lookup capability
///
/// Implemented by [`ObjectSet`] for materialized in-memory graphs; the
/// bridge injects one per request, which keeps the engine testable without
/// a running backend.
pub trait ObjectSource {
    fn get(&self, oid: &ObjectId) -> Option<&GitObject>;

    fn contains(&self, oid: &ObjectId) -> bool {
        self.get(oid).is_some()
    }
}

/// Id-indexed collection of materialized objects
///
/// Inserting the same content twice is a no-op: objects are
/// content-addressed, so deduplication is automatic.
#[derive(Debug, Clone, Default)]
pub struct ObjectSet {
    objects: HashMap<ObjectId, GitObject>,
}

impl ObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_objects(objects: impl IntoIterator<Item = GitObject>) -> BridgeResult<Self> {
        let mut set = Self::new();
        for object in objects {
            set.insert(object)?;
        }
        Ok(set)
    }

    /// Insert an object, returning its id
    pub fn insert(&mut self, object: GitObject) -> BridgeResult<ObjectId> {
        let oid = object.object_id().map_err(BridgeError::Backend)?;
        self.objects.entry(oid.clone()).or_insert(object);
        Ok(oid)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.objects.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &GitObject)> {
        self.objects.iter()
    }
}

impl ObjectSource for ObjectSet {
    fn get(&self, oid: &ObjectId) -> Option<&GitObject> {
        self.objects.get(oid)
    }
}

/// Two sources layered: the first shadows the second
pub struct LayeredSource<'a> {
    pub upper: &'a (dyn ObjectSource + Sync),
    pub lower: &'a (dyn ObjectSource + Sync),
}

impl ObjectSource for LayeredSource<'_> {
    fn get(&self, oid: &ObjectId) -> Option<&GitObject> {
        self.upper.get(oid).or_else(|| self.lower.get(oid))
    }
}

/// Ids an object directly references
///
/// Commits reach their tree and parents, trees their children (gitlink
/// entries point outside the repository and are not followed), tags their
/// target; blobs are leaves.
fn referenced_ids(object: &GitObject) -> Vec<ObjectId> {
    match object {
        GitObject::Commit(commit) => {
            let mut ids = vec![commit.tree_oid().clone()];
            ids.extend(commit.parents().iter().cloned());
            ids
        }
        GitObject::Tree(tree) => tree
            .entries()
            .filter(|(_, entry)| entry.mode != crate::artifacts::objects::entry_mode::EntryMode::Gitlink)
            .map(|(_, entry)| entry.oid.clone())
            .collect(),
        GitObject::Tag(tag) => vec![tag.target().clone()],
        GitObject::Blob(_) => vec![],
    }
}

/// Mark everything reachable from `start` within `source`
///
/// Ids absent from the source are boundary points and are simply skipped;
/// the haves side of a negotiation routinely references history the server
/// never materialized.
fn mark_reachable(start: &[ObjectId], source: &(dyn ObjectSource + Sync), visited: &mut HashSet<ObjectId>) {
    let mut queue: VecDeque<ObjectId> = start.iter().cloned().collect();

    while let Some(oid) = queue.pop_front() {
        if !visited.insert(oid.clone()) {
            continue;
        }
        if let Some(object) = source.get(&oid) {
            queue.extend(referenced_ids(object));
        }
    }
}

/// Compute `closure(wants) \ reachable(haves)` in emission order:
/// commits first, then trees, then blobs and tags
///
/// A want that the source cannot resolve is a fatal [`BridgeError::UnknownObject`],
/// reported before any bytes are sent. Unknown haves are ignored per
/// protocol convention.
pub fn closure(
    wants: &[ObjectId],
    haves: &[ObjectId],
    source: &(dyn ObjectSource + Sync),
) -> BridgeResult<Vec<GitObject>> {
    for want in wants {
        if !source.contains(want) {
            return Err(BridgeError::UnknownObject(want.clone()));
        }
    }

    let mut excluded = HashSet::new();
    mark_reachable(haves, source, &mut excluded);

    let mut visited = excluded.clone();
    let mut commits = Vec::new();
    let mut trees = Vec::new();
    let mut leaves = Vec::new();

    let mut queue: VecDeque<ObjectId> = wants.iter().cloned().collect();
    while let Some(oid) = queue.pop_front() {
        if !visited.insert(oid.clone()) {
            continue;
        }

        // Unreachable ids below a want are boundary points (e.g. parents of
        // the oldest materialized commit); only the wants themselves are
        // required to resolve
        let Some(object) = source.get(&oid) else {
            continue;
        };

        queue.extend(referenced_ids(object));

        match object {
            GitObject::Commit(_) => commits.push(object.clone()),
            GitObject::Tree(_) => trees.push(object.clone()),
            GitObject::Blob(_) | GitObject::Tag(_) => leaves.push(object.clone()),
        }
    }

    let mut ordered = commits;
    ordered.extend(trees);
    ordered.extend(leaves);
    Ok(ordered)
}

/// A single ref update command from a push: old id, new id, ref name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old: ObjectId,
    pub new: ObjectId,
    pub name: String,
}

impl RefUpdate {
    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }

    pub fn is_create(&self) -> bool {
        self.old.is_zero()
    }
}

/// Verify that the graph under `tip` is fully present
///
/// Walks only through *incoming* objects: anything resolved from `known`
/// is already on the server and is not expanded further. A reference that
/// neither side can resolve fails the push with [`BridgeError::UnknownObject`].
pub fn verify_connected(
    tip: &ObjectId,
    incoming: &ObjectSet,
    known: &(dyn ObjectSource + Sync),
) -> BridgeResult<()> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([tip.clone()]);

    while let Some(oid) = queue.pop_front() {
        if !visited.insert(oid.clone()) {
            continue;
        }

        if let Some(object) = incoming.get(&oid) {
            queue.extend(referenced_ids(object));
        } else if !known.contains(&oid) {
            return Err(BridgeError::UnknownObject(oid));
        }
    }

    Ok(())
}

/// Whether `old` is an ancestor of `new` within the available objects
///
/// Walks every parent edge (not only the first) so a merge that absorbs
/// the old tip still counts as a fast-forward.
pub fn is_fast_forward(
    old: &ObjectId,
    new: &ObjectId,
    incoming: &ObjectSet,
    known: &(dyn ObjectSource + Sync),
) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([new.clone()]);

    while let Some(oid) = queue.pop_front() {
        if &oid == old {
            return true;
        }
        if !visited.insert(oid.clone()) {
            continue;
        }

        let commit = incoming
            .get(&oid)
            .or_else(|| known.get(&oid))
            .and_then(|object| object.as_commit());
        if let Some(commit) = commit {
            queue.extend(commit.parents().iter().cloned());
        }
    }

    false
}
