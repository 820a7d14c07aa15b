#![allow(dead_code)]

//! Shared fixtures: an in-memory bridge, Git object builders, and wire
//! message assembly/parsing helpers for driving the protocol end to end.

pub use brig::areas::backend::Backend;
pub use brig::areas::object_store::PayloadStore;

use brig::areas::bridge::{Bridge, BridgeOptions, FlatEntry, build_nested_trees};
use brig::areas::memory_backend::{MemoryBackend, MemoryPayloadStore};
use brig::artifacts::negotiation::ObjectSet;
use brig::artifacts::objects::blob::Blob;
use brig::artifacts::objects::commit::{Author, Commit};
use brig::artifacts::objects::entry_mode::EntryMode;
use brig::artifacts::objects::object::GitObject;
use brig::artifacts::objects::object_id::{ObjectId, ZERO_OID};
use brig::artifacts::pack::writer::PackWriter;
use brig::protocol::pkt_line::{self, Frame};
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const REPO: &str = "models/demo";
pub const PUBLIC_URL: &str = "http://hub.invalid";

pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub payloads: Arc<MemoryPayloadStore>,
    pub bridge: Bridge,
}

pub async fn fixture() -> Fixture {
    fixture_with(BridgeOptions {
        public_url: PUBLIC_URL.to_string(),
        ..BridgeOptions::default()
    })
    .await
}

pub async fn fixture_with(options: BridgeOptions) -> Fixture {
    let backend = Arc::new(MemoryBackend::new());
    backend.create_repo(REPO, "main").await;
    let payloads = Arc::new(MemoryPayloadStore::new());
    let bridge = Bridge::new(backend.clone(), payloads.clone(), options);

    Fixture {
        backend,
        payloads,
        bridge,
    }
}

/// Commit files straight into the backend, the way the surrounding system
/// writes outside of Git
pub async fn seed_backend_commit(
    backend: &MemoryBackend,
    branch: &str,
    files: &[(&str, &[u8])],
    message: &str,
) -> String {
    if backend.get_branch(REPO, branch).await.unwrap().is_none() {
        backend.create_branch(REPO, branch, None).await.unwrap();
    }
    for (path, content) in files {
        backend
            .stage_entry(REPO, branch, path, Bytes::copy_from_slice(content))
            .await
            .unwrap();
    }
    let head = backend
        .get_branch(REPO, branch)
        .await
        .unwrap()
        .and_then(|branch| branch.head);
    backend
        .commit(REPO, branch, message, BTreeMap::new(), head.as_deref())
        .await
        .unwrap()
        .id
}

pub fn author() -> Author {
    Author::from_unix_timestamp(
        "Ada Lovelace".to_string(),
        "ada@example.com".to_string(),
        1_700_000_000,
    )
    .unwrap()
}

/// Build a commit whose tree holds exactly `files`, plus all of its objects
pub fn build_commit(
    files: &[(&str, &[u8])],
    parents: Vec<ObjectId>,
    message: &str,
) -> (ObjectId, ObjectSet) {
    let mut set = ObjectSet::new();
    let mut flat = BTreeMap::new();

    for (path, content) in files {
        let oid = set
            .insert(GitObject::Blob(Blob::new(Bytes::copy_from_slice(content))))
            .unwrap();
        flat.insert(
            path.to_string(),
            FlatEntry {
                oid,
                mode: EntryMode::Regular,
            },
        );
    }
    let tree = build_nested_trees(&flat, &mut set).unwrap();

    let commit = Commit::new(parents, tree, author(), author(), message.to_string());
    let oid = set.insert(GitObject::Commit(commit)).unwrap();
    (oid, set)
}

pub fn pack_of(set: &ObjectSet) -> Bytes {
    let objects: Vec<GitObject> = set.iter().map(|(_, object)| object.clone()).collect();
    PackWriter::<Vec<u8>>::pack_objects(&objects).unwrap()
}

/// Assemble a `git-receive-pack` request body
pub fn receive_pack_body(updates: &[(&ObjectId, &ObjectId, &str)], pack: &[u8]) -> Bytes {
    let mut body = BytesMut::new();

    for (index, (old, new, name)) in updates.iter().enumerate() {
        let line = if index == 0 {
            format!("{old} {new} {name}\0report-status\n")
        } else {
            format!("{old} {new} {name}\n")
        };
        body.extend_from_slice(&pkt_line::encode_str(&line).unwrap());
    }
    body.extend_from_slice(&pkt_line::flush());
    body.extend_from_slice(pack);
    body.freeze()
}

/// Assemble a `git-upload-pack` request body
pub fn upload_pack_body(wants: &[&ObjectId], haves: &[&ObjectId]) -> Bytes {
    let mut body = BytesMut::new();

    for want in wants {
        body.extend_from_slice(&pkt_line::encode_str(&format!("want {want}\n")).unwrap());
    }
    body.extend_from_slice(&pkt_line::flush());
    for have in haves {
        body.extend_from_slice(&pkt_line::encode_str(&format!("have {have}\n")).unwrap());
    }
    body.extend_from_slice(&pkt_line::encode_str("done\n").unwrap());
    body.freeze()
}

pub fn zero_oid() -> ObjectId {
    ObjectId::zero()
}

/// Ref name -> commit id pairs out of an `info/refs` advertisement
pub fn parse_advertised_refs(stream: &[u8]) -> HashMap<String, ObjectId> {
    let mut refs = HashMap::new();

    for frame in pkt_line::decode_all(stream).unwrap() {
        let Frame::Data(data) = frame else { continue };
        let text = String::from_utf8_lossy(&data);
        if text.starts_with("# service=") || text.starts_with(ZERO_OID) {
            continue;
        }

        let line = text.trim_end_matches('\n');
        let (oid, rest) = line.split_at(40);
        let name = rest
            .trim_start_matches(' ')
            .split('\0')
            .next()
            .unwrap()
            .to_string();
        refs.insert(name, ObjectId::try_parse(oid.to_string()).unwrap());
    }

    refs
}

/// Pull the raw pack back out of an upload-pack response (banded or not)
pub fn extract_pack(response: &[u8]) -> Vec<u8> {
    assert!(response.starts_with(b"0008NAK\n"), "response must open with NAK");
    let rest = &response[8..];

    if rest.starts_with(b"PACK") {
        return rest.to_vec();
    }

    let mut pack = Vec::new();
    for frame in pkt_line::decode_all(rest).unwrap() {
        if let Frame::Data(data) = frame
            && data.first() == Some(&1)
        {
            pack.extend_from_slice(&data[1..]);
        }
    }
    pack
}

/// Status lines of a receive-pack report
pub fn parse_report(response: &[u8]) -> Vec<String> {
    pkt_line::decode_all(response)
        .unwrap()
        .into_iter()
        .filter_map(|frame| match frame {
            Frame::Data(data) => Some(
                String::from_utf8_lossy(&data)
                    .trim_end_matches('\n')
                    .to_string(),
            ),
            _ => None,
        })
        .collect()
}
