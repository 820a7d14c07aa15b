//! Git tree object
//!
//! Trees represent directory snapshots. They contain entries for files
//! (blobs) and subdirectories (other trees), along with their names and
//! modes.
//!
//! ## Format
//!
//! On the wire: `tree <size>\0<entries>`
//! Each entry: `<mode> <name>\0<20-byte-sha1>`
//!
//! ## Ordering
//!
//! Entries are emitted sorted by raw name bytes, with directory names
//! compared as if they carried a trailing `/`. Serialization must reproduce
//! this ordering exactly regardless of insertion order; it is what makes
//! tree hashes stable across implementations.

use crate::artifacts::objects::entry_mode::EntryMode;
use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object::{Object, Packable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use bytes::Bytes;
use derive_new::new;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};

/// A single tree entry: mode plus the id of the referenced object
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub oid: ObjectId,
}

impl TreeEntry {
    pub fn is_tree(&self) -> bool {
        self.mode.is_tree()
    }
}

/// Git tree object representing one directory level
///
/// Entries are keyed by name with a trailing `/` appended for directories,
/// which makes the `BTreeMap` iteration order match Git's tree ordering
/// rule without a custom comparator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tree {
    entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; insertion order never affects the serialized form
    pub fn insert(&mut self, name: &str, entry: TreeEntry) {
        self.entries.insert(Self::sort_key(name, &entry), entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate entries in Git order, names without the internal `/` suffix
    pub fn entries(&self) -> impl Iterator<Item = (&str, &TreeEntry)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.trim_end_matches('/'), entry))
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .get(name)
            .or_else(|| self.entries.get(&format!("{}/", name)))
    }

    fn sort_key(name: &str, entry: &TreeEntry) -> String {
        if entry.is_tree() {
            format!("{}/", name)
        } else {
            name.to_string()
        }
    }
}

impl Packable for Tree {
    fn body(&self) -> anyhow::Result<Bytes> {
        let mut content_bytes = Vec::new();

        for (name, entry) in self.entries() {
            let header = format!("{} {}", entry.mode.as_str(), name);
            content_bytes.write_all(header.as_bytes())?;
            content_bytes.push(0);
            entry.oid.write_raw_to(&mut content_bytes)?;
        }

        Ok(Bytes::from(content_bytes))
    }
}

impl Unpackable for Tree {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let mut tree = Tree::new();
        let mut reader = reader;

        // Reuse scratch buffers to reduce allocs
        let mut mode_bytes = Vec::new();
        let mut name_bytes = Vec::new();

        loop {
            mode_bytes.clear();
            // Read "mode " (space-delimited)
            let n = reader.read_until(b' ', &mut mode_bytes)?;
            if n == 0 {
                break; // clean EOF: no more entries
            }
            if *mode_bytes.last().unwrap() != b' ' {
                return Err(anyhow::anyhow!("unexpected EOF in mode"));
            }
            mode_bytes.pop(); // drop the space

            let mode_str = std::str::from_utf8(&mode_bytes)?;
            let mode = EntryMode::from_octal_str(mode_str)?;

            // Read "name\0"
            name_bytes.clear();
            let n = reader.read_until(b'\0', &mut name_bytes)?;
            if n == 0 || *name_bytes.last().unwrap() != b'\0' {
                return Err(anyhow::anyhow!("unexpected EOF in name"));
            }
            name_bytes.pop(); // drop NUL
            let name = std::str::from_utf8(&name_bytes)?.to_owned();

            // Read object id
            let oid = ObjectId::read_raw_from(&mut reader)
                .map_err(|_| anyhow::anyhow!("unexpected EOF in object id"))?;

            tree.insert(&name, TreeEntry::new(mode, oid));
        }

        Ok(tree)
    }
}

impl Object for Tree {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tree
    }
}
