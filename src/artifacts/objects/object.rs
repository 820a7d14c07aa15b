use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tag::Tag;
use crate::artifacts::objects::tree::Tree;
use anyhow::Result;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::io::{BufRead, Cursor, Write};

pub trait Packable {
    /// Canonical object body, without the `<type> <size>\0` header
    fn body(&self) -> Result<Bytes>;
}

pub trait Unpackable {
    /// Parse an object body; the header has already been consumed
    fn deserialize(reader: impl BufRead) -> Result<Self>
    where
        Self: Sized;
}

pub trait Object: Packable {
    fn object_type(&self) -> ObjectType;

    /// Full serialized form: `<type> <size>\0<body>`
    fn serialize(&self) -> Result<Bytes> {
        let body = self.body()?;

        let mut object_bytes = Vec::with_capacity(body.len() + 16);
        let header = format!("{} {}\0", self.object_type().as_str(), body.len());
        object_bytes.write_all(header.as_bytes())?;
        object_bytes.write_all(&body)?;

        Ok(Bytes::from(object_bytes))
    }

    fn object_id(&self) -> Result<ObjectId> {
        let content = self.serialize()?;
        let mut hasher = Sha1::new();
        hasher.update(&content);

        let oid = hasher.finalize();
        ObjectId::try_parse(format!("{oid:x}"))
    }
}

/// One of the four Git object kinds, materialized in memory.
///
/// Objects are created per request and are ephemeral; durable state lives
/// behind the backend bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum GitObject {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl GitObject {
    /// Parse an object from its body bytes (no `<type> <size>\0` header)
    pub fn parse(object_type: ObjectType, body: Bytes) -> Result<GitObject> {
        let reader = Cursor::new(body);

        Ok(match object_type {
            ObjectType::Blob => GitObject::Blob(Blob::deserialize(reader)?),
            ObjectType::Tree => GitObject::Tree(Tree::deserialize(reader)?),
            ObjectType::Commit => GitObject::Commit(Commit::deserialize(reader)?),
            ObjectType::Tag => GitObject::Tag(Tag::deserialize(reader)?),
        })
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            GitObject::Commit(commit) => Some(commit),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            GitObject::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            GitObject::Blob(blob) => Some(blob),
            _ => None,
        }
    }
}

impl Packable for GitObject {
    fn body(&self) -> Result<Bytes> {
        match self {
            GitObject::Blob(blob) => blob.body(),
            GitObject::Tree(tree) => tree.body(),
            GitObject::Commit(commit) => commit.body(),
            GitObject::Tag(tag) => tag.body(),
        }
    }
}

impl Object for GitObject {
    fn object_type(&self) -> ObjectType {
        match self {
            GitObject::Blob(_) => ObjectType::Blob,
            GitObject::Tree(_) => ObjectType::Tree,
            GitObject::Commit(_) => ObjectType::Commit,
            GitObject::Tag(_) => ObjectType::Tag,
        }
    }
}
