//! Git annotated tag object
//!
//! ## Format
//!
//! On the wire:
//! ```text
//! tag <size>\0
//! object <target-sha>
//! type <target-kind>
//! tag <name>
//! tagger <name> <email> <timestamp> <timezone>
//!
//! <tag message>
//! ```
//!
//! Headers after `tagger` (signatures included) are preserved opaquely,
//! mirroring the commit object's round-trip rule.

use crate::artifacts::objects::commit::Author;
use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object::{Object, Packable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tag {
    target: ObjectId,
    target_type: ObjectType,
    name: String,
    tagger: Option<Author>,
    extra_headers: Vec<String>,
    message: String,
}

impl Tag {
    pub fn new(
        target: ObjectId,
        target_type: ObjectType,
        name: String,
        tagger: Option<Author>,
        message: String,
    ) -> Self {
        Tag {
            target,
            target_type,
            name,
            tagger,
            extra_headers: Vec::new(),
            message,
        }
    }

    pub fn target(&self) -> &ObjectId {
        &self.target
    }

    pub fn target_type(&self) -> ObjectType {
        self.target_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Packable for Tag {
    fn body(&self) -> anyhow::Result<Bytes> {
        let mut lines = vec![];

        lines.push(format!("object {}", self.target.as_ref()));
        lines.push(format!("type {}", self.target_type.as_str()));
        lines.push(format!("tag {}", self.name));
        if let Some(tagger) = &self.tagger {
            lines.push(format!("tagger {}", tagger.display()));
        }
        for header in &self.extra_headers {
            lines.push(header.clone());
        }

        let mut content_bytes = Vec::new();
        content_bytes.write_all(lines.join("\n").as_bytes())?;
        content_bytes.write_all(b"\n\n")?;
        content_bytes.write_all(self.message.as_bytes())?;

        Ok(Bytes::from(content_bytes))
    }
}

impl Unpackable for Tag {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let content = reader
            .bytes()
            .collect::<Result<Vec<u8>, std::io::Error>>()?;
        let content = String::from_utf8(content)?;

        let separator = content
            .find("\n\n")
            .context("Invalid tag object: missing header/message separator")?;
        let (header_block, rest) = content.split_at(separator);
        let message = rest[2..].to_string();

        let mut lines = header_block.lines();

        let target = lines
            .next()
            .and_then(|line| line.strip_prefix("object "))
            .context("Invalid tag object: missing object line")?;
        let target = ObjectId::try_parse(target.to_string())?;

        let target_type = lines
            .next()
            .and_then(|line| line.strip_prefix("type "))
            .context("Invalid tag object: missing type line")?;
        let target_type = ObjectType::try_from(target_type)?;

        let name = lines
            .next()
            .and_then(|line| line.strip_prefix("tag "))
            .context("Invalid tag object: missing tag line")?
            .to_string();

        let mut tagger = None;
        let mut extra_headers = Vec::new();
        for line in lines {
            if tagger.is_none() && extra_headers.is_empty() {
                if let Some(tagger_line) = line.strip_prefix("tagger ") {
                    tagger = Some(Author::try_from(tagger_line)?);
                    continue;
                }
            }
            extra_headers.push(line.to_string());
        }

        Ok(Tag {
            target,
            target_type,
            name,
            tagger,
            extra_headers,
            message,
        })
    }
}

impl Object for Tag {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tag
    }
}
