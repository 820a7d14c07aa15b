//! Git commit object
//!
//! Commits represent snapshots of the repository at specific points in time.
//! They contain:
//! - A tree object ID (directory snapshot)
//! - Parent commit ID(s) (zero for a root, one normally, two or more for merges)
//! - Author and committer information
//! - Commit message
//!
//! ## Format
//!
//! On the wire:
//! ```text
//! commit <size>\0
//! tree <tree-sha>
//! parent <parent-sha>
//! author <name> <email> <timestamp> <timezone>
//! committer <name> <email> <timestamp> <timezone>
//!
//! <commit message>
//! ```
//!
//! Any headers after `committer` (`gpgsig` and its continuation lines,
//! headers this implementation does not know) are preserved opaquely and
//! re-emitted unchanged, so a signed commit keeps its id across a
//! parse/serialize round trip.

use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object::{Object, Packable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use std::io::{BufRead, Write};

/// Author or committer information
///
/// Contains name, email, and timestamp with timezone information.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Author {
    name: String,
    email: String,
    timestamp: chrono::DateTime<chrono::FixedOffset>,
}

impl Author {
    pub fn new_with_timestamp(
        name: String,
        email: String,
        timestamp: chrono::DateTime<chrono::FixedOffset>,
    ) -> Self {
        Author {
            name,
            email,
            timestamp,
        }
    }

    /// Build an author from a unix timestamp in the UTC offset
    pub fn from_unix_timestamp(name: String, email: String, timestamp: i64) -> anyhow::Result<Self> {
        let datetime = chrono::DateTime::from_timestamp(timestamp, 0)
            .context("Invalid unix timestamp")?
            .fixed_offset();

        Ok(Author {
            name,
            email,
            timestamp: datetime,
        })
    }

    /// Format complete author info as stored in commit objects
    ///
    /// # Returns
    ///
    /// String in format "Name <email> timestamp timezone"
    pub fn display(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.timestamp.timestamp(),
            self.timestamp.format("%z")
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> chrono::DateTime<chrono::FixedOffset> {
        self.timestamp
    }
}

impl TryFrom<&str> for Author {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Format: "name <email> timestamp timezone"
        // Split from right to get timezone and timestamp first
        let parts: Vec<&str> = value.rsplitn(3, ' ').collect();
        if parts.len() < 3 {
            return Err(anyhow::anyhow!("Invalid author format"));
        }

        let timezone = parts[0];
        let timestamp = parts[1]
            .parse::<i64>()
            .map_err(|_| anyhow::anyhow!("Invalid timestamp"))?;
        let name_email_part = parts[2]; // "name <email>"

        // Extract email from within angle brackets
        let email_start = name_email_part
            .find('<')
            .ok_or_else(|| anyhow::anyhow!("Invalid author format: missing '<'"))?;
        let email_end = name_email_part
            .find('>')
            .ok_or_else(|| anyhow::anyhow!("Invalid author format: missing '>'"))?;

        let name = name_email_part[..email_start].trim().to_string();
        let email = name_email_part[email_start + 1..email_end].to_string();

        // Timezone is "+HHMM" or "-HHMM"
        if timezone.len() != 5 {
            return Err(anyhow::anyhow!("Invalid timezone: {}", timezone));
        }
        let sign = if timezone.starts_with('-') { -1 } else { 1 };
        let hours = timezone[1..3]
            .parse::<i32>()
            .map_err(|_| anyhow::anyhow!("Invalid timezone: {}", timezone))?;
        let minutes = timezone[3..5]
            .parse::<i32>()
            .map_err(|_| anyhow::anyhow!("Invalid timezone: {}", timezone))?;
        let offset = chrono::FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .ok_or_else(|| anyhow::anyhow!("Invalid timezone: {}", timezone))?;

        let datetime = chrono::DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))?
            .with_timezone(&offset);

        Ok(Author {
            name,
            email,
            timestamp: datetime,
        })
    }
}

/// Git commit object
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Commit {
    /// Parent commit IDs (empty for initial commit, multiple for merge commits)
    parents: Vec<ObjectId>,
    /// Tree object ID representing the directory snapshot
    tree_oid: ObjectId,
    /// Author who wrote the changes
    author: Author,
    /// Committer who recorded the commit
    committer: Author,
    /// Headers after `committer` (signatures, unknown fields), raw lines
    extra_headers: Vec<String>,
    /// Commit message, byte-exact including any trailing newline
    message: String,
}

impl Commit {
    pub fn new(
        parents: Vec<ObjectId>,
        tree_oid: ObjectId,
        author: Author,
        committer: Author,
        message: String,
    ) -> Self {
        Commit {
            parents,
            tree_oid,
            author,
            committer,
            extra_headers: Vec::new(),
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tree_oid(&self) -> &ObjectId {
        &self.tree_oid
    }

    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    /// First parent, the one ref updates are validated against
    pub fn first_parent(&self) -> Option<&ObjectId> {
        self.parents.first()
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn committer(&self) -> &Author {
        &self.committer
    }

    /// Raw header lines after `committer` (signatures, unknown fields)
    pub fn extra_headers(&self) -> &[String] {
        &self.extra_headers
    }

    pub fn with_extra_headers(mut self, extra_headers: Vec<String>) -> Self {
        self.extra_headers = extra_headers;
        self
    }
}

impl Packable for Commit {
    fn body(&self) -> anyhow::Result<Bytes> {
        let mut lines = vec![];

        lines.push(format!("tree {}", self.tree_oid.as_ref()));
        for parent in &self.parents {
            lines.push(format!("parent {}", parent.as_ref()));
        }
        lines.push(format!("author {}", self.author.display()));
        lines.push(format!("committer {}", self.committer.display()));
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

impl Unpackable for Commit {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let content = reader
            .bytes()
            .collect::<Result<Vec<u8>, std::io::Error>>()?;
        let content = String::from_utf8(content)?;

        // Headers end at the first blank line; the message is everything
        // after it, kept byte-exact
        let separator = content
            .find("\n\n")
            .context("Invalid commit object: missing header/message separator")?;
        let (header_block, rest) = content.split_at(separator);
        let message = rest[2..].to_string();

        let mut lines = header_block.lines();

        let tree_line = lines
            .next()
            .context("Invalid commit object: missing tree line")?;
        let tree_oid = tree_line
            .strip_prefix("tree ")
            .context("Invalid commit object: invalid tree line")?
            .to_string();
        let tree_oid = ObjectId::try_parse(tree_oid)?;

        // Parse all parent lines (there can be 0, 1, or multiple parents)
        let mut parents = Vec::new();
        let mut next_line = lines
            .next()
            .context("Invalid commit object: missing author line")?;

        while next_line.starts_with("parent ") {
            let parent_oid = next_line
                .strip_prefix("parent ")
                .context("Invalid commit object: invalid parent line")?;
            parents.push(ObjectId::try_parse(parent_oid.to_string())?);

            next_line = lines
                .next()
                .context("Invalid commit object: missing author line")?;
        }

        // At this point, next_line should be the author line
        let author = next_line
            .strip_prefix("author ")
            .context("Invalid commit object: invalid author line")?;
        let author = Author::try_from(author)?;

        let committer_line = lines
            .next()
            .context("Invalid commit object: missing committer line")?;
        let committer = committer_line
            .strip_prefix("committer ")
            .context("Invalid commit object: invalid committer line")?;
        let committer = Author::try_from(committer)?;

        // Anything left before the blank line is preserved opaquely
        let extra_headers = lines.map(|line| line.to_string()).collect::<Vec<_>>();

        Ok(Commit {
            parents,
            tree_oid,
            author,
            committer,
            extra_headers,
            message,
        })
    }
}

impl Object for Commit {
    fn object_type(&self) -> ObjectType {
        ObjectType::Commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn sample_author() -> Author {
        Author::from_unix_timestamp(
            "Ada Lovelace".to_string(),
            "ada@example.com".to_string(),
            1_700_000_000,
        )
        .unwrap()
    }

    fn tree_oid() -> ObjectId {
        ObjectId::try_parse("d".repeat(40)).unwrap()
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let parent = ObjectId::try_parse("e".repeat(40)).unwrap();
        let commit = Commit::new(
            vec![parent],
            tree_oid(),
            sample_author(),
            sample_author(),
            "add dataset card\n\nlonger body\n".to_string(),
        );

        let body = commit.body().unwrap();
        let parsed = Commit::deserialize(Cursor::new(body.clone())).unwrap();

        assert_eq!(parsed, commit);
        assert_eq!(parsed.body().unwrap(), body);
        assert_eq!(parsed.object_id().unwrap(), commit.object_id().unwrap());
    }

    #[test]
    fn unknown_headers_survive_round_trip() {
        let raw = concat!(
            "tree dddddddddddddddddddddddddddddddddddddddd\n",
            "author Ada Lovelace <ada@example.com> 1700000000 +0000\n",
            "committer Ada Lovelace <ada@example.com> 1700000000 +0000\n",
            "gpgsig -----BEGIN PGP SIGNATURE-----\n",
            " iQEzBAABCAAdFiEE\n",
            " -----END PGP SIGNATURE-----\n",
            "\n",
            "signed commit\n"
        );

        let parsed = Commit::deserialize(Cursor::new(raw.as_bytes().to_vec())).unwrap();
        assert_eq!(parsed.body().unwrap(), Bytes::from_static(raw.as_bytes()));
    }

    #[test]
    fn merge_commit_parses_all_parents() {
        let p1 = ObjectId::try_parse("1".repeat(40)).unwrap();
        let p2 = ObjectId::try_parse("2".repeat(40)).unwrap();
        let commit = Commit::new(
            vec![p1.clone(), p2.clone()],
            tree_oid(),
            sample_author(),
            sample_author(),
            "merge branch\n".to_string(),
        );

        let parsed = Commit::deserialize(Cursor::new(commit.body().unwrap())).unwrap();
        assert_eq!(parsed.parents(), &[p1.clone(), p2]);
        assert_eq!(parsed.first_parent(), Some(&p1));
    }

    #[test]
    fn author_line_round_trips_with_offset() {
        let line = "Grace Hopper <grace@example.com> 1700000000 +0530";
        let author = Author::try_from(line).unwrap();
        assert_eq!(author.display(), line);
    }
}
