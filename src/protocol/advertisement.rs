//! Ref advertisement for `info/refs`
//!
//! The advertisement opens with a `# service=...` banner, then lists every
//! ref with its commit id. The first ref line carries the server's
//! capability list after a NUL; an empty repository advertises the
//! capabilities on a zero-id placeholder line instead.

use crate::artifacts::objects::object_id::{ObjectId, ZERO_OID};
use crate::errors::BridgeResult;
use crate::protocol::pkt_line;
use bytes::{Bytes, BytesMut};
use derive_new::new;

/// The two smart-HTTP services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    /// Serves clone/fetch/pull
    UploadPack,
    /// Serves push
    ReceivePack,
}

impl GitService {
    pub fn as_str(&self) -> &str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
        }
    }

    pub fn try_parse(value: &str) -> Option<GitService> {
        match value {
            "git-upload-pack" => Some(GitService::UploadPack),
            "git-receive-pack" => Some(GitService::ReceivePack),
            _ => None,
        }
    }

    /// Capabilities this server actually implements for the service
    pub fn capabilities(&self) -> Vec<String> {
        let mut caps = match self {
            GitService::UploadPack => vec!["side-band-64k".to_string()],
            GitService::ReceivePack => vec![
                "report-status".to_string(),
                "side-band-64k".to_string(),
                "delete-refs".to_string(),
                "ofs-delta".to_string(),
            ],
        };
        caps.push(format!("agent=brig/{}", env!("CARGO_PKG_VERSION")));
        caps
    }
}

impl std::fmt::Display for GitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Service advertisement for one repository
#[derive(Debug, Clone, new)]
pub struct ServiceAdvertisement {
    service: GitService,
    /// (ref name, commit id) pairs in any order; sorted on emission
    refs: Vec<(String, ObjectId)>,
}

impl ServiceAdvertisement {
    /// Encode the advertisement as a pkt-line stream
    pub fn to_bytes(&self) -> BridgeResult<Bytes> {
        let mut out = BytesMut::new();

        out.extend_from_slice(&pkt_line::encode_str(&format!(
            "# service={}\n",
            self.service.as_str()
        ))?);
        out.extend_from_slice(&pkt_line::flush());

        // HEAD first, then branches, then tags, alphabetical within a group
        let mut sorted_refs = self.refs.clone();
        sorted_refs.sort_by_key(|(name, _)| {
            let group = if name == "HEAD" {
                0
            } else if name.starts_with("refs/heads/") {
                1
            } else if name.starts_with("refs/tags/") {
                2
            } else {
                3
            };
            (group, name.clone())
        });

        let caps = self.service.capabilities().join(" ");

        if sorted_refs.is_empty() {
            out.extend_from_slice(&pkt_line::encode_str(&format!(
                "{} capabilities^{{}}\0{}\n",
                ZERO_OID, caps
            ))?);
        } else {
            for (index, (name, oid)) in sorted_refs.iter().enumerate() {
                let line = if index == 0 {
                    format!("{} {}\0{}\n", oid, name, caps)
                } else {
                    format!("{} {}\n", oid, name)
                };
                out.extend_from_slice(&pkt_line::encode_str(&line)?);
            }
        }

        out.extend_from_slice(&pkt_line::flush());
        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::pkt_line::{decode_all, Frame};
    use pretty_assertions::assert_eq;

    fn oid(c: char) -> ObjectId {
        ObjectId::try_parse(c.to_string().repeat(40)).unwrap()
    }

    fn data_lines(stream: &Bytes) -> Vec<String> {
        decode_all(stream)
            .unwrap()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Data(data) => Some(String::from_utf8(data.to_vec()).unwrap()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn head_sorts_first_and_first_line_carries_capabilities() {
        let advertisement = ServiceAdvertisement::new(
            GitService::UploadPack,
            vec![
                ("refs/heads/main".to_string(), oid('a')),
                ("HEAD".to_string(), oid('a')),
                ("refs/tags/v1".to_string(), oid('b')),
            ],
        );

        let lines = data_lines(&advertisement.to_bytes().unwrap());
        assert_eq!(lines[0], "# service=git-upload-pack\n");
        assert!(lines[1].starts_with(&format!("{} HEAD\0", oid('a'))));
        assert!(lines[1].contains("side-band-64k"));
        assert_eq!(lines[2], format!("{} refs/heads/main\n", oid('a')));
        assert_eq!(lines[3], format!("{} refs/tags/v1\n", oid('b')));
    }

    #[test]
    fn empty_repository_advertises_zero_id_placeholder() {
        let advertisement = ServiceAdvertisement::new(GitService::ReceivePack, vec![]);

        let lines = data_lines(&advertisement.to_bytes().unwrap());
        assert!(lines[1].starts_with(&format!("{} capabilities^{{}}\0", ZERO_OID)));
        assert!(lines[1].contains("report-status"));
        assert!(lines[1].contains("delete-refs"));
    }
}
