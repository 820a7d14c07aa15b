//! receive-pack request parsing and status reporting (push)
//!
//! The client posts `old-id new-id ref-name` command lines (the first one
//! carrying its capability list after a NUL), a flush, and then the pack of
//! new objects. The server answers a report: `unpack ok` or `unpack <why>`,
//! followed by `ok <ref>` / `ng <ref> <why>` per command.

use crate::artifacts::negotiation::RefUpdate;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{BridgeError, BridgeResult};
use crate::protocol::pkt_line::{self, BAND_DATA, Frame, PktLineReader};
use bytes::{Bytes, BytesMut};

/// Parsed receive-pack request
#[derive(Debug, Clone)]
pub struct ReceivePackRequest {
    pub updates: Vec<RefUpdate>,
    pub capabilities: Vec<String>,
    /// The raw pack stream following the command section; empty for
    /// delete-only pushes
    pub pack: Bytes,
}

impl ReceivePackRequest {
    pub fn wants_side_band(&self) -> bool {
        self.capabilities
            .iter()
            .any(|cap| cap == "side-band-64k" || cap == "side-band")
    }

    pub fn wants_report(&self) -> bool {
        self.capabilities.iter().any(|cap| cap == "report-status")
    }
}

/// Parse the request body of a `git-receive-pack` POST
pub fn parse_request(body: &[u8]) -> BridgeResult<ReceivePackRequest> {
    let mut reader = PktLineReader::new(body);
    let mut updates = Vec::new();
    let mut capabilities = Vec::new();

    loop {
        match reader.next_frame()? {
            Some(Frame::Data(line)) => {
                let line = std::str::from_utf8(&line)
                    .map_err(|_| BridgeError::Framing("non-utf8 command line".to_string()))?;

                // The first command line carries capabilities after a NUL
                let (command, caps) = match line.split_once('\0') {
                    Some((command, caps)) => (command, Some(caps)),
                    None => (line, None),
                };
                if let Some(caps) = caps {
                    capabilities.extend(
                        caps.split(' ')
                            .filter(|cap| !cap.is_empty())
                            .map(|cap| cap.trim_end_matches('\n').to_string()),
                    );
                }

                let command = command.trim_end_matches('\n');
                let mut parts = command.split(' ');
                let (old, new, name) = match (parts.next(), parts.next(), parts.next()) {
                    (Some(old), Some(new), Some(name)) if parts.next().is_none() => {
                        (old, new, name)
                    }
                    _ => {
                        return Err(BridgeError::Framing(format!(
                            "malformed ref update command: {command}"
                        )));
                    }
                };

                updates.push(RefUpdate {
                    old: ObjectId::try_parse(old.to_string())
                        .map_err(|e| BridgeError::Framing(format!("bad old id: {e}")))?,
                    new: ObjectId::try_parse(new.to_string())
                        .map_err(|e| BridgeError::Framing(format!("bad new id: {e}")))?,
                    name: name.to_string(),
                });
            }
            // Flush ends the command section; the pack follows
            Some(Frame::Flush) | None => break,
            Some(Frame::Delim) => continue,
        }
    }

    let pack = Bytes::copy_from_slice(reader.into_inner());

    Ok(ReceivePackRequest {
        updates,
        capabilities,
        pack,
    })
}

/// Outcome of one ref update
#[derive(Debug, Clone)]
pub struct RefStatus {
    pub name: String,
    pub result: Result<(), String>,
}

/// Assemble the report-status response
pub fn build_report(
    unpack_result: &Result<(), String>,
    statuses: &[RefStatus],
    use_side_band: bool,
) -> BridgeResult<Bytes> {
    let mut report = BytesMut::new();

    let unpack_line = match unpack_result {
        Ok(()) => "unpack ok\n".to_string(),
        Err(reason) => format!("unpack {reason}\n"),
    };
    report.extend_from_slice(&pkt_line::encode_str(&unpack_line)?);

    for status in statuses {
        let line = match &status.result {
            Ok(()) => format!("ok {}\n", status.name),
            Err(reason) => format!("ng {} {}\n", status.name, reason),
        };
        report.extend_from_slice(&pkt_line::encode_str(&line)?);
    }
    report.extend_from_slice(&pkt_line::flush());

    if use_side_band {
        let mut banded = BytesMut::new();
        for frame in pkt_line::side_band(BAND_DATA, &report)? {
            banded.extend_from_slice(&frame);
        }
        banded.extend_from_slice(&pkt_line::flush());
        Ok(banded.freeze())
    } else {
        Ok(report.freeze())
    }
}
