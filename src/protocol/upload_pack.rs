//! upload-pack request parsing and response assembly (clone/fetch/pull)
//!
//! The client posts `want`/`have` lines terminated by `done`; the server
//! answers `NAK` followed by a pack carrying the negotiated closure. With
//! `side-band-64k` the pack is chunked onto band 1.

use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::{BridgeError, BridgeResult};
use crate::protocol::pkt_line::{self, BAND_DATA, BAND_ERROR, Frame, PktLineReader};
use bytes::{Bytes, BytesMut};

/// Parsed upload-pack negotiation request
#[derive(Debug, Clone, Default)]
pub struct UploadPackRequest {
    pub wants: Vec<ObjectId>,
    pub haves: Vec<ObjectId>,
    pub done: bool,
    pub capabilities: Vec<String>,
}

impl UploadPackRequest {
    pub fn wants_side_band(&self) -> bool {
        self.capabilities
            .iter()
            .any(|cap| cap == "side-band-64k" || cap == "side-band")
    }
}

/// Parse the request body of a `git-upload-pack` POST
pub fn parse_request(body: &[u8]) -> BridgeResult<UploadPackRequest> {
    let mut reader = PktLineReader::new(body);
    let mut request = UploadPackRequest::default();

    while let Some(frame) = reader.next_frame()? {
        let line = match frame {
            Frame::Data(data) => data,
            Frame::Flush | Frame::Delim => continue,
        };
        let line = std::str::from_utf8(&line)
            .map_err(|_| BridgeError::Framing("non-utf8 negotiation line".to_string()))?
            .trim_end_matches('\n');

        if let Some(rest) = line.strip_prefix("want ") {
            // The first want line may carry the client's capability list
            let mut parts = rest.split(' ');
            let sha = parts
                .next()
                .ok_or_else(|| BridgeError::Framing("empty want line".to_string()))?;
            request.wants.push(
                ObjectId::try_parse(sha.to_string())
                    .map_err(|e| BridgeError::Framing(format!("bad want id: {e}")))?,
            );
            request
                .capabilities
                .extend(parts.filter(|cap| !cap.is_empty()).map(String::from));
        } else if let Some(sha) = line.strip_prefix("have ") {
            request.haves.push(
                ObjectId::try_parse(sha.to_string())
                    .map_err(|e| BridgeError::Framing(format!("bad have id: {e}")))?,
            );
        } else if line == "done" {
            request.done = true;
            break;
        } else if line.starts_with("deepen") || line.starts_with("filter") {
            return Err(BridgeError::Translation(format!(
                "unsupported negotiation feature: {}",
                line.split(' ').next().unwrap_or(line)
            )));
        } else if !line.is_empty() {
            return Err(BridgeError::Framing(format!(
                "unexpected negotiation line: {line}"
            )));
        }
    }

    Ok(request)
}

/// Assemble the response: `NAK`, then the pack (banded when requested)
pub fn build_response(pack: &[u8], use_side_band: bool) -> BridgeResult<Bytes> {
    let mut out = BytesMut::new();
    out.extend_from_slice(&pkt_line::encode_str("NAK\n")?);

    if use_side_band {
        for frame in pkt_line::side_band(BAND_DATA, pack)? {
            out.extend_from_slice(&frame);
        }
        out.extend_from_slice(&pkt_line::flush());
    } else {
        out.extend_from_slice(pack);
    }

    Ok(out.freeze())
}

/// Fatal negotiation error, reported in-band before any pack bytes
pub fn build_error(message: &str, use_side_band: bool) -> BridgeResult<Bytes> {
    let mut out = BytesMut::new();

    if use_side_band {
        out.extend_from_slice(&pkt_line::encode_str("NAK\n")?);
        for frame in pkt_line::side_band(BAND_ERROR, format!("{message}\n").as_bytes())? {
            out.extend_from_slice(&frame);
        }
        out.extend_from_slice(&pkt_line::flush());
    } else {
        out.extend_from_slice(&pkt_line::encode_str(&format!("ERR {message}\n"))?);
    }

    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pkt(line: &str) -> Bytes {
        pkt_line::encode_str(line).unwrap()
    }

    #[test]
    fn parses_wants_haves_and_capabilities() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&pkt(&format!(
            "want {} side-band-64k agent=git/2.43\n",
            "a".repeat(40)
        )));
        body.extend_from_slice(&pkt(&format!("want {}\n", "b".repeat(40))));
        body.extend_from_slice(&pkt_line::flush());
        body.extend_from_slice(&pkt(&format!("have {}\n", "c".repeat(40))));
        body.extend_from_slice(&pkt("done\n"));

        let request = parse_request(&body).unwrap();
        assert_eq!(request.wants.len(), 2);
        assert_eq!(request.haves.len(), 1);
        assert!(request.done);
        assert!(request.wants_side_band());
    }

    #[test]
    fn rejects_shallow_clone_requests() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&pkt(&format!("want {}\n", "a".repeat(40))));
        body.extend_from_slice(&pkt("deepen 1\n"));

        assert!(matches!(
            parse_request(&body),
            Err(BridgeError::Translation(_))
        ));
    }

    #[test]
    fn response_without_side_band_appends_raw_pack() {
        let response = build_response(b"PACKDATA", false).unwrap();
        assert!(response.starts_with(b"0008NAK\n"));
        assert!(response.ends_with(b"PACKDATA"));
    }

    #[test]
    fn banded_response_wraps_pack_on_band_one() {
        let response = build_response(b"PACKDATA", true).unwrap();
        let frames = pkt_line::decode_all(&response).unwrap();

        assert_eq!(frames[0], Frame::Data(Bytes::from_static(b"NAK\n")));
        match &frames[1] {
            Frame::Data(data) => {
                assert_eq!(data[0], BAND_DATA);
                assert_eq!(&data[1..], b"PACKDATA");
            }
            other => panic!("expected banded data frame, got {other:?}"),
        }
        assert_eq!(*frames.last().unwrap(), Frame::Flush);
    }
}
