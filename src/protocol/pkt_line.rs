//! Pkt-line framing for the Git Smart HTTP protocol
//!
//! Every protocol message is a sequence of length-prefixed frames: a
//! 4-hex-digit length covering prefix plus payload, or one of the control
//! values `0000` (flush, ends a section) and `0001` (delimiter, protocol v2
//! sub-sections). This layer is pure: it only consumes and produces bytes.

use crate::errors::{BridgeError, BridgeResult};
use bytes::Bytes;
use std::io::BufRead;

/// Maximum payload bytes in a single pkt-line (65520 minus the 4-byte prefix)
pub const MAX_PKT_PAYLOAD: usize = 65516;

/// Side-band channel carrying pack data
pub const BAND_DATA: u8 = 1;
/// Side-band channel carrying human-readable progress
pub const BAND_PROGRESS: u8 = 2;
/// Side-band channel carrying a fatal error message
pub const BAND_ERROR: u8 = 3;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A data frame with its payload
    Data(Bytes),
    /// `0000`: end of section (or of the whole response)
    Flush,
    /// `0001`: end of a sub-section (protocol v2)
    Delim,
}

/// Encode a single payload as a pkt-line
///
/// Payloads longer than [`MAX_PKT_PAYLOAD`] must be split by the caller
/// (see [`side_band`]).
pub fn encode(payload: &[u8]) -> BridgeResult<Bytes> {
    if payload.len() > MAX_PKT_PAYLOAD {
        return Err(BridgeError::Framing(format!(
            "payload of {} bytes exceeds pkt-line maximum",
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(format!("{:04x}", payload.len() + 4).as_bytes());
    frame.extend_from_slice(payload);
    Ok(Bytes::from(frame))
}

/// Encode a textual payload as a pkt-line
pub fn encode_str(payload: &str) -> BridgeResult<Bytes> {
    encode(payload.as_bytes())
}

/// The flush frame `0000`
pub fn flush() -> Bytes {
    Bytes::from_static(b"0000")
}

/// Split an arbitrarily large payload into max-size side-band frames
///
/// Each frame carries the band byte followed by up to `MAX_PKT_PAYLOAD - 1`
/// payload bytes, so a multi-megabyte pack never overflows a single frame.
pub fn side_band(band: u8, payload: &[u8]) -> BridgeResult<Vec<Bytes>> {
    let mut frames = Vec::new();

    for chunk in payload.chunks(MAX_PKT_PAYLOAD - 1) {
        let mut banded = Vec::with_capacity(chunk.len() + 1);
        banded.push(band);
        banded.extend_from_slice(chunk);
        frames.push(encode(&banded)?);
    }

    Ok(frames)
}

/// Incremental pkt-line decoder over any buffered reader
///
/// Each [`next_frame`](PktLineReader::next_frame) call produces one frame;
/// `None` means clean end of stream. Input may arrive in arbitrarily small
/// increments since only whole frames are ever returned.
pub struct PktLineReader<R> {
    input: R,
}

impl<R: BufRead> PktLineReader<R> {
    pub fn new(input: R) -> Self {
        PktLineReader { input }
    }

    /// Decode the next frame, or `None` at clean EOF
    pub fn next_frame(&mut self) -> BridgeResult<Option<Frame>> {
        // Clean EOF only when no bytes remain before the prefix
        let available = self
            .input
            .fill_buf()
            .map_err(|e| BridgeError::Framing(e.to_string()))?;
        if available.is_empty() {
            return Ok(None);
        }

        let mut prefix = [0u8; 4];
        self.input
            .read_exact(&mut prefix)
            .map_err(|_| BridgeError::Framing("truncated length prefix".to_string()))?;

        let prefix_str = std::str::from_utf8(&prefix)
            .map_err(|_| BridgeError::Framing(format!("non-ascii length prefix: {:?}", prefix)))?;
        let length = usize::from_str_radix(prefix_str, 16).map_err(|_| {
            BridgeError::Framing(format!("invalid hex length prefix: {:?}", prefix_str))
        })?;

        match length {
            0 => Ok(Some(Frame::Flush)),
            1 => Ok(Some(Frame::Delim)),
            2 | 3 => Err(BridgeError::Framing(format!(
                "length {} is shorter than the prefix itself",
                length
            ))),
            _ if length > MAX_PKT_PAYLOAD + 4 => Err(BridgeError::Framing(format!(
                "length {} exceeds pkt-line maximum",
                length
            ))),
            _ => {
                let mut payload = vec![0u8; length - 4];
                self.input
                    .read_exact(&mut payload)
                    .map_err(|_| BridgeError::Framing("truncated pkt-line payload".to_string()))?;
                Ok(Some(Frame::Data(Bytes::from(payload))))
            }
        }
    }

    /// Give back the underlying reader (e.g. to read a trailing pack body)
    pub fn into_inner(self) -> R {
        self.input
    }
}

/// Decode every frame in a fully buffered message
pub fn decode_all(data: &[u8]) -> BridgeResult<Vec<Frame>> {
    let mut reader = PktLineReader::new(data);
    let mut frames = Vec::new();

    while let Some(frame) = reader.next_frame()? {
        frames.push(frame);
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn encodes_with_hex_prefix() {
        assert_eq!(encode_str("hello\n").unwrap(), Bytes::from_static(b"000ahello\n"));
        assert_eq!(flush(), Bytes::from_static(b"0000"));
    }

    #[test]
    fn decodes_data_and_control_frames() {
        let stream = b"000ahello\n00000001";
        let frames = decode_all(stream).unwrap();

        assert_eq!(
            frames,
            vec![
                Frame::Data(Bytes::from_static(b"hello\n")),
                Frame::Flush,
                Frame::Delim,
            ]
        );
    }

    #[test]
    fn rejects_invalid_hex_prefix() {
        assert!(matches!(
            decode_all(b"zzzzoops"),
            Err(BridgeError::Framing(_))
        ));
    }

    #[test]
    fn rejects_length_shorter_than_prefix() {
        assert!(matches!(decode_all(b"0003"), Err(BridgeError::Framing(_))));
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(matches!(
            decode_all(b"0010shor"),
            Err(BridgeError::Framing(_))
        ));
    }

    #[test]
    fn oversized_payload_is_refused_on_encode() {
        let payload = vec![b'x'; MAX_PKT_PAYLOAD + 1];
        assert!(matches!(encode(&payload), Err(BridgeError::Framing(_))));
    }

    #[test]
    fn side_band_splits_large_payloads() {
        let payload = vec![b'p'; MAX_PKT_PAYLOAD * 2];
        let frames = side_band(BAND_DATA, &payload).unwrap();

        // 2 * MAX payload bytes at (MAX - 1) bytes per frame needs 3 frames
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!(frame.len() <= MAX_PKT_PAYLOAD + 4);
            assert_eq!(frame[4], BAND_DATA);
        }

        // Reassembling the bands yields the original payload
        let reassembled = decode_all(&frames.concat())
            .unwrap()
            .into_iter()
            .flat_map(|frame| match frame {
                Frame::Data(data) => data[1..].to_vec(),
                _ => vec![],
            })
            .collect::<Vec<_>>();
        assert_eq!(reassembled, payload);
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 0..MAX_PKT_PAYLOAD)) {
            let encoded = encode(&payload).unwrap();
            let frames = decode_all(&encoded).unwrap();
            prop_assert_eq!(frames, vec![Frame::Data(Bytes::from(payload))]);
        }
    }
}
