//! Git delta application
//!
//! Delta payloads encode a target object as a sequence of copy-from-base and
//! insert-literal instructions, prefixed by the base and target sizes as
//! 7-bit little-endian varints. The pack reader applies them against bases
//! resolved earlier in the pack or from the backend's object store.

use crate::errors::{BridgeError, BridgeResult};
use bytes::Bytes;

/// Apply a delta payload to its base, returning the reconstructed object body
pub fn apply_delta(base: &[u8], delta: &[u8]) -> BridgeResult<Bytes> {
    let mut cursor = 0usize;

    let base_size = read_varint(delta, &mut cursor)?;
    if base_size != base.len() as u64 {
        return Err(BridgeError::PackFormat(format!(
            "delta base size {} does not match actual base of {} bytes",
            base_size,
            base.len()
        )));
    }

    let target_size = read_varint(delta, &mut cursor)?;
    let mut target = Vec::with_capacity(target_size as usize);

    while cursor < delta.len() {
        let cmd = delta[cursor];
        cursor += 1;

        if cmd & 0x80 != 0 {
            // Copy from base: bits 0-3 select offset bytes, bits 4-6 size bytes
            let mut offset = 0u64;
            for bit in 0..4 {
                if cmd & (1 << bit) != 0 {
                    offset |= (take_byte(delta, &mut cursor)? as u64) << (8 * bit);
                }
            }

            let mut size = 0u64;
            for bit in 0..3 {
                if cmd & (1 << (4 + bit)) != 0 {
                    size |= (take_byte(delta, &mut cursor)? as u64) << (8 * bit);
                }
            }
            if size == 0 {
                size = 0x10000;
            }

            let start = offset as usize;
            let end = start + size as usize;
            if end > base.len() {
                return Err(BridgeError::PackFormat(format!(
                    "delta copy range {}..{} exceeds base of {} bytes",
                    start,
                    end,
                    base.len()
                )));
            }
            target.extend_from_slice(&base[start..end]);
        } else if cmd != 0 {
            // Insert literal bytes
            let size = cmd as usize;
            if cursor + size > delta.len() {
                return Err(BridgeError::PackFormat(
                    "delta literal extends past end of payload".to_string(),
                ));
            }
            target.extend_from_slice(&delta[cursor..cursor + size]);
            cursor += size;
        } else {
            return Err(BridgeError::PackFormat(
                "delta instruction byte 0 is reserved".to_string(),
            ));
        }
    }

    if target.len() as u64 != target_size {
        return Err(BridgeError::PackFormat(format!(
            "delta produced {} bytes, header declared {}",
            target.len(),
            target_size
        )));
    }

    Ok(Bytes::from(target))
}

fn take_byte(data: &[u8], cursor: &mut usize) -> BridgeResult<u8> {
    let byte = *data
        .get(*cursor)
        .ok_or_else(|| BridgeError::PackFormat("truncated delta payload".to_string()))?;
    *cursor += 1;
    Ok(byte)
}

fn read_varint(data: &[u8], cursor: &mut usize) -> BridgeResult<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;

    loop {
        let byte = take_byte(data, cursor)?;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(BridgeError::PackFormat(
                "delta size varint overflows".to_string(),
            ));
        }
    }
}
