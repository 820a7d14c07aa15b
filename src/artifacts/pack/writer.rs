//! Pack stream writer
//!
//! Emits a version-2 pack: the 12-byte header (`PACK`, version, object
//! count), one zlib-compressed full entry per object, and a trailing SHA-1
//! over every preceding byte. Objects are written as full entries; delta
//! compression on the wire is an optimization the reader must accept but the
//! writer does not produce.
//!
//! The writer streams into any `Write`, so a large response never has to be
//! assembled twice.

use crate::artifacts::objects::object::{GitObject, Object, Packable};
use crate::artifacts::pack::PACK_SIGNATURE;
use crate::errors::{BridgeError, BridgeResult};
use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use sha1::{Digest, Sha1};
use std::io::Write;

/// Streaming pack writer
///
/// The object count is part of the header, so it must be known up front.
pub struct PackWriter<W: Write> {
    out: W,
    hasher: Sha1,
    declared: u32,
    written: u32,
}

impl<W: Write> PackWriter<W> {
    /// Write the pack header and prepare for `count` objects
    pub fn new(out: W, count: u32) -> BridgeResult<Self> {
        let mut writer = PackWriter {
            out,
            hasher: Sha1::new(),
            declared: count,
            written: 0,
        };

        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(PACK_SIGNATURE);
        header.write_u32::<BigEndian>(2)?;
        header.write_u32::<BigEndian>(count)?;
        writer.emit(&header)?;

        Ok(writer)
    }

    /// Append one object as a full (non-delta) entry
    pub fn write_object(&mut self, object: &GitObject) -> BridgeResult<()> {
        if self.written == self.declared {
            return Err(BridgeError::PackFormat(format!(
                "pack declared {} objects, attempted to write more",
                self.declared
            )));
        }

        let body = object.body().map_err(BridgeError::Backend)?;
        let header = encode_entry_header(object.object_type().pack_code(), body.len() as u64);
        self.emit(&header)?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body)?;
        let compressed = encoder.finish()?;
        self.emit(&compressed)?;

        self.written += 1;
        Ok(())
    }

    /// Write the SHA-1 trailer and return the underlying writer
    pub fn finish(mut self) -> BridgeResult<W> {
        if self.written != self.declared {
            return Err(BridgeError::PackFormat(format!(
                "pack declared {} objects but {} were written",
                self.declared, self.written
            )));
        }

        let checksum = self.hasher.finalize();
        self.out.write_all(&checksum)?;
        Ok(self.out)
    }

    fn emit(&mut self, data: &[u8]) -> BridgeResult<()> {
        self.hasher.update(data);
        self.out.write_all(data)?;
        Ok(())
    }
}

impl<W: Write> PackWriter<W> {
    /// Convenience: pack a full object sequence into a buffer
    pub fn pack_objects(objects: &[GitObject]) -> BridgeResult<Bytes> {
        let mut writer = PackWriter::new(Vec::new(), objects.len() as u32)?;
        for object in objects {
            writer.write_object(object)?;
        }
        Ok(Bytes::from(writer.finish()?))
    }
}

/// Encode a pack entry header: type in bits 4-6 of the first byte, size in
/// 4 + 7n bits little-endian with MSB continuation
pub(crate) fn encode_entry_header(type_code: u8, size: u64) -> Vec<u8> {
    let mut size = size;
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    size >>= 4;

    let mut header = Vec::with_capacity(4);
    while size > 0 {
        header.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    header.push(byte);

    header
}
