//! Pack stream reader
//!
//! Parses a version-2 pack into materialized objects. Accepts full entries,
//! `ofs-delta`, and `ref-delta`; ref-delta bases may live earlier in the
//! pack or be resolved through the caller-supplied lookup (objects the
//! backend already knows, i.e. thin packs). The trailing SHA-1 is verified
//! before any entry is parsed, so a corrupt transfer yields no objects at
//! all.

use crate::artifacts::objects::object::{GitObject, Object};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::pack::delta::apply_delta;
use crate::artifacts::pack::PACK_SIGNATURE;
use crate::errors::{BridgeError, BridgeResult};
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// Resolver for delta bases that are not part of the pack itself
pub type BaseLookup<'a> = dyn Fn(&ObjectId) -> Option<(ObjectType, Bytes)> + 'a;

/// Parse a complete pack, resolving every delta entry
///
/// `base_lookup` supplies bodies for ref-delta bases outside the pack;
/// passing a lookup that always returns `None` restricts the pack to be
/// self-contained.
pub fn read_pack(data: &[u8], base_lookup: &BaseLookup) -> BridgeResult<Vec<GitObject>> {
    if data.len() < 32 {
        return Err(BridgeError::PackFormat(format!(
            "pack of {} bytes is shorter than header plus trailer",
            data.len()
        )));
    }

    // Verify the trailer before trusting any entry
    let (body, trailer) = data.split_at(data.len() - 20);
    let mut hasher = Sha1::new();
    hasher.update(body);
    let actual = hasher.finalize();
    if actual.as_slice() != trailer {
        return Err(BridgeError::Integrity {
            expected: hex_digest(trailer),
            actual: format!("{actual:x}"),
        });
    }

    if &body[0..4] != PACK_SIGNATURE {
        return Err(BridgeError::PackFormat(
            "missing PACK signature".to_string(),
        ));
    }
    let version = BigEndian::read_u32(&body[4..8]);
    if version != 2 {
        return Err(BridgeError::PackFormat(format!(
            "unsupported pack version {}",
            version
        )));
    }
    let count = BigEndian::read_u32(&body[8..12]) as usize;

    let mut cursor = 12usize;
    let mut objects = Vec::with_capacity(count);
    let mut by_offset: HashMap<u64, usize> = HashMap::new();
    let mut by_id: HashMap<ObjectId, usize> = HashMap::new();
    // Bodies kept for delta resolution against earlier entries
    let mut bodies: Vec<(ObjectType, Bytes)> = Vec::with_capacity(count);

    for _ in 0..count {
        let entry_offset = cursor as u64;
        let (type_code, declared_size) = read_entry_header(body, &mut cursor)?;

        let (object_type, object_body) = match type_code {
            OFS_DELTA => {
                let distance = read_ofs_distance(body, &mut cursor)?;
                let base_offset = entry_offset.checked_sub(distance).ok_or_else(|| {
                    BridgeError::PackFormat(format!(
                        "ofs-delta distance {} reaches before the pack start",
                        distance
                    ))
                })?;
                let delta = inflate(body, &mut cursor, declared_size)?;

                let base_index = *by_offset.get(&base_offset).ok_or_else(|| {
                    BridgeError::PackFormat(format!(
                        "ofs-delta base at offset {} not found",
                        base_offset
                    ))
                })?;
                let (base_type, base_body) = &bodies[base_index];
                (*base_type, apply_delta(base_body, &delta)?)
            }
            REF_DELTA => {
                if cursor + 20 > body.len() {
                    return Err(BridgeError::PackFormat(
                        "truncated ref-delta base id".to_string(),
                    ));
                }
                let mut base_bytes = [0u8; 20];
                base_bytes.copy_from_slice(&body[cursor..cursor + 20]);
                cursor += 20;
                let base_id = ObjectId::from_bytes(&base_bytes);
                let delta = inflate(body, &mut cursor, declared_size)?;

                // In-pack bases take precedence; otherwise ask the backend
                let (base_type, base_body) = match by_id.get(&base_id) {
                    Some(&index) => bodies[index].clone(),
                    None => base_lookup(&base_id).ok_or_else(|| {
                        BridgeError::PackFormat(format!(
                            "ref-delta base {} is neither in the pack nor known",
                            base_id
                        ))
                    })?,
                };
                (base_type, apply_delta(&base_body, &delta)?)
            }
            code => {
                let object_type = ObjectType::from_pack_code(code)
                    .map_err(|e| BridgeError::PackFormat(e.to_string()))?;
                let object_body = inflate(body, &mut cursor, declared_size)?;
                if object_body.len() as u64 != declared_size {
                    return Err(BridgeError::PackFormat(format!(
                        "entry declared {} bytes but inflated to {}",
                        declared_size,
                        object_body.len()
                    )));
                }
                (object_type, object_body)
            }
        };

        let object = GitObject::parse(object_type, object_body.clone())
            .map_err(|e| BridgeError::PackFormat(format!("unparsable {object_type}: {e}")))?;
        let oid = object.object_id().map_err(BridgeError::Backend)?;

        let index = objects.len();
        by_offset.insert(entry_offset, index);
        by_id.insert(oid, index);
        bodies.push((object_type, object_body));
        objects.push(object);
    }

    if cursor != body.len() {
        return Err(BridgeError::PackFormat(format!(
            "{} trailing bytes after the last entry",
            body.len() - cursor
        )));
    }

    Ok(objects)
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// Entry header: type in bits 4-6 of the first byte, size continued in
/// 7-bit groups while the MSB is set
fn read_entry_header(data: &[u8], cursor: &mut usize) -> BridgeResult<(u8, u64)> {
    let mut byte = take_byte(data, cursor)?;
    let type_code = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as u64;
    let mut shift = 4u32;

    while byte & 0x80 != 0 {
        byte = take_byte(data, cursor)?;
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if shift > 63 {
            return Err(BridgeError::PackFormat(
                "entry size varint overflows".to_string(),
            ));
        }
    }

    Ok((type_code, size))
}

/// Negative offset of an ofs-delta base, in Git's +1 big-endian encoding
fn read_ofs_distance(data: &[u8], cursor: &mut usize) -> BridgeResult<u64> {
    let mut byte = take_byte(data, cursor)?;
    let mut distance = (byte & 0x7f) as u64;

    while byte & 0x80 != 0 {
        byte = take_byte(data, cursor)?;
        distance = ((distance + 1) << 7) | (byte & 0x7f) as u64;
    }

    Ok(distance)
}

fn take_byte(data: &[u8], cursor: &mut usize) -> BridgeResult<u8> {
    let byte = *data
        .get(*cursor)
        .ok_or_else(|| BridgeError::PackFormat("truncated pack entry".to_string()))?;
    *cursor += 1;
    Ok(byte)
}

/// Inflate one zlib stream starting at `cursor`, advancing it to the first
/// byte past the stream
fn inflate(data: &[u8], cursor: &mut usize, size_hint: u64) -> BridgeResult<Bytes> {
    let start = *cursor;
    let mut decompress = Decompress::new(true);
    let mut out = Vec::with_capacity(size_hint as usize);

    loop {
        let consumed = decompress.total_in() as usize;
        let produced = decompress.total_out() as usize;
        if out.len() == out.capacity() {
            out.reserve(8192);
        }

        let status = decompress
            .decompress_vec(&data[start + consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|e| BridgeError::PackFormat(format!("zlib stream: {e}")))?;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let stalled = decompress.total_in() as usize == consumed
                    && decompress.total_out() as usize == produced;
                if stalled {
                    return Err(BridgeError::PackFormat(
                        "truncated zlib stream in pack entry".to_string(),
                    ));
                }
            }
        }
    }

    *cursor = start + decompress.total_in() as usize;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::objects::blob::Blob;
    use crate::artifacts::objects::entry_mode::EntryMode;
    use crate::artifacts::objects::object::Packable;
    use crate::artifacts::objects::tree::{Tree, TreeEntry};
    use crate::artifacts::pack::writer::PackWriter;
    use pretty_assertions::assert_eq;

    fn no_bases(_: &ObjectId) -> Option<(ObjectType, Bytes)> {
        None
    }

    fn sample_objects() -> Vec<GitObject> {
        let blob = Blob::new(Bytes::from_static(b"weights"));
        let blob_oid = blob.object_id().unwrap();

        let mut tree = Tree::new();
        tree.insert("weights.bin", TreeEntry::new(EntryMode::Regular, blob_oid));

        vec![GitObject::Tree(tree), GitObject::Blob(blob)]
    }

    #[test]
    fn round_trips_full_entries() {
        let objects = sample_objects();
        let pack = PackWriter::<Vec<u8>>::pack_objects(&objects).unwrap();

        let decoded = read_pack(&pack, &no_bases).unwrap();
        assert_eq!(decoded, objects);
    }

    #[test]
    fn corrupt_trailer_is_an_integrity_error() {
        let mut pack = PackWriter::<Vec<u8>>::pack_objects(&sample_objects())
            .unwrap()
            .to_vec();
        let last = pack.len() - 1;
        pack[last] ^= 0xff;

        assert!(matches!(
            read_pack(&pack, &no_bases),
            Err(BridgeError::Integrity { .. })
        ));
    }

    #[test]
    fn corrupt_body_is_an_integrity_error() {
        let mut pack = PackWriter::<Vec<u8>>::pack_objects(&sample_objects())
            .unwrap()
            .to_vec();
        // Flip a byte inside an entry: the trailer no longer matches
        pack[14] ^= 0x01;

        assert!(matches!(
            read_pack(&pack, &no_bases),
            Err(BridgeError::Integrity { .. })
        ));
    }

    #[test]
    fn ref_delta_resolves_against_external_base() {
        let base = Blob::new(Bytes::from_static(b"0123456789"));
        let base_oid = base.object_id().unwrap();
        let base_body = base.body().unwrap();

        // Delta: base size 10, target size 10, copy all ten bytes
        let delta = vec![10, 10, 0x80 | 0x10, 10];

        // Hand-assemble a pack with a single ref-delta entry
        let mut body = Vec::new();
        body.extend_from_slice(b"PACK");
        body.extend_from_slice(&[0, 0, 0, 2]);
        body.extend_from_slice(&[0, 0, 0, 1]);
        body.push((REF_DELTA << 4) | (delta.len() as u8 & 0x0f));
        let mut raw_oid = Vec::new();
        base_oid.write_raw_to(&mut raw_oid).unwrap();
        body.extend_from_slice(&raw_oid);
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, &delta).unwrap();
        body.extend_from_slice(&encoder.finish().unwrap());

        let mut hasher = Sha1::new();
        hasher.update(&body);
        let trailer = hasher.finalize();
        body.extend_from_slice(&trailer);

        let lookup = |oid: &ObjectId| {
            (oid == &base_oid).then(|| (ObjectType::Blob, base_body.clone()))
        };
        let decoded = read_pack(&body, &lookup).unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_blob().unwrap().content(), &base_body);
    }

    #[test]
    fn ref_delta_without_base_is_a_pack_format_error() {
        let base = Blob::new(Bytes::from_static(b"0123456789"));
        let base_oid = base.object_id().unwrap();

        let delta = vec![10, 10, 0x80 | 0x10, 10];
        let mut body = Vec::new();
        body.extend_from_slice(b"PACK");
        body.extend_from_slice(&[0, 0, 0, 2]);
        body.extend_from_slice(&[0, 0, 0, 1]);
        body.push((REF_DELTA << 4) | (delta.len() as u8 & 0x0f));
        let mut raw_oid = Vec::new();
        base_oid.write_raw_to(&mut raw_oid).unwrap();
        body.extend_from_slice(&raw_oid);
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, &delta).unwrap();
        body.extend_from_slice(&encoder.finish().unwrap());
        let mut hasher = Sha1::new();
        hasher.update(&body);
        let trailer = hasher.finalize();
        body.extend_from_slice(&trailer);

        assert!(matches!(
            read_pack(&body, &no_bases),
            Err(BridgeError::PackFormat(_))
        ));
    }
}
