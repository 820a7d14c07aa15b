//! Git object identifier (SHA-1 hash)
//!
//! Object IDs are 40-character hexadecimal strings representing SHA-1 hashes.
//! They uniquely identify all objects served by the bridge (blobs, trees,
//! commits, tags).
//!
//! ## Format
//!
//! - Full: 40 hex characters (e.g., "abc123...def")
//! - Binary: 20 raw bytes, used inside tree entries and pack trailers

use crate::artifacts::objects::OBJECT_ID_LENGTH;
use std::io;

/// Git object identifier (SHA-1 hash)
///
/// A 40-character hexadecimal string that uniquely identifies an object.
/// Implements parsing, binary conversion, and display utilities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ObjectId(String);

/// The all-zero id used by the wire protocol for ref creation/deletion.
pub const ZERO_OID: &str = "0000000000000000000000000000000000000000";

impl ObjectId {
    /// Parse and validate an object ID from a string
    ///
    /// # Arguments
    ///
    /// * `id` - 40-character hexadecimal string
    ///
    /// # Returns
    ///
    /// Validated ObjectId or error if invalid length/characters
    pub fn try_parse(id: String) -> anyhow::Result<Self> {
        if id.len() != OBJECT_ID_LENGTH {
            return Err(anyhow::anyhow!("Invalid object ID length: {}", id.len()));
        }
        if !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow::anyhow!("Invalid object ID characters: {}", id));
        }
        Ok(Self(id.to_lowercase()))
    }

    /// The all-zero id (ref creation/deletion marker, never a real object)
    pub fn zero() -> Self {
        Self(ZERO_OID.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_OID
    }

    /// Build an object ID from its 20-byte binary form
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        let mut hex40 = String::with_capacity(OBJECT_ID_LENGTH);
        for byte in bytes {
            hex40.push_str(&format!("{:02x}", byte));
        }
        Self(hex40)
    }

    /// Write the object ID in binary format (20 bytes)
    ///
    /// Converts the 40-char hex string to 20 bytes and writes to the given
    /// writer. Used when serializing tree entries and pack trailers.
    pub fn write_raw_to<W: io::Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        let hex40 = self.as_ref();

        // Process a nibble pair at a time
        for i in (0..OBJECT_ID_LENGTH).step_by(2) {
            let byte = u8::from_str_radix(&hex40[i..i + 2], 16)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid hex digit"))?;
            writer.write_all(&[byte])?;
        }

        Ok(())
    }

    /// Read an object ID from binary format (20 bytes)
    pub fn read_raw_from<R: io::Read + ?Sized>(reader: &mut R) -> anyhow::Result<Self> {
        let mut bytes = [0u8; 20];
        reader.read_exact(&mut bytes)?;
        Ok(Self::from_bytes(&bytes))
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn binary_round_trip() {
        let oid =
            ObjectId::try_parse("0123456789abcdef0123456789abcdef01234567".to_string()).unwrap();

        let mut raw = Vec::new();
        oid.write_raw_to(&mut raw).unwrap();
        assert_eq!(raw.len(), 20);

        let back = ObjectId::read_raw_from(&mut raw.as_slice()).unwrap();
        assert_eq!(back, oid);
    }

    #[test]
    fn rejects_bad_length_and_characters() {
        assert!(ObjectId::try_parse("abc".to_string()).is_err());
        assert!(ObjectId::try_parse("g".repeat(40)).is_err());
    }

    #[test]
    fn zero_id_is_recognized() {
        assert!(ObjectId::zero().is_zero());
        assert!(
            !ObjectId::try_parse("0123456789abcdef0123456789abcdef01234567".to_string())
                .unwrap()
                .is_zero()
        );
    }
}
