//! Block-structured record log.
//!
//! Export shards use the LevelDB log layout:
//!
//! ```text
//! +---------+---------+-----+---------+
//! | Block 1 | Block 2 | ... | Block n |    32768 bytes each, the last may be short
//! +---------+---------+-----+---------+
//!
//! record: | checksum u32 LE | length u16 LE | type u8 | payload (length bytes) |
//! ```
//!
//! A logical document is either one `Full` record or a `First`, any number of
//! `Middle`, and a `Last` record, possibly spanning blocks. A block tail shorter
//! than a header is zero padding.

mod reader;
mod writer;

pub use reader::{Documents, Record, ReaderConfig, ShardReader};
pub use writer::ShardWriter;

/// Physical block size
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: checksum (4) + length (2) + type (1)
pub const HEADER_SIZE: usize = 7;

/// Largest payload a single record can carry
pub const MAX_RECORD_SIZE: usize = BLOCK_SIZE - HEADER_SIZE;

const MASK_DELTA: u32 = 0xA282_EAD8;

/// Record type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Padding / preallocated space; terminates with an empty document
    Zero = 0,
    /// A complete document
    Full = 1,
    /// First chunk of a document
    First = 2,
    /// Interior chunk
    Middle = 3,
    /// Final chunk
    Last = 4,
}

impl RecordType {
    /// Parses a type tag
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    /// The on-disk tag
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// True for types that complete a document
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordType::Full | RecordType::Last | RecordType::Zero)
    }
}

/// Masked CRC32C of a record.
///
/// The CRC covers the payload extended from the CRC of the single type byte,
/// then gets the log format's rotate-and-add mask. A stored value of zero
/// means "not checked" and is never produced on purpose by writers.
pub fn checksum(payload: &[u8], record_type: u8) -> u32 {
    let seed = crc32c::crc32c(&[record_type]);
    mask(crc32c::crc32c_append(seed, payload))
}

/// Applies the log format's checksum mask
#[inline]
pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_roundtrip() {
        for rt in [
            RecordType::Zero,
            RecordType::Full,
            RecordType::First,
            RecordType::Middle,
            RecordType::Last,
        ] {
            assert_eq!(RecordType::from_byte(rt.to_byte()), Some(rt));
        }
        assert_eq!(RecordType::from_byte(5), None);
        assert_eq!(RecordType::from_byte(255), None);
    }

    #[test]
    fn test_constants() {
        assert_eq!(BLOCK_SIZE, 32768);
        assert_eq!(HEADER_SIZE, 7);
        assert_eq!(MAX_RECORD_SIZE, BLOCK_SIZE - HEADER_SIZE);
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(0), MASK_DELTA);
        let crc = 0x1234_5678u32;
        assert_eq!(mask(crc), ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA));
    }

    #[test]
    fn test_checksum_is_seeded_by_type() {
        let payload = b"some payload";
        assert_eq!(checksum(payload, 1), checksum(payload, 1));
        assert_ne!(checksum(payload, 1), checksum(payload, 2));
        // seeding with the type crc is the same as prefixing the type byte
        assert_eq!(checksum(b"s", 1), mask(crc32c::crc32c(&[1, b's'])));
    }

    #[test]
    fn test_checksum_payload_sensitive() {
        let a = checksum(b"payload-a", 1);
        let b = checksum(b"payload-b", 1);
        assert_ne!(a, b);
    }
}
