//! Low-level protobuf wire format primitives.
//!
//! Every field is a varint tag (`field_id << 3 | wire_type`) followed by a
//! value whose layout depends on the wire type:
//! - 0: VARINT (int32, int64, bool, enum)
//! - 1: I64 (fixed64, double)
//! - 2: LEN (string, bytes, embedded messages)
//! - 3/4: group start / group end markers
//! - 5: I32 (fixed32, float; only seen in export metadata)
//!
//! All readers take the buffer, a cursor and an exclusive end bound so that a
//! nested message can never read past its enclosing length.

use crate::error::{Error, Result};

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group
    StartGroup = 3,
    /// End group
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            _ => Err(Error::UnknownWireType {
                wire_type: value,
                offset: 0,
            }),
        }
    }
}

/// A decoded field tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Field id
    pub field: u32,
    /// Wire type
    pub wire_type: WireType,
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            // Varints are at most 10 bytes for a 64-bit value
            return Err(Error::invalid_wire_format(i, "varint longer than 10 bytes"));
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(Error::invalid_wire_format(data.len(), "truncated varint"))
}

/// Read a varint at `*pos`, never looking at or past `end`.
pub fn read_varint(buf: &[u8], pos: &mut usize, end: usize) -> Result<u64> {
    let start = *pos;
    let (value, len) = decode_varint(&buf[start..end])
        .map_err(|_| Error::invalid_wire_format(start, "truncated or overlong varint"))?;
    *pos += len;
    Ok(value)
}

/// Read a field tag at `*pos`.
pub fn read_tag(buf: &[u8], pos: &mut usize, end: usize) -> Result<Tag> {
    let start = *pos;
    let raw = read_varint(buf, pos, end)?;
    let wire_type = WireType::try_from((raw & 0x07) as u8).map_err(|_| Error::UnknownWireType {
        wire_type: (raw & 0x07) as u8,
        offset: start,
    })?;
    Ok(Tag {
        field: (raw >> 3) as u32,
        wire_type,
    })
}

/// Read a little-endian fixed 64-bit value.
pub fn read_fixed64(buf: &[u8], pos: &mut usize, end: usize) -> Result<u64> {
    let bytes = take(buf, pos, end, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

/// Read a little-endian fixed 32-bit value.
pub fn read_fixed32(buf: &[u8], pos: &mut usize, end: usize) -> Result<u32> {
    let bytes = take(buf, pos, end, 4)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(raw))
}

/// Read a length prefix and check that the payload fits before `end`.
///
/// The cursor is left on the first payload byte.
pub fn read_len(buf: &[u8], pos: &mut usize, end: usize) -> Result<usize> {
    let start = *pos;
    let len = read_varint(buf, pos, end)?;
    let len = usize::try_from(len)
        .map_err(|_| Error::invalid_wire_format(start, "length prefix overflows usize"))?;
    if len > end - *pos {
        return Err(Error::invalid_wire_format(
            start,
            format!("length {} exceeds remaining {} bytes", len, end - *pos),
        ));
    }
    Ok(len)
}

/// Advance past `len` bytes, returning them.
pub fn take<'a>(buf: &'a [u8], pos: &mut usize, end: usize, len: usize) -> Result<&'a [u8]> {
    let start = *pos;
    if len > end - start {
        return Err(Error::invalid_wire_format(
            start,
            format!("need {} bytes, have {}", len, end - start),
        ));
    }
    *pos += len;
    Ok(&buf[start..start + len])
}

/// Skip the value of a field whose tag was just read.
///
/// Groups are skipped through their matching end marker, counting nested
/// groups. An `EndGroup` tag has no value and skips nothing.
pub fn skip_value(buf: &[u8], pos: &mut usize, end: usize, wire_type: WireType) -> Result<()> {
    match wire_type {
        WireType::Varint => {
            read_varint(buf, pos, end)?;
        }
        WireType::I64 => {
            take(buf, pos, end, 8)?;
        }
        WireType::Len => {
            let len = read_len(buf, pos, end)?;
            *pos += len;
        }
        WireType::I32 => {
            take(buf, pos, end, 4)?;
        }
        WireType::EndGroup => {}
        WireType::StartGroup => {
            let mut depth = 1usize;
            while depth > 0 {
                if *pos >= end {
                    return Err(Error::invalid_wire_format(*pos, "unterminated group"));
                }
                let tag = read_tag(buf, pos, end)?;
                match tag.wire_type {
                    WireType::StartGroup => depth += 1,
                    WireType::EndGroup => depth -= 1,
                    other => skip_value(buf, pos, end, other)?,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_varint_single_byte() {
        let data = [0x08]; // Value 8
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, 8);
        assert_eq!(len, 1);
    }

    #[test]
    fn test_decode_varint_multi_byte() {
        let data = [0xAC, 0x02]; // Value 300
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, 300);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_decode_varint_max() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let (value, len) = decode_varint(&data).unwrap();
        assert_eq!(value, u64::MAX);
        assert_eq!(len, 10);
    }

    #[test]
    fn test_read_varint_respects_end() {
        // 300 encoded, but the bound cuts the continuation byte off
        let data = [0xAC, 0x02];
        let mut pos = 0;
        assert!(read_varint(&data, &mut pos, 1).is_err());
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_wire_type_conversion() {
        assert_eq!(WireType::try_from(0).unwrap(), WireType::Varint);
        assert_eq!(WireType::try_from(3).unwrap(), WireType::StartGroup);
        assert_eq!(WireType::try_from(4).unwrap(), WireType::EndGroup);
        assert!(WireType::try_from(6).is_err());
        assert!(WireType::try_from(7).is_err());
    }

    #[test]
    fn test_read_tag_reports_offset() {
        let data = [0x08, 0x01, 0x0F];
        let mut pos = 2;
        match read_tag(&data, &mut pos, data.len()) {
            Err(Error::UnknownWireType { wire_type, offset }) => {
                assert_eq!(wire_type, 7);
                assert_eq!(offset, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_read_len_bounds() {
        // length 5 but only 3 payload bytes
        let data = [0x05, b'a', b'b', b'c'];
        let mut pos = 0;
        assert!(read_len(&data, &mut pos, data.len()).is_err());

        let data = [0x03, b'a', b'b', b'c'];
        let mut pos = 0;
        assert_eq!(read_len(&data, &mut pos, data.len()).unwrap(), 3);
        assert_eq!(pos, 1);
    }

    #[test]
    fn test_skip_nested_group() {
        // group 1 { varint 2 = 1, group 3 { len 4 = "x" } } then varint 5 = 9
        let data = [
            0x10, 0x01, // field 2 varint
            0x1B, // field 3 start group
            0x22, 0x01, b'x', // field 4 len
            0x1C, // field 3 end group
            0x0C, // field 1 end group
            0x28, 0x09,
        ];
        let mut pos = 0;
        skip_value(&data, &mut pos, data.len(), WireType::StartGroup).unwrap();
        assert_eq!(pos, 8);
        let tag = read_tag(&data, &mut pos, data.len()).unwrap();
        assert_eq!(tag.field, 5);
        assert_eq!(read_varint(&data, &mut pos, data.len()).unwrap(), 9);
    }

    #[test]
    fn test_skip_unterminated_group() {
        let data = [0x10, 0x01];
        let mut pos = 0;
        assert!(skip_value(&data, &mut pos, data.len(), WireType::StartGroup).is_err());
    }

    #[test]
    fn test_read_fixed64() {
        let bytes = 1.5f64.to_le_bytes();
        let mut pos = 0;
        let raw = read_fixed64(&bytes, &mut pos, bytes.len()).unwrap();
        assert_eq!(f64::from_bits(raw), 1.5);
        assert_eq!(pos, 8);
        let mut pos = 1;
        assert!(read_fixed64(&bytes, &mut pos, bytes.len()).is_err());
    }
}
