//! Export manifest reader.
//!
//! An export writes one `*.export_metadata` file per kind, next to its
//! `output-N` shards. The metadata is a small protobuf message with no
//! published schema, so it is read generically: every length-delimited value
//! is kept as raw bytes and, when it looks like a message, also parsed as one.
//! Shard names are the text values of sub-field 2 inside each top-level
//! field 2.

use crate::decode::{
    read_fixed32, read_fixed64, read_len, read_tag, read_varint, WireType, MAX_DEPTH,
};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

const SHARD_LIST_FIELD: u32 = 2;
const SHARD_NAME_FIELD: u32 = 2;

/// A generically decoded field
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    /// Field id
    pub id: u32,
    /// Decoded value
    pub value: RawValue,
}

/// Value of a generically decoded field
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Varint
    Int(u64),
    /// fixed64, read as a double
    Double(f64),
    /// fixed32, read as a float
    Float(f32),
    /// Length-delimited payload
    Bytes {
        /// The payload
        raw: Bytes,
        /// The payload parsed as a message, when that succeeded
        fields: Option<Vec<RawField>>,
    },
}

impl RawValue {
    /// The payload as text, if it is printable UTF-8
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Bytes { raw, .. } => std::str::from_utf8(raw)
                .ok()
                .filter(|s| !s.is_empty() && !s.chars().any(char::is_control)),
            _ => None,
        }
    }

    /// Nested fields, if the payload parsed as a message
    pub fn fields(&self) -> Option<&[RawField]> {
        match self {
            RawValue::Bytes {
                fields: Some(fields),
                ..
            } => Some(fields),
            _ => None,
        }
    }
}

/// Decodes a buffer without a schema.
pub fn decode_raw(buf: &Bytes) -> Result<Vec<RawField>> {
    decode_range(buf, 0, buf.len(), 0)
}

fn decode_range(buf: &Bytes, start: usize, end: usize, depth: usize) -> Result<Vec<RawField>> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimit { limit: MAX_DEPTH });
    }

    let mut fields = Vec::new();
    let mut pos = start;
    while pos < end {
        let tag_offset = pos;
        let tag = read_tag(buf, &mut pos, end)?;
        let value = match tag.wire_type {
            WireType::Varint => RawValue::Int(read_varint(buf, &mut pos, end)?),
            WireType::I64 => RawValue::Double(f64::from_bits(read_fixed64(buf, &mut pos, end)?)),
            WireType::I32 => RawValue::Float(f32::from_bits(read_fixed32(buf, &mut pos, end)?)),
            WireType::Len => {
                let len = read_len(buf, &mut pos, end)?;
                let raw = buf.slice(pos..pos + len);
                let nested = match raw.first() {
                    Some(first) if matches!(first & 0x07, 0 | 2) => {
                        decode_range(buf, pos, pos + len, depth + 1).ok()
                    }
                    _ => None,
                };
                pos += len;
                RawValue::Bytes {
                    raw,
                    fields: nested,
                }
            }
            WireType::StartGroup | WireType::EndGroup => {
                return Err(Error::UnknownWireType {
                    wire_type: tag.wire_type as u8,
                    offset: tag_offset,
                });
            }
        };
        fields.push(RawField { id: tag.field, value });
    }
    Ok(fields)
}

/// Extracts shard filenames from manifest bytes, in order.
pub fn filenames_from_bytes(buf: &Bytes) -> Result<Vec<String>> {
    let fields = decode_raw(buf)?;
    let names = fields
        .iter()
        .filter(|f| f.id == SHARD_LIST_FIELD)
        .filter_map(|f| f.value.fields())
        .flatten()
        .filter(|f| f.id == SHARD_NAME_FIELD)
        .filter_map(|f| f.value.as_text())
        .map(str::to_string)
        .collect();
    Ok(names)
}

/// Reads a manifest and returns its shard filenames, relative to the
/// manifest's directory.
pub fn shard_filenames(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let names = filenames_from_bytes(&Bytes::from(data))?;
    debug!("{} lists {} shard(s)", path.display(), names.len());
    Ok(names)
}

/// Reads a manifest and resolves its shard filenames to paths.
pub fn shard_paths(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(shard_filenames(path)?
        .into_iter()
        .map(|name| dir.join(name))
        .collect())
}
