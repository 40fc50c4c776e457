//! Error types for the fsbackup-core library.
//!
//! Errors fall into two scopes. Framing errors (I/O, checksum, record type,
//! premature end) poison the shard they were raised on: the log format has no
//! resynchronisation marker, so the reader cannot continue. Decode errors are
//! scoped to a single document and may be skipped by the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fsbackup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all fsbackup operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to open or read a shard or manifest file
    #[error("failed to read '{path}': {source}")]
    Io {
        /// Path of the file being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Stored record checksum disagrees with the computed one
    #[error("checksum mismatch at offset {offset}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// File offset of the record header
        offset: u64,
        /// Checksum found in the header
        stored: u32,
        /// Checksum computed over the payload
        computed: u32,
    },

    /// Record type tag outside the five defined values
    #[error("unknown record type {record_type} at offset {offset}")]
    UnknownRecordType {
        /// The offending tag
        record_type: u8,
        /// File offset of the record header
        offset: u64,
    },

    /// The input ended before a header or payload was complete
    #[error("premature end of input at offset {offset}")]
    PrematureEndOfInput {
        /// File offset where more bytes were expected
        offset: u64,
    },

    /// Wire type outside the set the entity schema uses
    #[error("unknown wire type {wire_type} at offset {offset}")]
    UnknownWireType {
        /// The 3-bit wire type
        wire_type: u8,
        /// Byte offset within the document
        offset: usize,
    },

    /// Malformed wire data (truncated varint, length past its bound, ...)
    #[error("invalid wire format at offset {offset}: {details}")]
    InvalidWireFormat {
        /// Byte offset within the document
        offset: usize,
        /// Description of the problem
        details: String,
    },

    /// Field id absent from the schema while unknown fields are rejected
    #[error("unknown field {field} in message {message} at offset {offset}")]
    UnknownField {
        /// The field id
        field: u32,
        /// Name of the message being decoded
        message: &'static str,
        /// Byte offset within the document
        offset: usize,
    },

    /// Messages or groups nested deeper than the decoder allows
    #[error("message nesting exceeds depth {limit}")]
    RecursionLimit {
        /// The configured limit
        limit: usize,
    },

    /// The static schema description could not be resolved
    #[error("invalid schema: {0}")]
    Schema(String),
}

impl Error {
    /// Creates a new I/O error for the given path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new wire format error
    pub fn invalid_wire_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidWireFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Returns true if the error only affects the document being decoded.
    ///
    /// Everything else leaves the shard reader at an unknown position.
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            Self::UnknownWireType { .. }
                | Self::InvalidWireFormat { .. }
                | Self::UnknownField { .. }
                | Self::RecursionLimit { .. }
        )
    }
}
