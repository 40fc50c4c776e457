//! # fsbackup-core
//!
//! A library for reading Firestore/Datastore export backups without a
//! reflective protobuf runtime.
//!
//! This crate provides the core functionality for:
//! - Reading the block-structured record log of export shards, with checksum
//!   validation and multi-record document reassembly
//! - Decoding entity documents against a static message schema
//! - Discovering shard files from an export manifest and reading them in
//!   parallel
//!
//! ## Architecture
//!
//! - [`log`]: block reader, record framing, document reassembly and writer
//! - [`schema`]: the entity message family, resolved into an id-indexed tree
//! - [`decode`]: wire helpers, the decoded value model and the decoder
//! - [`manifest`]: shard filename discovery
//! - [`export`]: per-shard and per-export orchestration
//! - [`encode`]: entity document builder for fixtures
//! - [`error`]: error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use fsbackup_core::{read_export, ExportConfig};
//!
//! let config = ExportConfig::new().concurrency(4);
//! let summary = read_export(
//!     "backup/all_namespaces/kind_Channel/all_namespaces_kind_Channel.export_metadata",
//!     &config,
//!     |entity| println!("{:?}", entity.key()),
//! )?;
//! println!("{} entities", summary.entities());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod export;
pub mod log;
pub mod manifest;
pub mod schema;

// Re-export primary types for convenience
pub use decode::{Decoder, DecoderConfig, Entity, UnknownFieldPolicy, Value};
pub use error::{Error, Result};
pub use export::{
    read_export, read_shard, read_shards, DecodeErrorPolicy, ExportConfig, ExportSummary,
    ShardFailure, ShardStats,
};
pub use log::{ReaderConfig, ShardReader, ShardWriter};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
