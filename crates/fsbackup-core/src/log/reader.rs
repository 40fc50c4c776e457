//! Shard reader: block buffer, record framing and document reassembly.

use super::{checksum, RecordType, BLOCK_SIZE, HEADER_SIZE};
use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Configuration for the shard reader
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Compare non-zero stored checksums against the payload
    pub verify_checksums: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

impl ReaderConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether checksums are verified
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }
}

/// One physical record, borrowed from the current block
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Record type
    pub record_type: RecordType,
    /// Payload bytes
    pub payload: &'a [u8],
    /// File offset of the record header
    pub offset: u64,
}

/// Sequential reader over one shard.
///
/// The reader owns its source and a single block buffer. It is strictly
/// position dependent and must be driven from one thread.
#[derive(Debug)]
pub struct ShardReader<R> {
    source: R,
    path: PathBuf,
    file_len: u64,
    // bytes pulled from the source so far
    file_pos: u64,
    block: Box<[u8]>,
    block_len: usize,
    cursor: usize,
    config: ReaderConfig,
}

impl ShardReader<File> {
    /// Opens a shard file
    pub fn open(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let len = file.metadata().map_err(|e| Error::io(path, e))?.len();
        Ok(Self::new(file, len, config).with_path(path))
    }
}

impl<R: Read> ShardReader<R> {
    /// Wraps a source of `len` bytes
    pub fn new(source: R, len: u64, config: ReaderConfig) -> Self {
        Self {
            source,
            path: PathBuf::new(),
            file_len: len,
            file_pos: 0,
            block: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            block_len: 0,
            // forces a refill before the first header
            cursor: BLOCK_SIZE,
            config,
        }
    }

    /// Sets the path reported in I/O errors
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// The path given at open time
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total length of the source
    pub fn len(&self) -> u64 {
        self.file_len
    }

    /// True if the source is empty
    pub fn is_empty(&self) -> bool {
        self.file_len == 0
    }

    /// File offset of the cursor
    pub fn position(&self) -> u64 {
        self.block_start() + self.cursor as u64
    }

    /// True once every byte of the source has been consumed
    pub fn is_at_end(&self) -> bool {
        self.cursor >= self.block_len && self.file_pos >= self.file_len
    }

    fn block_start(&self) -> u64 {
        self.file_pos - self.block_len as u64
    }

    /// Refills the block if a header no longer fits before the block boundary
    fn ensure_header_available(&mut self) -> Result<()> {
        if BLOCK_SIZE.saturating_sub(self.cursor) >= HEADER_SIZE {
            return Ok(());
        }

        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.source.read(&mut self.block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(&self.path, e)),
            }
        }

        self.file_pos += filled as u64;
        self.block_len = filled;
        self.cursor = 0;
        trace!(
            "read block at {} ({} bytes) from {}",
            self.block_start(),
            filled,
            self.path.display()
        );
        Ok(())
    }

    /// Reads the next physical record.
    pub fn read_record(&mut self) -> Result<Record<'_>> {
        self.ensure_header_available()?;

        let offset = self.position();
        if self.cursor >= self.block_len || self.block_len - self.cursor < HEADER_SIZE {
            return Err(Error::PrematureEndOfInput { offset });
        }

        let header = &self.block[self.cursor..self.cursor + HEADER_SIZE];
        let stored = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let length = u16::from_le_bytes([header[4], header[5]]) as usize;
        let tag = header[6];

        let start = self.cursor + HEADER_SIZE;
        let end = start + length;
        if end > self.block_len {
            return Err(Error::PrematureEndOfInput {
                offset: self.block_start() + self.block_len as u64,
            });
        }

        let payload = &self.block[start..end];
        if self.config.verify_checksums && stored != 0 {
            let computed = checksum(payload, tag);
            if computed != stored {
                return Err(Error::ChecksumMismatch {
                    offset,
                    stored,
                    computed,
                });
            }
        }
        let record_type = RecordType::from_byte(tag).ok_or(Error::UnknownRecordType {
            record_type: tag,
            offset,
        })?;

        trace!("record {:?} of {} bytes at {}", record_type, length, offset);
        self.cursor = end;
        Ok(Record {
            record_type,
            payload: &self.block[start..end],
            offset,
        })
    }

    /// Reads records up to the next terminator and returns the reassembled
    /// document. A `Zero` record yields an empty document.
    ///
    /// Afterwards the cursor moves to the next block boundary if the document
    /// was empty or the block has no room left for another header.
    pub fn read_document(&mut self) -> Result<Bytes> {
        let mut document = BytesMut::new();
        loop {
            let record = self.read_record()?;
            document.extend_from_slice(record.payload);
            if record.record_type.is_terminal() {
                break;
            }
        }

        let remaining = BLOCK_SIZE - self.cursor % BLOCK_SIZE;
        if document.is_empty() || remaining < HEADER_SIZE {
            // the cursor never passes BLOCK_SIZE, so this is the next boundary
            self.cursor = BLOCK_SIZE;
            trace!("skipping block tail, resuming at {}", self.position());
        }
        Ok(document.freeze())
    }

    /// Iterates over the non-empty documents until end of input.
    ///
    /// The iterator stops after the first error.
    pub fn documents(&mut self) -> Documents<'_, R> {
        Documents {
            reader: self,
            failed: false,
        }
    }
}

/// Iterator over the documents of a shard, see [`ShardReader::documents`]
#[derive(Debug)]
pub struct Documents<'r, R> {
    reader: &'r mut ShardReader<R>,
    failed: bool,
}

impl<R: Read> Iterator for Documents<'_, R> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while !self.reader.is_at_end() {
            match self.reader.read_document() {
                Ok(document) if document.is_empty() => continue,
                Ok(document) => return Some(Ok(document)),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::ShardWriter;
    use std::io::Cursor;

    fn reader(bytes: Vec<u8>) -> ShardReader<Cursor<Vec<u8>>> {
        reader_with(bytes, ReaderConfig::default())
    }

    fn reader_with(bytes: Vec<u8>, config: ReaderConfig) -> ShardReader<Cursor<Vec<u8>>> {
        let len = bytes.len() as u64;
        ShardReader::new(Cursor::new(bytes), len, config)
    }

    fn raw_record(crc: u32, record_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = crc.to_le_bytes().to_vec();
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.push(record_type);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_single_full_document() {
        let mut writer = ShardWriter::new(Vec::new());
        writer.add_document(b"only").unwrap();
        let mut reader = reader(writer.finish().unwrap());

        assert!(!reader.is_at_end());
        assert_eq!(reader.read_document().unwrap(), Bytes::from_static(b"only"));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_first_middle_last() {
        let mut writer = ShardWriter::new(Vec::new());
        writer.add_record(RecordType::First, b"ab").unwrap();
        writer.add_record(RecordType::Middle, b"cd").unwrap();
        writer.add_record(RecordType::Last, b"ef").unwrap();
        let mut reader = reader(writer.finish().unwrap());

        assert_eq!(reader.read_document().unwrap(), Bytes::from_static(b"abcdef"));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_document_spanning_blocks() {
        let document: Vec<u8> = (0..BLOCK_SIZE * 3).map(|i| (i % 251) as u8).collect();
        let mut writer = ShardWriter::new(Vec::new());
        writer.add_document(&document).unwrap();
        writer.add_document(b"tail").unwrap();
        let mut reader = reader(writer.finish().unwrap());

        let read = reader.read_document().unwrap();
        assert_eq!(read.len(), document.len());
        assert_eq!(&read[..], &document[..]);
        assert_eq!(reader.read_document().unwrap(), Bytes::from_static(b"tail"));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_zero_record_skips_to_next_block() {
        let mut writer = ShardWriter::new(Vec::new());
        writer.add_record(RecordType::Zero, &[]).unwrap();
        writer.pad_block().unwrap();
        writer.add_document(b"second block").unwrap();
        let mut reader = reader(writer.finish().unwrap());

        assert!(reader.read_document().unwrap().is_empty());
        assert_eq!(reader.position(), BLOCK_SIZE as u64);
        assert_eq!(
            reader.read_document().unwrap(),
            Bytes::from_static(b"second block")
        );
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_short_tail_skips_to_next_block() {
        let mut writer = ShardWriter::new(Vec::new());
        writer
            .add_document(&vec![7; BLOCK_SIZE - HEADER_SIZE - 3])
            .unwrap();
        writer.add_document(b"next").unwrap();
        let mut reader = reader(writer.finish().unwrap());

        reader.read_document().unwrap();
        assert_eq!(reader.position(), BLOCK_SIZE as u64);
        let record = reader.read_record().unwrap();
        assert_eq!(record.offset, BLOCK_SIZE as u64);
        assert_eq!(record.payload, b"next");
    }

    #[test]
    fn test_zero_padding_is_never_parsed() {
        // the padding bytes would decode as a zero-type header if read
        let mut writer = ShardWriter::new(Vec::new());
        writer
            .add_document(&vec![7; BLOCK_SIZE - HEADER_SIZE - 6])
            .unwrap();
        writer.add_document(b"x").unwrap();
        let mut reader = reader(writer.finish().unwrap());

        let docs: Vec<Bytes> = reader.documents().collect::<Result<_>>().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1], Bytes::from_static(b"x"));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut writer = ShardWriter::new(Vec::new());
        writer.add_document(b"payload").unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes[HEADER_SIZE] ^= 0xFF;

        let mut strict = reader(bytes.clone());
        assert!(matches!(
            strict.read_document(),
            Err(Error::ChecksumMismatch { offset: 0, .. })
        ));

        let mut lenient = reader_with(bytes, ReaderConfig::new().verify_checksums(false));
        assert_eq!(lenient.read_document().unwrap().len(), 7);
    }

    #[test]
    fn test_zero_checksum_is_unchecked() {
        let bytes = raw_record(0, RecordType::Full.to_byte(), b"anything");
        let mut reader = reader(bytes);
        assert_eq!(reader.read_document().unwrap(), Bytes::from_static(b"anything"));
    }

    #[test]
    fn test_unknown_record_type() {
        let bytes = raw_record(0, 9, b"zz");
        let mut reader = reader(bytes);
        assert!(matches!(
            reader.read_document(),
            Err(Error::UnknownRecordType {
                record_type: 9,
                offset: 0
            })
        ));
    }

    #[test]
    fn test_payload_past_end() {
        let mut bytes = raw_record(0, RecordType::Full.to_byte(), b"short");
        bytes[4] = 100;
        let mut reader = reader(bytes);
        assert!(matches!(
            reader.read_record(),
            Err(Error::PrematureEndOfInput { .. })
        ));
    }

    #[test]
    fn test_unterminated_document() {
        let mut writer = ShardWriter::new(Vec::new());
        writer.add_record(RecordType::First, b"ab").unwrap();
        let mut reader = reader(writer.finish().unwrap());
        assert!(matches!(
            reader.read_document(),
            Err(Error::PrematureEndOfInput { offset: 9 })
        ));
    }

    #[test]
    fn test_empty_source() {
        let mut reader = reader(Vec::new());
        assert!(reader.is_at_end());
        assert_eq!(reader.documents().count(), 0);
        assert!(matches!(
            reader.read_record(),
            Err(Error::PrematureEndOfInput { offset: 0 })
        ));
    }

    #[test]
    fn test_documents_stop_after_error() {
        let mut bytes = Vec::new();
        let mut writer = ShardWriter::new(&mut bytes);
        writer.add_document(b"good").unwrap();
        writer.finish().unwrap();
        bytes.extend(raw_record(0, 8, b"bad"));
        bytes.extend(raw_record(0, 1, b"never"));

        let mut reader = reader(bytes);
        let mut docs = reader.documents();
        assert_eq!(docs.next().unwrap().unwrap(), Bytes::from_static(b"good"));
        assert!(docs.next().unwrap().is_err());
        assert!(docs.next().is_none());
    }

    #[test]
    fn test_open_missing_file() {
        let err = ShardReader::open("/nonexistent/output-0", ReaderConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
