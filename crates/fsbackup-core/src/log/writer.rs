//! Shard writer.

use super::{checksum, RecordType, BLOCK_SIZE, HEADER_SIZE};
use std::io::{self, Write};

/// Writes documents in the block log format.
///
/// Documents that do not fit in the current block are split into
/// `First`/`Middle`/`Last` records. When fewer than [`HEADER_SIZE`] bytes are
/// left in a block they are filled with zeros.
#[derive(Debug)]
pub struct ShardWriter<W> {
    sink: W,
    block_offset: usize,
    written: u64,
}

impl<W: Write> ShardWriter<W> {
    /// Creates a writer positioned at the start of a block
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            block_offset: 0,
            written: 0,
        }
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends one logical document.
    ///
    /// Empty documents are rejected: readers treat an empty document as block
    /// padding and skip the rest of its block.
    pub fn add_document(&mut self, document: &[u8]) -> io::Result<()> {
        if document.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty documents cannot be written",
            ));
        }

        let mut left = document;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                self.write_zeros(leftover)?;
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment = left.len().min(avail);
            let end = fragment == left.len();
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.add_record(record_type, &left[..fragment])?;
            left = &left[fragment..];
            begin = false;
            if end {
                return Ok(());
            }
        }
    }

    /// Emits a single physical record without fragmentation.
    ///
    /// The caller is responsible for the record fitting in the current block.
    pub fn add_record(&mut self, record_type: RecordType, payload: &[u8]) -> io::Result<()> {
        let room = BLOCK_SIZE - self.block_offset;
        if HEADER_SIZE + payload.len() > room {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "record of {} bytes does not fit in the {} bytes left in the block",
                    payload.len(),
                    room
                ),
            ));
        }

        let tag = record_type.to_byte();
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&checksum(payload, tag).to_le_bytes());
        header[4..6].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        header[6] = tag;

        self.sink.write_all(&header)?;
        self.sink.write_all(payload)?;
        self.block_offset += HEADER_SIZE + payload.len();
        self.written += (HEADER_SIZE + payload.len()) as u64;
        if self.block_offset == BLOCK_SIZE {
            self.block_offset = 0;
        }
        Ok(())
    }

    /// Fills the rest of the current block with zeros
    pub fn pad_block(&mut self) -> io::Result<()> {
        if self.block_offset != 0 {
            self.write_zeros(BLOCK_SIZE - self.block_offset)?;
            self.block_offset = 0;
        }
        Ok(())
    }

    /// Flushes and returns the sink
    pub fn finish(mut self) -> io::Result<W> {
        self.sink.flush()?;
        Ok(self.sink)
    }

    fn write_zeros(&mut self, len: usize) -> io::Result<()> {
        const ZEROS: [u8; HEADER_SIZE] = [0; HEADER_SIZE];
        let mut left = len;
        while left > 0 {
            let n = left.min(ZEROS.len());
            self.sink.write_all(&ZEROS[..n])?;
            left -= n;
        }
        self.written += len as u64;
        Ok(())
    }
}
