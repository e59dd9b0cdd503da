//! Log (mutation stream) file blocks.

use bytes::Bytes;

use crate::reader::BlockReader;
use crate::{CodecError, KeyValue, PADDING, Result};

/// Format tag at the start of every log block.
pub const LOG_BLOCK_VERSION: i32 = 2001;

/// Decodes one log-file block into its raw key-value pairs.
///
/// # Errors
///
/// - [`CodecError::UnsupportedVersion`] on a foreign format tag
/// - [`CodecError::CorruptedData`] if a length runs past the buffer
/// - [`CodecError::CorruptedPadding`] if the tail is not all `0xFF`
pub fn decode_log_block(data: &Bytes) -> Result<Vec<KeyValue>> {
    let mut reader = BlockReader::new(data);

    let tag = reader.i32_le()?;
    if tag != LOG_BLOCK_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: tag,
            expected: LOG_BLOCK_VERSION,
        });
    }

    let mut pairs = Vec::new();
    while !reader.at_block_end() {
        let key = reader.net_prefixed()?;
        let value = reader.net_prefixed()?;
        pairs.push(KeyValue::new(key, value));
    }

    reader.expect_padding()?;
    Ok(pairs)
}

/// Builds a log file in memory, block by block.
#[derive(Debug)]
pub struct LogFileWriter {
    block_size: u32,
    buf: Vec<u8>,
    block_end: usize,
}

impl LogFileWriter {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size,
            buf: Vec::new(),
            block_end: 0,
        }
    }

    /// Appends a pair, starting a new block if it does not fit.
    pub fn write_kv(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let needed = 8 + key.len() + value.len();
        if self.buf.len() + needed > self.block_end {
            self.buf.resize(self.block_end, PADDING);
            self.block_end += self.block_size as usize;
            self.buf.extend_from_slice(&LOG_BLOCK_VERSION.to_le_bytes());
        }

        self.buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(value);

        if self.buf.len() > self.block_end {
            return Err(CodecError::BadBlockSize {
                block_size: self.block_size,
                needed,
            });
        }
        Ok(())
    }

    /// Returns the file contents. The last block is not padded.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
