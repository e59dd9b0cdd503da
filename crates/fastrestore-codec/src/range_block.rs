//! Range (snapshot) file blocks.
//!
//! A range file is a sequence of independently decodable blocks. Every block
//! opens with the key where its coverage starts; the final block of the file
//! closes with the key where the file's coverage ends. A block that fills up
//! is padded with `0xFF`, and the next one opens by repeating the last pair
//! written, so stripping the first and last entry of every block yields each
//! pair exactly once.

use bytes::Bytes;

use crate::reader::BlockReader;
use crate::{CodecError, KeyValue, PADDING, Result};

/// Format tag at the start of every range block.
pub const RANGE_BLOCK_VERSION: i32 = 1001;

/// Entries decoded from one range block, boundary sentinels included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBlock {
    entries: Vec<KeyValue>,
}

impl RangeBlock {
    /// All entries in block order, sentinels included.
    pub fn entries(&self) -> &[KeyValue] {
        &self.entries
    }

    /// Key where this block's coverage starts.
    pub fn first_key(&self) -> &Bytes {
        // Decoding always yields the opening sentinel.
        &self.entries[0].key
    }

    /// Key where this block's coverage ends (inclusive).
    pub fn last_key(&self) -> &Bytes {
        &self.entries[self.entries.len() - 1].key
    }

    /// The data pairs, without the opening and closing entries.
    pub fn pairs(&self) -> &[KeyValue] {
        if self.entries.len() < 2 {
            return &[];
        }
        &self.entries[1..self.entries.len() - 1]
    }
}

/// Decodes one range-file block.
///
/// # Errors
///
/// - [`CodecError::UnsupportedVersion`] on a foreign format tag
/// - [`CodecError::CorruptedData`] if a length runs past the buffer
/// - [`CodecError::CorruptedPadding`] if the tail is not all `0xFF`
pub fn decode_range_block(data: &Bytes) -> Result<RangeBlock> {
    let mut reader = BlockReader::new(data);

    let tag = reader.i32_le()?;
    if tag != RANGE_BLOCK_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: tag,
            expected: RANGE_BLOCK_VERSION,
        });
    }

    let mut entries = vec![KeyValue::new(reader.net_prefixed()?, Bytes::new())];

    while !reader.at_block_end() {
        let key = reader.net_prefixed()?;
        if reader.at_block_end() {
            // A key with no value is the closing sentinel.
            entries.push(KeyValue::new(key, Bytes::new()));
            break;
        }
        let value = reader.net_prefixed()?;
        entries.push(KeyValue::new(key, value));
    }

    reader.expect_padding()?;
    Ok(RangeBlock { entries })
}

// ============================================================================
// Writer
// ============================================================================

/// Builds a range file in memory, block by block.
///
/// Call [`write_key`](Self::write_key) with the begin key, then
/// [`write_kv`](Self::write_kv) for each pair in key order, then
/// [`write_key`](Self::write_key) with the end key.
#[derive(Debug)]
pub struct RangeFileWriter {
    block_size: u32,
    buf: Vec<u8>,
    block_end: usize,
    first_key: Option<Bytes>,
    last_pair: Option<KeyValue>,
}

impl RangeFileWriter {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size,
            buf: Vec::new(),
            block_end: 0,
            first_key: None,
            last_pair: None,
        }
    }

    /// Writes a begin or end key.
    pub fn write_key(&mut self, key: &[u8]) -> Result<()> {
        self.new_block_if_needed(4 + key.len())?;
        if self.first_key.is_none() {
            self.first_key = Some(Bytes::copy_from_slice(key));
        }
        put_net(&mut self.buf, key);
        Ok(())
    }

    pub fn write_kv(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.new_block_if_needed(8 + key.len() + value.len())?;
        put_net(&mut self.buf, key);
        put_net(&mut self.buf, value);
        self.last_pair = Some(KeyValue::new(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
        ));
        Ok(())
    }

    /// Returns the file contents. The last block is not padded.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn new_block_if_needed(&mut self, needed: usize) -> Result<()> {
        if self.buf.len() + needed > self.block_end {
            self.new_block(needed)?;
        }
        Ok(())
    }

    fn new_block(&mut self, needed: usize) -> Result<()> {
        self.buf.resize(self.block_end, PADDING);
        let first_block = self.block_end == 0;
        self.block_end += self.block_size as usize;
        self.buf.extend_from_slice(&RANGE_BLOCK_VERSION.to_le_bytes());

        if !first_block {
            // Re-open the block with the pair the previous block ended on.
            match &self.last_pair {
                Some(pair) => {
                    put_net(&mut self.buf, &pair.key);
                    put_net(&mut self.buf, &pair.key);
                    put_net(&mut self.buf, &pair.value);
                }
                None => {
                    let begin = self.first_key.clone().unwrap_or_default();
                    put_net(&mut self.buf, &begin);
                }
            }
        }

        if self.buf.len() + needed > self.block_end {
            return Err(CodecError::BadBlockSize {
                block_size: self.block_size,
                needed,
            });
        }
        Ok(())
    }
}

/// Encodes a whole range file covering `[begin, end)` holding `pairs`.
pub fn encode_range_file(
    begin: &[u8],
    pairs: &[KeyValue],
    end: &[u8],
    block_size: u32,
) -> Result<Vec<u8>> {
    let mut writer = RangeFileWriter::new(block_size);
    writer.write_key(begin)?;
    for pair in pairs {
        writer.write_kv(&pair.key, &pair.value)?;
    }
    writer.write_key(end)?;
    Ok(writer.finish())
}

fn put_net(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}
