//! Bounds-checked cursor over a block buffer.

use bytes::Bytes;

use crate::{CodecError, PADDING, Result};

/// Reads length-prefixed fields from a block without copying.
///
/// Every read is bounds-checked; running past the end yields
/// [`CodecError::CorruptedData`].
pub(crate) struct BlockReader<'a> {
    data: &'a Bytes,
    pos: usize,
}

impl<'a> BlockReader<'a> {
    pub(crate) fn new(data: &'a Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// True at EOF or when the next byte is block padding.
    pub(crate) fn at_block_end(&self) -> bool {
        self.data.get(self.pos).is_none_or(|&b| b == PADDING)
    }

    pub(crate) fn consume(&mut self, len: usize) -> Result<Bytes> {
        let available = self.data.len().saturating_sub(self.pos);
        if len > available {
            return Err(CodecError::CorruptedData {
                offset: self.pos,
                needed: len,
                available,
            });
        }
        let out = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let offset = self.pos;
        let bytes = self.consume(N)?;
        bytes[..].try_into().map_err(|_| CodecError::CorruptedData {
            offset,
            needed: N,
            available: bytes.len(),
        })
    }

    pub(crate) fn i32_le(&mut self) -> Result<i32> {
        self.array().map(i32::from_le_bytes)
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn u64_le(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    /// Reads a big-endian ("network order") `u32`.
    pub(crate) fn u32_be(&mut self) -> Result<u32> {
        self.array().map(u32::from_be_bytes)
    }

    /// Reads a big-endian length followed by that many bytes.
    pub(crate) fn net_prefixed(&mut self) -> Result<Bytes> {
        let len = self.u32_be()? as usize;
        self.consume(len)
    }

    /// Checks that the rest of the buffer is padding.
    pub(crate) fn expect_padding(&self) -> Result<()> {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        match rest.iter().position(|&b| b != PADDING) {
            Some(i) => Err(CodecError::CorruptedPadding {
                offset: self.pos + i,
                byte: rest[i],
            }),
            None => Ok(()),
        }
    }
}
