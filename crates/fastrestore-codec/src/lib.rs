//! # fastrestore-codec: Backup file formats
//!
//! Pure decoders (and the matching writers) for the byte formats a restore
//! reads out of a backup container:
//! - Range-file blocks ([`decode_range_block`], [`RangeFileWriter`])
//! - Log-file blocks ([`decode_log_block`], [`LogFileWriter`])
//! - Log keys ([`LogKey`]) and multi-part reassembly ([`PartAssembler`])
//! - Serialized mutation groups ([`decode_mutation_group`], [`encode_mutation_group`])
//!
//! # Block framing
//!
//! ```text
//! range block: [1001:i32 LE][len:u32 BE][begin key]{[len][key][len][value]}*[0xFF padding]
//! log block:   [2001:i32 LE]{[len:u32 BE][key][len:u32 BE][value]}*[0xFF padding]
//! ```
//!
//! A block ends at EOF or at the first `0xFF` where a key length would
//! start; everything after that must be `0xFF`.

mod assembler;
mod error;
mod log_block;
mod log_key;
mod mutation_group;
mod range_block;
mod reader;

pub use assembler::{AssembledGroup, PartAssembler, PartOrder, split_into_parts};
pub use error::{CodecError, Result};
pub use log_block::{LOG_BLOCK_VERSION, LogFileWriter, decode_log_block};
pub use log_key::{LOG_KEY_SUFFIX_LEN, LogKey};
pub use mutation_group::{
    GROUP_HEADER_LEN, MutationGroup, ParseMode, decode_mutation_group, encode_mutation_group,
};
pub use range_block::{
    RANGE_BLOCK_VERSION, RangeBlock, RangeFileWriter, decode_range_block, encode_range_file,
};

use bytes::Bytes;

/// Padding byte filling the unused tail of a block.
pub const PADDING: u8 = 0xFF;

/// A raw key-value pair decoded from a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

impl KeyValue {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
