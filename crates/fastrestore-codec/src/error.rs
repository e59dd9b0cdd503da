//! Error types for block decoding.

use fastrestore_types::Version;
use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while decoding or encoding backup data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A length prefix points past the end of the buffer.
    #[error("corrupted data at byte {offset}: need {needed} bytes, {available} available")]
    CorruptedData {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The tail of a block holds something other than `0xFF`.
    #[error("corrupted block padding: byte {byte:#04x} at offset {offset}")]
    CorruptedPadding { offset: usize, byte: u8 },

    /// The block header carries an unknown format tag.
    #[error("unsupported block version {found} (expected {expected})")]
    UnsupportedVersion { found: i32, expected: i32 },

    /// A reassembled mutation group's declared length disagrees with its
    /// payload.
    #[error("mutation group at version {version} declares {declared} bytes but carries {actual}")]
    LengthMismatch {
        version: Version,
        declared: u32,
        actual: usize,
    },

    #[error("unknown mutation type code {code}")]
    UnknownMutationType { code: u32 },

    /// A log-file key is too short to hold the hash/version/part suffix.
    #[error("malformed log key of {len} bytes")]
    MalformedLogKey { len: usize },

    /// A writer was asked for an entry larger than one block.
    #[error("block size {block_size} cannot hold a {needed}-byte entry")]
    BadBlockSize { block_size: u32, needed: usize },
}
