//! Keys of log-file entries.
//!
//! ```text
//! [prefix:*][hash:u8][commit_version:u64 BE][part:u32 BE]
//! ```
//!
//! A commit's serialized mutations may be split across several entries that
//! share `hash` and `commit_version` and number their `part` from zero.

use fastrestore_types::Version;

use crate::{CodecError, Result};

/// Length of the fixed suffix at the end of every log key.
pub const LOG_KEY_SUFFIX_LEN: usize = 1 + 8 + 4;

/// The decoded suffix of a log-file key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    pub hash: u8,
    pub version: Version,
    pub part: u32,
}

impl LogKey {
    /// Key for part `part` of the commit at `version`.
    pub fn new(version: Version, part: u32) -> Self {
        Self {
            hash: version_hash(version),
            version,
            part,
        }
    }

    /// Parses the suffix of `key`; any leading bytes are ignored.
    ///
    /// # Errors
    ///
    /// [`CodecError::MalformedLogKey`] if `key` is shorter than the suffix.
    pub fn parse(key: &[u8]) -> Result<Self> {
        let start = key
            .len()
            .checked_sub(LOG_KEY_SUFFIX_LEN)
            .ok_or(CodecError::MalformedLogKey { len: key.len() })?;
        let suffix = &key[start..];

        let mut version = [0u8; 8];
        version.copy_from_slice(&suffix[1..9]);
        let mut part = [0u8; 4];
        part.copy_from_slice(&suffix[9..13]);

        Ok(Self {
            hash: suffix[0],
            version: Version::new(u64::from_be_bytes(version)),
            part: u32::from_be_bytes(part),
        })
    }

    pub fn encode(&self) -> [u8; LOG_KEY_SUFFIX_LEN] {
        let mut out = [0u8; LOG_KEY_SUFFIX_LEN];
        out[0] = self.hash;
        out[1..9].copy_from_slice(&self.version.as_u64().to_be_bytes());
        out[9..13].copy_from_slice(&self.part.to_be_bytes());
        out
    }
}

impl std::fmt::Display for LogKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}/{}/{}", self.hash, self.version, self.part)
    }
}

/// Spreads consecutive versions across hash buckets.
fn version_hash(version: Version) -> u8 {
    version
        .as_u64()
        .to_be_bytes()
        .iter()
        .fold(0u8, |acc, b| acc.rotate_left(3) ^ b)
}
