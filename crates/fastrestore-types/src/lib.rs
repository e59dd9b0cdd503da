//! # fastrestore-types: Core types for `fastrestore`
//!
//! This crate contains the shared vocabulary of the restore protocol:
//! - Entity IDs ([`NodeId`], [`Version`])
//! - Command envelope identity ([`CommandId`], [`Phase`])
//! - Roles ([`Role`])
//! - Backup file metadata ([`RestoreFile`])
//! - Mutations ([`Mutation`], [`MutationType`], [`VersionedMutation`])
//! - Key ranges and ownership ([`KeyRange`], [`KeyRangeAssignment`])
//! - Requests ([`RestoreRequest`], [`LoadingParam`])

use std::fmt::{Debug, Display};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod atomic;
mod command;
mod file;
mod mutation;
mod range;
mod request;

pub use atomic::VALUE_SIZE_LIMIT;
pub use command::{CommandId, Phase};
pub use file::RestoreFile;
pub use mutation::{Mutation, MutationType, VersionedMutation};
pub use range::{KeyRange, KeyRangeAssignment};
pub use request::{LoadingParam, RestoreRequest, Role};

/// A key in the restored keyspace.
pub type Key = Bytes;

/// A value in the restored keyspace.
pub type Value = Bytes;

// ============================================================================
// Entity IDs - All Copy
// ============================================================================

/// Identity of a process taking part in a restore.
///
/// The master is always node 0; workers are numbered from 1 in the order
/// they registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// The node that drives the restore.
    pub const MASTER: NodeId = NodeId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the id as a `u32`.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_master(&self) -> bool {
        *self == Self::MASTER
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u32 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Commit version of the source database.
///
/// Versions are logical timestamps. A range file is a snapshot at one
/// version; a log file covers the half-open interval `[begin, end)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Version = Version(0);
    pub const MAX: Version = Version(u64::MAX);

    pub fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the version as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next version, saturating at [`Version::MAX`].
    pub fn next(&self) -> Version {
        Version(self.0.saturating_add(1))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Renders a key for logs: printable ASCII as-is, everything else `\xNN`.
pub fn printable(key: &[u8]) -> String {
    let mut out = String::with_capacity(key.len());
    for &b in key {
        if b.is_ascii_graphic() || b == b' ' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02x}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_is_node_zero() {
        assert!(NodeId::MASTER.is_master());
        assert!(!NodeId::new(3).is_master());
        assert_eq!(NodeId::new(3).to_string(), "node#3");
    }

    #[test]
    fn test_version_next_saturates() {
        assert_eq!(Version::new(7).next(), Version::new(8));
        assert_eq!(Version::MAX.next(), Version::MAX);
    }

    #[test]
    fn test_printable_escapes_binary() {
        assert_eq!(printable(b"abc"), "abc");
        assert_eq!(printable(b"\xff\x02/x"), "\\xff\\x02/x");
    }
}
