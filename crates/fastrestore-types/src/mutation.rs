//! Mutations recovered from backup files.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Key, Value, Version};

/// Kind of a mutation, with its wire code in backup log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationType {
    SetValue,
    ClearRange,
    AddValue,
    And,
    Or,
    Xor,
    AppendIfFits,
    Max,
    Min,
    ByteMin,
    ByteMax,
    MinV2,
    AndV2,
    CompareAndClear,
}

impl MutationType {
    /// Decodes a wire code. Codes that never appear in backup logs are
    /// rejected.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => MutationType::SetValue,
            1 => MutationType::ClearRange,
            2 => MutationType::AddValue,
            6 => MutationType::And,
            7 => MutationType::Or,
            8 => MutationType::Xor,
            9 => MutationType::AppendIfFits,
            12 => MutationType::Max,
            13 => MutationType::Min,
            16 => MutationType::ByteMin,
            17 => MutationType::ByteMax,
            18 => MutationType::MinV2,
            19 => MutationType::AndV2,
            20 => MutationType::CompareAndClear,
            _ => return None,
        })
    }

    /// Returns the wire code.
    pub fn code(self) -> u32 {
        match self {
            MutationType::SetValue => 0,
            MutationType::ClearRange => 1,
            MutationType::AddValue => 2,
            MutationType::And => 6,
            MutationType::Or => 7,
            MutationType::Xor => 8,
            MutationType::AppendIfFits => 9,
            MutationType::Max => 12,
            MutationType::Min => 13,
            MutationType::ByteMin => 16,
            MutationType::ByteMax => 17,
            MutationType::MinV2 => 18,
            MutationType::AndV2 => 19,
            MutationType::CompareAndClear => 20,
        }
    }

    /// Returns true for read-modify-write types.
    pub fn is_atomic(self) -> bool {
        !matches!(self, MutationType::SetValue | MutationType::ClearRange)
    }
}

/// A single mutation: `key`/`value` for point types, `key`/`value` as
/// `begin`/`end` for [`MutationType::ClearRange`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mutation {
    pub kind: MutationType,
    pub key: Key,
    pub value: Value,
}

impl Mutation {
    pub fn new(kind: MutationType, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            kind,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn set(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self::new(MutationType::SetValue, key, value)
    }

    /// Clears `[begin, end)`.
    pub fn clear_range(begin: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self::new(MutationType::ClearRange, begin, end)
    }

    pub fn is_range(&self) -> bool {
        self.kind == MutationType::ClearRange
    }

    /// Approximate payload size, used for sampling statistics.
    pub fn byte_size(&self) -> usize {
        self.key.len() + self.value.len()
    }

    /// Returns a copy with the key (and range end) rewritten by `rewrite`.
    pub fn map_keys(&self, mut rewrite: impl FnMut(&[u8]) -> Bytes) -> Self {
        let key = rewrite(&self.key);
        let value = if self.is_range() {
            rewrite(&self.value)
        } else {
            self.value.clone()
        };
        Self {
            kind: self.kind,
            key,
            value,
        }
    }
}

/// A mutation tagged with the version it was committed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedMutation {
    pub version: Version,
    pub mutation: Mutation,
}

impl VersionedMutation {
    pub fn new(version: Version, mutation: Mutation) -> Self {
        Self { version, mutation }
    }
}
