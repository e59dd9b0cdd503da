//! Reassembly of mutation groups split across log-file entries.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use fastrestore_types::Version;

use crate::{KeyValue, LogKey, Result};

/// How an incoming part related to the parts already seen for its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOrder {
    InOrder,
    /// The part was not the next one expected. It is appended anyway.
    OutOfOrder { expected: u32, found: u32 },
}

/// A fully concatenated mutation group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledGroup {
    pub version: Version,
    pub hash: u8,
    pub data: Bytes,
}

#[derive(Debug, Default)]
struct Pending {
    data: BytesMut,
    next_part: u32,
}

/// Concatenates log entry values per `(hash, commit_version)`.
///
/// Groups are yielded in commit-version order. Parts are expected to arrive
/// numbered `0, 1, 2, ...`; anything else is reported through
/// [`PartOrder::OutOfOrder`] and logged, since it usually means the same
/// file region was fed twice.
#[derive(Debug, Default)]
pub struct PartAssembler {
    groups: BTreeMap<(Version, u8), Pending>,
    out_of_order: usize,
}

impl PartAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one raw log entry.
    ///
    /// # Errors
    ///
    /// [`crate::CodecError::MalformedLogKey`] if the key has no suffix.
    pub fn push(&mut self, key: &[u8], value: &[u8]) -> Result<PartOrder> {
        let log_key = LogKey::parse(key)?;
        let pending = self
            .groups
            .entry((log_key.version, log_key.hash))
            .or_default();

        let order = if log_key.part == pending.next_part {
            PartOrder::InOrder
        } else {
            self.out_of_order += 1;
            tracing::warn!(
                key = %log_key,
                expected = pending.next_part,
                found = log_key.part,
                "log part out of order"
            );
            PartOrder::OutOfOrder {
                expected: pending.next_part,
                found: log_key.part,
            }
        };

        pending.data.extend_from_slice(value);
        pending.next_part = log_key.part.saturating_add(1);
        Ok(order)
    }

    /// Adds every pair of a decoded log block.
    pub fn push_all(&mut self, pairs: &[KeyValue]) -> Result<()> {
        for pair in pairs {
            self.push(&pair.key, &pair.value)?;
        }
        Ok(())
    }

    /// Number of parts that arrived out of order so far.
    pub fn out_of_order_parts(&self) -> usize {
        self.out_of_order
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Consumes the assembler, yielding groups by ascending commit version.
    pub fn into_groups(self) -> Vec<AssembledGroup> {
        self.groups
            .into_iter()
            .map(|((version, hash), pending)| AssembledGroup {
                version,
                hash,
                data: pending.data.freeze(),
            })
            .collect()
    }
}

/// Splits a serialized group into log entries of at most `part_size` value
/// bytes each.
pub fn split_into_parts(version: Version, data: &[u8], part_size: usize) -> Vec<KeyValue> {
    let part_size = part_size.max(1);
    data.chunks(part_size)
        .enumerate()
        .map(|(part, chunk)| {
            let key = LogKey::new(version, part as u32).encode();
            KeyValue::new(Bytes::copy_from_slice(&key), Bytes::copy_from_slice(chunk))
        })
        .collect()
}
