//! Serialized mutation groups carried by log files.
//!
//! ```text
//! [included_version:u64][total_len:u32]{[type:u32][key_len:u32][key][val_len:u32][value]}*
//! ```
//!
//! All integers are little-endian. `total_len` counts the bytes after the
//! 12-byte header.

use bytes::Bytes;
use fastrestore_types::{Mutation, MutationType, Version};

use crate::reader::BlockReader;
use crate::{CodecError, Result};

/// Size of the `included_version` + `total_len` header.
pub const GROUP_HEADER_LEN: usize = 12;

/// How strictly a group is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Every defect is an error.
    Load,
    /// Defective groups are skipped with a warning. Sampling reads isolated
    /// blocks, so a group's tail is often missing.
    Sampling,
}

/// The mutations committed at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationGroup {
    pub version: Version,
    pub included_version: u64,
    pub mutations: Vec<Mutation>,
}

/// Decodes a reassembled group committed at `version`.
///
/// Returns `Ok(None)` when a defective group is skipped in
/// [`ParseMode::Sampling`].
///
/// # Errors
///
/// In [`ParseMode::Load`]: [`CodecError::LengthMismatch`],
/// [`CodecError::UnknownMutationType`] or [`CodecError::CorruptedData`].
pub fn decode_mutation_group(
    version: Version,
    data: &Bytes,
    mode: ParseMode,
) -> Result<Option<MutationGroup>> {
    match decode_strict(version, data) {
        Ok(group) => Ok(Some(group)),
        Err(e) if mode == ParseMode::Sampling => {
            tracing::warn!(%version, error = %e, "skipping malformed mutation group while sampling");
            Ok(None)
        }
        Err(e) => {
            tracing::error!(%version, error = %e, "malformed mutation group");
            Err(e)
        }
    }
}

fn decode_strict(version: Version, data: &Bytes) -> Result<MutationGroup> {
    let mut reader = BlockReader::new(data);
    let included_version = reader.u64_le()?;
    let declared = reader.u32_le()?;

    let actual = data.len() - GROUP_HEADER_LEN;
    if declared as usize != actual {
        return Err(CodecError::LengthMismatch {
            version,
            declared,
            actual,
        });
    }

    let mut mutations = Vec::new();
    while !reader.eof() {
        let code = reader.u32_le()?;
        let kind = MutationType::from_code(code).ok_or(CodecError::UnknownMutationType { code })?;
        let key_len = reader.u32_le()? as usize;
        let key = reader.consume(key_len)?;
        let value_len = reader.u32_le()? as usize;
        let value = reader.consume(value_len)?;
        mutations.push(Mutation::new(kind, key, value));
    }

    Ok(MutationGroup {
        version,
        included_version,
        mutations,
    })
}

/// Serializes mutations into the group format.
pub fn encode_mutation_group(included_version: u64, mutations: &[Mutation]) -> Vec<u8> {
    let body: usize = mutations.iter().map(|m| 12 + m.key.len() + m.value.len()).sum();
    let mut buf = Vec::with_capacity(GROUP_HEADER_LEN + body);
    buf.extend_from_slice(&included_version.to_le_bytes());
    buf.extend_from_slice(&(body as u32).to_le_bytes());
    for mutation in mutations {
        buf.extend_from_slice(&mutation.kind.code().to_le_bytes());
        buf.extend_from_slice(&(mutation.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&mutation.key);
        buf.extend_from_slice(&(mutation.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&mutation.value);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sample() -> Vec<Mutation> {
        vec![
            Mutation::set("a", "1"),
            Mutation::clear_range("b", "c"),
            Mutation::new(MutationType::AddValue, "n", vec![1, 0, 0, 0]),
        ]
    }

    #[test]
    fn test_decode_encoded_group() {
        let data = Bytes::from(encode_mutation_group(41, &sample()));
        let group = decode_mutation_group(Version::new(42), &data, ParseMode::Load)
            .unwrap()
            .unwrap();
        assert_eq!(group.version, Version::new(42));
        assert_eq!(group.included_version, 41);
        assert_eq!(group.mutations, sample());
    }

    #[test]
    fn test_empty_group() {
        let data = Bytes::from(encode_mutation_group(1, &[]));
        let group = decode_mutation_group(Version::new(1), &data, ParseMode::Load)
            .unwrap()
            .unwrap();
        assert!(group.mutations.is_empty());
    }

    fn truncated() -> Bytes {
        let data = encode_mutation_group(1, &sample());
        Bytes::copy_from_slice(&data[..data.len() - 3])
    }

    #[test_case(ParseMode::Load => matches Err(CodecError::LengthMismatch { .. }); "load fails")]
    #[test_case(ParseMode::Sampling => matches Ok(None); "sampling skips")]
    fn test_length_mismatch(mode: ParseMode) -> Result<Option<MutationGroup>> {
        decode_mutation_group(Version::new(9), &truncated(), mode)
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut data = encode_mutation_group(1, &[Mutation::set("k", "v")]);
        data[GROUP_HEADER_LEN..GROUP_HEADER_LEN + 4].copy_from_slice(&5u32.to_le_bytes());
        assert_eq!(
            decode_mutation_group(Version::new(1), &Bytes::from(data), ParseMode::Load),
            Err(CodecError::UnknownMutationType { code: 5 })
        );
    }

    #[test]
    fn test_missing_header_is_corrupted() {
        let data = Bytes::from_static(&[0; 5]);
        assert!(matches!(
            decode_mutation_group(Version::new(1), &data, ParseMode::Load),
            Err(CodecError::CorruptedData { .. })
        ));
    }
}
