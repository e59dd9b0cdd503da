//! Encoding backup files, for synthetic backups and tests.

use bytes::{Bytes, BytesMut};
use fastrestore_codec::{
    KeyValue, LogFileWriter, encode_mutation_group, encode_range_file, split_into_parts,
};
use fastrestore_types::{Key, Mutation, Value, Version};

use super::{log_file_name, range_file_name};
use crate::{Error, Result};

/// A file ready to be stored in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFile {
    pub name: String,
    pub data: Bytes,
}

/// The smallest key sorting after `key`.
pub fn key_after(key: &[u8]) -> Key {
    let mut out = BytesMut::with_capacity(key.len() + 1);
    out.extend_from_slice(key);
    out.extend_from_slice(&[0]);
    out.freeze()
}

/// Encodes a range file holding `pairs` (sorted by key) as of `version`.
///
/// The file covers `[first key, key after last key)`.
pub fn range_file(
    version: Version,
    uid: &str,
    block_size: u32,
    pairs: &[(Key, Value)],
) -> Result<EncodedFile> {
    let name = range_file_name(version, uid, block_size);
    let begin = pairs.first().map(|(k, _)| k.clone()).unwrap_or_default();
    let end = pairs.last().map_or_else(Bytes::new, |(k, _)| key_after(k));
    let entries: Vec<KeyValue> = pairs
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect();

    let data = encode_range_file(&begin, &entries, &end, block_size)
        .map_err(|e| Error::codec(&name, e))?;
    Ok(EncodedFile {
        name,
        data: Bytes::from(data),
    })
}

/// Encodes a log file covering `[begin, end)` from mutation groups keyed by
/// commit version. Each group is split into parts of at most `part_size`
/// bytes.
pub fn log_file(
    begin: Version,
    end: Version,
    uid: &str,
    block_size: u32,
    part_size: usize,
    groups: &[(Version, Vec<Mutation>)],
) -> Result<EncodedFile> {
    let name = log_file_name(begin, end, uid, block_size);
    let mut writer = LogFileWriter::new(block_size);
    for (version, mutations) in groups {
        let group = encode_mutation_group(version.as_u64(), mutations);
        for part in split_into_parts(*version, &group, part_size) {
            writer
                .write_kv(&part.key, &part.value)
                .map_err(|e| Error::codec(&name, e))?;
        }
    }
    Ok(EncodedFile {
        name,
        data: Bytes::from(writer.finish()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastrestore_codec::decode_range_block;

    #[test]
    fn test_range_file_covers_its_pairs() {
        let pairs = vec![
            (Bytes::from_static(b"a"), Bytes::from_static(b"1")),
            (Bytes::from_static(b"m"), Bytes::from_static(b"2")),
        ];
        let file = range_file(Version::new(3), "u", 4096, &pairs).unwrap();
        assert_eq!(file.name, "ranges/range,3,u,4096");

        let block = decode_range_block(&file.data).unwrap();
        assert_eq!(block.first_key(), &Bytes::from_static(b"a"));
        assert_eq!(block.last_key(), &Bytes::from_static(b"m\x00"));
        assert_eq!(block.pairs().len(), 2);
    }

    #[test]
    fn test_log_file_rejects_tiny_blocks() {
        let groups = vec![(Version::new(5), vec![Mutation::set("key", "value")])];
        let err = log_file(Version::new(1), Version::new(9), "u", 8, 1024, &groups).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }
}
