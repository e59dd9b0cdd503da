//! Restore requests, roles and per-file loading parameters.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Key, KeyRange, RestoreFile, Version};

/// Role a process plays in a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Master,
    Loader,
    Applier,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Loader => write!(f, "loader"),
            Role::Applier => write!(f, "applier"),
        }
    }
}

/// A request to restore a backup into the target database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    /// Identity of the request; also the database lock owner.
    pub uid: Uuid,

    /// Backup container URL.
    pub url: String,

    /// Version to restore to. `None` restores to the latest restorable
    /// version of the container.
    pub target_version: Option<Version>,

    /// Keys to restore (before prefix rewriting).
    pub range: KeyRange,

    /// Prefix prepended to every restored key.
    pub add_prefix: Key,

    /// Prefix stripped from every restored key.
    pub remove_prefix: Key,

    /// Lock the database for the duration of the restore.
    pub lock_db: bool,
}

impl RestoreRequest {
    /// Creates a request restoring the whole user keyspace of `url` to its
    /// latest restorable version, with the database locked.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            url: url.into(),
            target_version: None,
            range: KeyRange::normal_keys(),
            add_prefix: Bytes::new(),
            remove_prefix: Bytes::new(),
            lock_db: true,
        }
    }

    pub fn with_target_version(mut self, version: Version) -> Self {
        self.target_version = Some(version);
        self
    }

    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_prefixes(mut self, remove: impl Into<Key>, add: impl Into<Key>) -> Self {
        self.remove_prefix = remove.into();
        self.add_prefix = add.into();
        self
    }

    pub fn with_lock_db(mut self, lock_db: bool) -> Self {
        self.lock_db = lock_db;
        self
    }

    /// The range the restored keys land in after prefix rewriting.
    pub fn destination_range(&self) -> KeyRange {
        KeyRange::new(
            rewrite(&self.range.begin, &self.remove_prefix, &self.add_prefix),
            rewrite(&self.range.end, &self.remove_prefix, &self.add_prefix),
        )
    }

    /// Loading parameters for one whole file of this request.
    pub fn loading_param(&self, file: &RestoreFile, target: Version) -> LoadingParam {
        LoadingParam {
            url: self.url.clone(),
            file_name: file.file_name.clone(),
            is_range: file.is_range,
            version: file.version,
            begin_version: file.begin_version,
            end_version: file.end_version,
            offset: 0,
            length: file.file_size,
            block_size: file.block_size,
            restore_range: self.range.clone(),
            add_prefix: self.add_prefix.clone(),
            remove_prefix: self.remove_prefix.clone(),
            target_version: target,
        }
    }
}

/// What a loader needs to parse one byte range of one backup file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadingParam {
    pub url: String,
    pub file_name: String,
    pub is_range: bool,

    /// Snapshot version (range files) or begin version (log files).
    pub version: Version,
    pub begin_version: Version,
    pub end_version: Version,

    /// Byte offset of the first block to read.
    pub offset: u64,

    /// Number of bytes to read.
    pub length: u64,

    pub block_size: u32,
    pub restore_range: KeyRange,
    pub add_prefix: Key,
    pub remove_prefix: Key,

    /// Log mutations above this version are dropped.
    pub target_version: Version,
}

impl LoadingParam {
    /// Narrows this parameter to a single block span of the file.
    pub fn with_span(mut self, offset: u64, length: u64) -> Self {
        self.offset = offset;
        self.length = length;
        self
    }

    /// Applies the request's prefix rewriting to a restored key.
    pub fn rewrite_key(&self, key: &[u8]) -> Key {
        rewrite(key, &self.remove_prefix, &self.add_prefix)
    }

    /// Returns true if a log mutation at `version` belongs to this restore.
    pub fn accepts_log_version(&self, version: Version) -> bool {
        version >= self.begin_version && version < self.end_version && version <= self.target_version
    }
}

impl std::fmt::Display for LoadingParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}+{}] {} block={}",
            self.file_name,
            self.offset,
            self.length,
            if self.is_range { "range" } else { "log" },
            self.block_size
        )
    }
}

fn rewrite(key: &[u8], remove_prefix: &[u8], add_prefix: &[u8]) -> Key {
    if remove_prefix.is_empty() && add_prefix.is_empty() {
        return Bytes::copy_from_slice(key);
    }
    let stripped = key.strip_prefix(remove_prefix).unwrap_or(key);
    let mut out = BytesMut::with_capacity(add_prefix.len() + stripped.len());
    out.extend_from_slice(add_prefix);
    out.extend_from_slice(stripped);
    out.freeze()
}
