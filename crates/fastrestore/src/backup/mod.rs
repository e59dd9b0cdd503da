//! Backup containers.
//!
//! A container holds immutable range files (snapshot slices) and log files
//! (committed mutations over a version interval). The restore only needs to
//! list them and read byte ranges out of them.
//!
//! # Layout
//!
//! ```text
//! ranges/range,<version>,<uid>,<blockSize>
//! logs/log,<beginVersion>,<endVersion>,<uid>,<blockSize>
//! ```
//!
//! Two containers ship with the crate: [`MemoryContainer`] for tests and
//! in-process restores, [`DirectoryContainer`] for `file://` URLs.

use std::collections::HashMap;
use std::future::Future;

use bytes::Bytes;
use fastrestore_types::{RestoreFile, Version};

use crate::error::ContainerError;

mod directory;
mod memory;
mod restore_set;
mod writer;

pub use directory::DirectoryContainer;
pub use memory::MemoryContainer;
pub use restore_set::{BackupDescription, RestoreSet};
pub use writer::{EncodedFile, key_after, log_file, range_file};

pub const RANGES_DIR: &str = "ranges";
pub const LOGS_DIR: &str = "logs";

/// Read access to a backup.
pub trait BackupContainer: Send + Sync {
    fn url(&self) -> &str;

    /// Every range and log file in the container.
    fn list_files(&self) -> impl Future<Output = Result<Vec<RestoreFile>, ContainerError>> + Send;

    /// Reads exactly `len` bytes of `name` starting at `offset`.
    fn read(
        &self,
        name: &str,
        offset: u64,
        len: u64,
    ) -> impl Future<Output = Result<Bytes, ContainerError>> + Send;

    fn describe(&self) -> impl Future<Output = Result<BackupDescription, ContainerError>> + Send {
        async move {
            let files = self.list_files().await?;
            Ok(BackupDescription::from_files(self.url(), &files))
        }
    }

    /// Files needed to restore to `target` (the latest restorable version
    /// when `None`).
    fn restore_set(
        &self,
        target: Option<Version>,
    ) -> impl Future<Output = Result<RestoreSet, ContainerError>> + Send {
        async move { RestoreSet::select(self.list_files().await?, target) }
    }
}

// ============================================================================
// File names
// ============================================================================

pub fn range_file_name(version: Version, uid: &str, block_size: u32) -> String {
    format!("{RANGES_DIR}/range,{version},{uid},{block_size}")
}

pub fn log_file_name(begin: Version, end: Version, uid: &str, block_size: u32) -> String {
    format!("{LOGS_DIR}/log,{begin},{end},{uid},{block_size}")
}

/// Parses a container file name into file metadata.
///
/// Returns `Ok(None)` for names outside the range and log directories.
pub fn parse_file_name(name: &str, file_size: u64) -> Result<Option<RestoreFile>, ContainerError> {
    let bad = || ContainerError::BadFileName(name.to_string());
    let Some((dir, base)) = name.split_once('/') else {
        return Ok(None);
    };
    let fields: Vec<&str> = base.split(',').collect();
    let version = |s: &str| s.parse::<u64>().map(Version::new).map_err(|_| bad());

    match (dir, fields.as_slice()) {
        (RANGES_DIR, ["range", v, _uid, block]) => {
            let block_size = block.parse().map_err(|_| bad())?;
            Ok(Some(RestoreFile::range(name, version(*v)?, block_size, file_size)))
        }
        (LOGS_DIR, ["log", begin, end, _uid, block]) => {
            let (begin, end) = (version(*begin)?, version(*end)?);
            if end <= begin {
                return Err(bad());
            }
            let block_size = block.parse().map_err(|_| bad())?;
            Ok(Some(RestoreFile::log(name, begin, end, block_size, file_size)))
        }
        (RANGES_DIR | LOGS_DIR, _) => Err(bad()),
        _ => Ok(None),
    }
}

// ============================================================================
// Opening containers by URL
// ============================================================================

/// Either container kind, so callers can hold one without generics.
#[derive(Debug, Clone)]
pub enum AnyContainer {
    Memory(MemoryContainer),
    Directory(DirectoryContainer),
}

impl BackupContainer for AnyContainer {
    fn url(&self) -> &str {
        match self {
            AnyContainer::Memory(c) => c.url(),
            AnyContainer::Directory(c) => c.url(),
        }
    }

    async fn list_files(&self) -> Result<Vec<RestoreFile>, ContainerError> {
        match self {
            AnyContainer::Memory(c) => c.list_files().await,
            AnyContainer::Directory(c) => c.list_files().await,
        }
    }

    async fn read(&self, name: &str, offset: u64, len: u64) -> Result<Bytes, ContainerError> {
        match self {
            AnyContainer::Memory(c) => c.read(name, offset, len).await,
            AnyContainer::Directory(c) => c.read(name, offset, len).await,
        }
    }
}

/// Maps backup URLs to containers.
///
/// Memory containers exist only in code, so they are registered here by
/// URL; `file://` URLs open a [`DirectoryContainer`].
#[derive(Debug, Clone, Default)]
pub struct ContainerResolver {
    memory: HashMap<String, MemoryContainer>,
}

impl ContainerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, container: MemoryContainer) {
        self.memory.insert(container.url().to_string(), container);
    }

    /// Opens the container behind `url`.
    ///
    /// # Errors
    ///
    /// [`ContainerError::InvalidUrl`] for unknown schemes and unregistered
    /// memory URLs.
    pub fn open(&self, url: &str) -> Result<AnyContainer, ContainerError> {
        if let Some(container) = self.memory.get(url) {
            return Ok(AnyContainer::Memory(container.clone()));
        }
        open_container(url)
    }
}

/// Opens a `file://` container.
pub fn open_container(url: &str) -> Result<AnyContainer, ContainerError> {
    match url.strip_prefix("file://") {
        Some(path) if !path.is_empty() => {
            Ok(AnyContainer::Directory(DirectoryContainer::new(path)))
        }
        _ => Err(ContainerError::InvalidUrl(url.to_string())),
    }
}
