//! In-memory backup container.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use fastrestore_types::{Key, Mutation, RestoreFile, Value, Version};

use super::{BackupContainer, EncodedFile, log_file, parse_file_name, range_file};
use crate::Result;
use crate::error::ContainerError;

/// Backup held in memory, addressed by a `memory://` URL.
///
/// Files are added while building the backup; clones share the contents.
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    url: String,
    files: Arc<BTreeMap<String, Bytes>>,
}

impl MemoryContainer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            files: Arc::new(BTreeMap::new()),
        }
    }

    /// Stores a file under its own name, replacing any previous contents.
    pub fn put(&mut self, file: EncodedFile) {
        Arc::make_mut(&mut self.files).insert(file.name, file.data);
    }

    /// Adds a range file and returns its name.
    pub fn add_range_file(
        &mut self,
        version: Version,
        block_size: u32,
        pairs: &[(Key, Value)],
    ) -> Result<String> {
        let file = range_file(version, &self.next_uid(), block_size, pairs)?;
        let name = file.name.clone();
        self.put(file);
        Ok(name)
    }

    /// Adds a log file covering `[begin, end)` and returns its name.
    pub fn add_log_file(
        &mut self,
        begin: Version,
        end: Version,
        block_size: u32,
        part_size: usize,
        groups: &[(Version, Vec<Mutation>)],
    ) -> Result<String> {
        let file = log_file(begin, end, &self.next_uid(), block_size, part_size, groups)?;
        let name = file.name.clone();
        self.put(file);
        Ok(name)
    }

    fn next_uid(&self) -> String {
        format!("{:08x}", self.files.len())
    }
}

impl BackupContainer for MemoryContainer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn list_files(&self) -> Result<Vec<RestoreFile>, ContainerError> {
        let mut files = Vec::new();
        for (name, data) in self.files.iter() {
            if let Some(file) = parse_file_name(name, data.len() as u64)? {
                files.push(file);
            }
        }
        Ok(files)
    }

    async fn read(&self, name: &str, offset: u64, len: u64) -> Result<Bytes, ContainerError> {
        let data = self
            .files
            .get(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;

        let size = data.len() as u64;
        let end = offset.saturating_add(len);
        if end > size {
            return Err(ContainerError::ShortRead {
                file: name.to_string(),
                offset,
                len,
                got: size.saturating_sub(offset),
            });
        }
        Ok(data.slice(offset as usize..end as usize))
    }
}
