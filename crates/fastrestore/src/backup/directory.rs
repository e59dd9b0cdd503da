//! Backup container stored in a local directory.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use fastrestore_types::RestoreFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{BackupContainer, EncodedFile, LOGS_DIR, RANGES_DIR, parse_file_name};
use crate::error::ContainerError;

/// A `file://` backup: `ranges/` and `logs/` under one root directory.
#[derive(Debug, Clone)]
pub struct DirectoryContainer {
    root: PathBuf,
    url: String,
}

impl DirectoryContainer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let url = format!("file://{}", root.display());
        Self { root, url }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes a file, creating its directory if needed.
    pub async fn write(&self, file: &EncodedFile) -> Result<(), ContainerError> {
        let path = self.root.join(&file.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &file.data).await?;
        Ok(())
    }

    async fn list_dir(&self, dir: &str, files: &mut Vec<RestoreFile>) -> Result<(), ContainerError> {
        let mut entries = match tokio::fs::read_dir(self.root.join(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = format!("{dir}/{}", entry.file_name().to_string_lossy());
            if let Some(file) = parse_file_name(&name, metadata.len())? {
                files.push(file);
            }
        }
        Ok(())
    }
}

impl BackupContainer for DirectoryContainer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn list_files(&self) -> Result<Vec<RestoreFile>, ContainerError> {
        let mut files = Vec::new();
        self.list_dir(RANGES_DIR, &mut files).await?;
        self.list_dir(LOGS_DIR, &mut files).await?;
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    async fn read(&self, name: &str, offset: u64, len: u64) -> Result<Bytes, ContainerError> {
        let path = self.root.join(name);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContainerError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        file.take(len).read_to_end(&mut buf).await?;
        if buf.len() as u64 != len {
            return Err(ContainerError::ShortRead {
                file: name.to_string(),
                offset,
                len,
                got: buf.len() as u64,
            });
        }
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::range_file;
    use fastrestore_types::Version;

    #[tokio::test]
    async fn test_write_list_read() {
        let dir = tempfile::tempdir().unwrap();
        let container = DirectoryContainer::new(dir.path());
        let pairs = vec![(Bytes::from_static(b"k"), Bytes::from_static(b"v"))];
        let file = range_file(Version::new(7), "u1", 256, &pairs).unwrap();
        container.write(&file).await.unwrap();
        tokio::fs::write(dir.path().join("ranges/.DS_Store"), b"x").await.ok();

        let files = container.list_files().await;
        // Stray files inside ranges/ are malformed names.
        assert!(matches!(files, Err(ContainerError::BadFileName(_))));

        tokio::fs::remove_file(dir.path().join("ranges/.DS_Store")).await.unwrap();
        let files = container.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].version, Version::new(7));
        assert_eq!(files[0].file_size, file.data.len() as u64);

        let head = container.read(&file.name, 0, 4).await.unwrap();
        assert_eq!(head, file.data.slice(0..4));
    }

    #[tokio::test]
    async fn test_missing_directories_list_empty() {
        let dir = tempfile::tempdir().unwrap();
        let container = DirectoryContainer::new(dir.path());
        assert!(container.list_files().await.unwrap().is_empty());
        assert!(matches!(
            container.read("ranges/range,1,u,1", 0, 1).await,
            Err(ContainerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let container = DirectoryContainer::new(dir.path());
        let file = EncodedFile {
            name: "logs/log,1,2,u,4".to_string(),
            data: Bytes::from_static(b"abc"),
        };
        container.write(&file).await.unwrap();
        let err = container.read(&file.name, 1, 4).await.unwrap_err();
        assert!(matches!(err, ContainerError::ShortRead { got: 2, .. }));
    }
}
