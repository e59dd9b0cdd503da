//! Backup file metadata.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::Version;

/// Metadata of one backup file as seen by the restore.
///
/// Everything but `cursor` is immutable once listed from the container.
/// `cursor` is loader-local read progress in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RestoreFile {
    /// Snapshot version for range files, begin version for log files.
    pub version: Version,

    /// Name of the file inside its container.
    pub file_name: String,

    /// True for a range (snapshot) file, false for a log file.
    pub is_range: bool,

    /// Size of one independently decodable block.
    pub block_size: u32,

    /// Total size of the file in bytes.
    pub file_size: u64,

    /// First version covered (inclusive).
    pub begin_version: Version,

    /// Last version covered: inclusive for range files, exclusive for logs.
    pub end_version: Version,

    /// Bytes consumed so far by the loader reading this file.
    pub cursor: u64,
}

impl RestoreFile {
    /// Describes a range file holding a snapshot slice at `version`.
    pub fn range(
        file_name: impl Into<String>,
        version: Version,
        block_size: u32,
        file_size: u64,
    ) -> Self {
        Self {
            version,
            file_name: file_name.into(),
            is_range: true,
            block_size,
            file_size,
            begin_version: version,
            end_version: version,
            cursor: 0,
        }
    }

    /// Describes a log file covering `[begin, end)`.
    pub fn log(
        file_name: impl Into<String>,
        begin: Version,
        end: Version,
        block_size: u32,
        file_size: u64,
    ) -> Self {
        Self {
            version: begin,
            file_name: file_name.into(),
            is_range: false,
            block_size,
            file_size,
            begin_version: begin,
            end_version: end,
            cursor: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file_size == 0
    }

    /// Number of blocks, counting a trailing partial block.
    pub fn block_count(&self) -> u64 {
        if self.block_size == 0 {
            return u64::from(self.file_size > 0);
        }
        self.file_size.div_ceil(u64::from(self.block_size))
    }

    /// Returns `(offset, length)` of block `index`.
    pub fn block_span(&self, index: u64) -> (u64, u64) {
        if self.block_size == 0 {
            return (0, self.file_size);
        }
        let block = u64::from(self.block_size);
        let offset = index * block;
        (offset, block.min(self.file_size.saturating_sub(offset)))
    }

    /// Ordering used to build version batches.
    ///
    /// Files are ordered by end version. On a tie the log file comes first:
    /// a log ending at `v` only holds commits below `v`, so it must not be
    /// pushed into a later batch than a snapshot taken at `v`.
    pub fn batch_order(&self, other: &Self) -> Ordering {
        self.end_version
            .cmp(&other.end_version)
            .then(self.is_range.cmp(&other.is_range))
            .then_with(|| self.file_name.cmp(&other.file_name))
    }
}

impl std::fmt::Display for RestoreFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_range {
            write!(
                f,
                "range({}, v={}, size={})",
                self.file_name, self.version, self.file_size
            )
        } else {
            write!(
                f,
                "log({}, [{}, {}), size={})",
                self.file_name, self.begin_version, self.end_version, self.file_size
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 100 => 0; "empty")]
    #[test_case(10, 100 => 1; "single partial block")]
    #[test_case(100, 100 => 1; "exact block")]
    #[test_case(250, 100 => 3; "trailing partial")]
    fn test_block_count(file_size: u64, block_size: u32) -> u64 {
        RestoreFile::range("f", Version::new(1), block_size, file_size).block_count()
    }

    #[test]
    fn test_block_span_clamps_last_block() {
        let file = RestoreFile::range("f", Version::new(1), 100, 250);
        assert_eq!(file.block_span(0), (0, 100));
        assert_eq!(file.block_span(2), (200, 50));
        assert_eq!(file.block_span(3), (300, 0));
    }

    #[test]
    fn test_batch_order_puts_logs_first_on_tie() {
        let log = RestoreFile::log("l", Version::new(50), Version::new(100), 10, 10);
        let range = RestoreFile::range("r", Version::new(100), 10, 10);
        let later = RestoreFile::range("a", Version::new(101), 10, 10);

        let mut files = vec![later.clone(), range.clone(), log.clone()];
        files.sort_by(RestoreFile::batch_order);
        assert_eq!(files, vec![log, range, later]);
    }

    #[test]
    fn test_log_constructor_sets_interval() {
        let log = RestoreFile::log("l", Version::new(5), Version::new(9), 4, 8);
        assert!(!log.is_range);
        assert_eq!(log.version, Version::new(5));
        assert_eq!(log.begin_version, Version::new(5));
        assert_eq!(log.end_version, Version::new(9));
    }
}
