//! Splitting a restore set into version batches.
//!
//! Files are ordered by end version and cut into contiguous batches of at
//! least `batch_size_threshold_bytes`. A cut is never placed right after a
//! range file whose version falls inside a log file's `[begin, end)`, since
//! that log would straddle the boundary.

use fastrestore_types::{RestoreFile, Version};

use crate::{Error, Result};

/// `[begin, end)` of a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForbiddenRange {
    pub begin: Version,
    pub end: Version,
}

/// Forbidden ranges of `log_files`, checked for pairwise overlap.
///
/// # Errors
///
/// [`Error::Config`] if two log files overlap.
pub fn forbidden_ranges(log_files: &[RestoreFile]) -> Result<Vec<ForbiddenRange>> {
    let mut ranges: Vec<ForbiddenRange> = log_files
        .iter()
        .filter(|f| !f.is_range)
        .map(|f| ForbiddenRange {
            begin: f.begin_version,
            end: f.end_version,
        })
        .collect();
    ranges.sort_by_key(|r| (r.begin, r.end));

    for pair in ranges.windows(2) {
        if pair[1].begin < pair[0].end {
            return Err(Error::Config(format!(
                "log files [{}, {}) and [{}, {}) overlap",
                pair[0].begin, pair[0].end, pair[1].begin, pair[1].end
            )));
        }
    }
    Ok(ranges)
}

/// True if a batch may not end at a file with this end version.
///
/// Only range files can be forbidden boundaries; a log file ending at `v`
/// never conflicts with a log starting at `v`.
pub fn is_version_in_forbidden_range(
    ranges: &[ForbiddenRange],
    version: Version,
    is_range: bool,
) -> bool {
    is_range && ranges.iter().any(|r| r.begin <= version && version < r.end)
}

/// Files restored together, and the versions they cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionBatch {
    /// Position of the batch within the request, from 0.
    pub index: usize,
    /// Exclusive end of the previous batch.
    pub begin_version: Version,
    /// Largest end version among the files.
    pub end_version: Version,
    pub range_files: Vec<RestoreFile>,
    pub log_files: Vec<RestoreFile>,
    pub bytes: u64,
}

impl VersionBatch {
    /// Every file in batch order.
    pub fn files(&self) -> impl Iterator<Item = &RestoreFile> {
        let mut files: Vec<&RestoreFile> = self.range_files.iter().chain(&self.log_files).collect();
        files.sort_by(|a, b| a.batch_order(b));
        files.into_iter()
    }

    /// Files in load dispatch order: logs first, empty files skipped.
    pub fn load_order(&self) -> impl Iterator<Item = &RestoreFile> {
        self.log_files
            .iter()
            .chain(&self.range_files)
            .filter(|f| !f.is_empty())
    }

    pub fn file_count(&self) -> usize {
        self.range_files.len() + self.log_files.len()
    }
}

/// Cuts `files` into version batches of at least `threshold` bytes each
/// (the last batch excepted).
pub fn build_batches(
    mut files: Vec<RestoreFile>,
    ranges: &[ForbiddenRange],
    threshold: u64,
) -> Vec<VersionBatch> {
    files.sort_by(RestoreFile::batch_order);

    let mut batches = Vec::new();
    let mut current: Vec<RestoreFile> = Vec::new();
    let mut bytes = 0u64;
    let mut begin = Version::ZERO;

    let total = files.len();
    for (position, file) in files.into_iter().enumerate() {
        bytes += file.file_size;
        let boundary_ok = !is_version_in_forbidden_range(ranges, file.end_version, file.is_range);
        current.push(file);

        let last = position + 1 == total;
        if last || (bytes >= threshold && boundary_ok) {
            let batch = close_batch(batches.len(), begin, std::mem::take(&mut current), bytes);
            begin = batch.end_version;
            batches.push(batch);
            bytes = 0;
        }
    }
    batches
}

fn close_batch(index: usize, begin: Version, files: Vec<RestoreFile>, bytes: u64) -> VersionBatch {
    let end_version = files.iter().map(|f| f.end_version).max().unwrap_or(begin);
    let (range_files, log_files) = files.into_iter().partition(|f| f.is_range);
    VersionBatch {
        index,
        begin_version: begin,
        end_version,
        range_files,
        log_files,
        bytes,
    }
}
