//! Choosing the files a restore needs, and summarizing a backup.

use fastrestore_types::{RestoreFile, Version};
use serde::{Deserialize, Serialize};

use crate::error::ContainerError;

/// Files needed to restore to one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSet {
    pub target_version: Version,
    pub range_files: Vec<RestoreFile>,
    pub log_files: Vec<RestoreFile>,
}

impl RestoreSet {
    /// Selects the restore set for `target`, or for the latest restorable
    /// version when `target` is `None`.
    ///
    /// Takes every range file at or below the target. With `m` the oldest
    /// of their versions, log files must cover `(m, target]` without a gap.
    ///
    /// # Errors
    ///
    /// [`ContainerError::NotRestorable`] if no snapshot precedes the target
    /// or the logs leave a gap.
    pub fn select(files: Vec<RestoreFile>, target: Option<Version>) -> Result<Self, ContainerError> {
        let target = match target {
            Some(target) => target,
            None => max_restorable(&files).ok_or_else(|| ContainerError::NotRestorable {
                target: Version::MAX,
                reason: "backup holds no snapshot".to_string(),
            })?,
        };
        let not_restorable = |reason: String| ContainerError::NotRestorable { target, reason };

        let (ranges, logs): (Vec<RestoreFile>, Vec<RestoreFile>) =
            files.into_iter().partition(|f| f.is_range);

        let range_files: Vec<RestoreFile> =
            ranges.into_iter().filter(|f| f.version <= target).collect();
        let Some(min_version) = range_files.iter().map(|f| f.version).min() else {
            return Err(not_restorable("no snapshot at or below the target".to_string()));
        };

        let mut log_files = Vec::new();
        if target > min_version {
            let chain = log_chain(&logs, min_version);
            let covered_end = chain.last().map_or(min_version.next(), |f| f.end_version);
            if covered_end <= target {
                return Err(not_restorable(format!(
                    "logs cover versions up to {covered_end} only (snapshot at {min_version})"
                )));
            }
            log_files = chain
                .into_iter()
                .filter(|f| f.begin_version <= target)
                .cloned()
                .collect();
        }

        Ok(Self {
            target_version: target,
            range_files,
            log_files,
        })
    }

    pub fn files(&self) -> impl Iterator<Item = &RestoreFile> {
        self.range_files.iter().chain(&self.log_files)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files().map(|f| f.file_size).sum()
    }
}

/// Logs forming a contiguous chain from `snapshot + 1`, sorted by begin
/// version. Logs ending at or before `snapshot + 1` carry nothing needed.
fn log_chain(logs: &[RestoreFile], snapshot: Version) -> Vec<&RestoreFile> {
    let first_needed = snapshot.next();
    let mut candidates: Vec<&RestoreFile> = logs
        .iter()
        .filter(|f| f.end_version > first_needed)
        .collect();
    candidates.sort_by(|a, b| a.begin_version.cmp(&b.begin_version).then(a.end_version.cmp(&b.end_version)));

    let mut chain = Vec::new();
    let mut covered_end = first_needed;
    for log in candidates {
        if log.begin_version > covered_end {
            break;
        }
        if log.end_version > covered_end {
            covered_end = log.end_version;
            chain.push(log);
        }
    }
    chain
}

/// Latest version the files can be restored to.
fn max_restorable(files: &[RestoreFile]) -> Option<Version> {
    let snapshot = files.iter().filter(|f| f.is_range).map(|f| f.version).min()?;
    let logs: Vec<RestoreFile> = files.iter().filter(|f| !f.is_range).cloned().collect();
    let chain = log_chain(&logs, snapshot);
    Some(
        chain
            .last()
            .map_or(snapshot, |f| Version::new(f.end_version.as_u64() - 1)),
    )
}

/// Summary of a backup's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDescription {
    pub url: String,
    pub range_files: usize,
    pub log_files: usize,
    pub range_bytes: u64,
    pub log_bytes: u64,
    /// Distinct range file versions, ascending.
    pub snapshot_versions: Vec<Version>,
    /// `[min begin, max end)` over all log files.
    pub log_span: Option<(Version, Version)>,
    pub max_restorable_version: Option<Version>,
}

impl BackupDescription {
    pub fn from_files(url: &str, files: &[RestoreFile]) -> Self {
        let (ranges, logs): (Vec<&RestoreFile>, Vec<&RestoreFile>) =
            files.iter().partition(|f| f.is_range);

        let mut snapshot_versions: Vec<Version> = ranges.iter().map(|f| f.version).collect();
        snapshot_versions.sort();
        snapshot_versions.dedup();

        let log_span = logs
            .iter()
            .map(|f| f.begin_version)
            .min()
            .zip(logs.iter().map(|f| f.end_version).max());

        Self {
            url: url.to_string(),
            range_files: ranges.len(),
            log_files: logs.len(),
            range_bytes: ranges.iter().map(|f| f.file_size).sum(),
            log_bytes: logs.iter().map(|f| f.file_size).sum(),
            snapshot_versions,
            log_span,
            max_restorable_version: max_restorable(files),
        }
    }
}
