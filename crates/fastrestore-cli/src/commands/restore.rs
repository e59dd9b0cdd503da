//! Restore command: run an in-process cluster against a backup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use fastrestore::{ClusterBuilder, MemoryStore, RestoreStatus, RestoreSummary};
use fastrestore_config::RestoreConfig;
use fastrestore_types::{KeyRange, RestoreRequest, Version};
use serde::Serialize;

use super::backup_url;
use crate::style::{Mark, create_spinner, finish_error, finish_success, print_info_table, report};

pub struct RestoreOptions {
    pub backup: String,
    pub target_version: Option<u64>,
    pub begin: String,
    pub end: Option<String>,
    pub remove_prefix: String,
    pub add_prefix: String,
    pub lock_db: bool,
    pub workers: Option<u32>,
    pub dump: Option<PathBuf>,
    pub project: String,
}

impl RestoreOptions {
    fn request(&self) -> RestoreRequest {
        let mut request = RestoreRequest::new(backup_url(&self.backup))
            .with_prefixes(self.remove_prefix.clone(), self.add_prefix.clone())
            .with_lock_db(self.lock_db);
        if let Some(version) = self.target_version {
            request = request.with_target_version(Version::new(version));
        }
        if !self.begin.is_empty() || self.end.is_some() {
            let end = self.end.clone().map_or(request.range.end.clone(), Into::into);
            request = request.with_range(KeyRange::new(self.begin.clone(), end));
        }
        request
    }
}

/// Written by `--dump`.
#[derive(Serialize)]
struct Dump<'a> {
    summary: &'a RestoreSummary,
    status: Option<RestoreStatus>,
    /// Escaped keys and values, in key order.
    data: Vec<(String, String)>,
}

pub async fn run(options: RestoreOptions) -> Result<()> {
    let mut config = RestoreConfig::load_from_dir(&options.project)
        .context("Failed to load configuration")?;
    if let Some(workers) = options.workers {
        config.cluster.min_workers = workers;
    }
    config.validate().context("Invalid configuration")?;

    let request = options.request();
    let store = MemoryStore::new();
    let cluster = ClusterBuilder::new(config).start(store.clone()).await;

    let sp = create_spinner(&format!("Restoring {}...", request.url));
    let outcome = cluster.restore(request.clone()).await;
    cluster.shutdown().await;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            finish_error(&sp, "Restore failed");
            report(Mark::Failed, &e.to_string());
            return Err(e).context("Restore failed");
        }
    };
    finish_success(
        &sp,
        &format!("Restored to version {}", summary.target_version),
    );

    let data = store.user_data().await;
    print_info_table(&[
        ("Request", summary.uid.to_string()),
        ("Target version", summary.target_version.to_string()),
        ("Version batches", summary.batches.to_string()),
        (
            "Files",
            format!("{} range, {} log", summary.range_files, summary.log_files),
        ),
        ("Bytes", summary.bytes.to_string()),
        ("Keys restored", data.len().to_string()),
        ("Elapsed", format!("{} ms", summary.elapsed_ms)),
    ]);

    if let Some(path) = &options.dump {
        let dump = Dump {
            summary: &summary,
            status: RestoreStatus::read(&store, summary.uid).await?,
            data: data
                .iter()
                .map(|(k, v)| (k.escape_ascii().to_string(), v.escape_ascii().to_string()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&dump)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        report(Mark::Done, &format!("Dump written to {}", path.display()));
    }

    Ok(())
}
