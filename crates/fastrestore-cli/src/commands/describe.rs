//! Describe command: summarize a backup container.

use anyhow::{Context, Result, bail};
use fastrestore::{BackupContainer, open_container};

use super::backup_url;
use crate::style::colors::SemanticStyle;
use crate::style::{Mark, print_info_table, report, rows_table};

pub async fn run(backup: &str, list_files: bool, format: &str) -> Result<()> {
    let url = backup_url(backup);
    let container = open_container(&url).with_context(|| format!("Failed to open {url}"))?;
    let description = container
        .describe()
        .await
        .with_context(|| format!("Failed to list {url}"))?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&description)?);
            return Ok(());
        }
        "text" => {}
        other => bail!("Unknown format '{other}' (expected text or json)"),
    }

    let snapshots = description
        .snapshot_versions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    print_info_table(&[
        ("URL", description.url.clone()),
        (
            "Range files",
            format!("{} ({} bytes)", description.range_files, description.range_bytes),
        ),
        (
            "Log files",
            format!("{} ({} bytes)", description.log_files, description.log_bytes),
        ),
        ("Snapshot versions", snapshots),
        (
            "Log span",
            description
                .log_span
                .map_or_else(|| "-".to_string(), |(begin, end)| format!("[{begin}, {end})")),
        ),
        (
            "Max restorable",
            description
                .max_restorable_version
                .map_or_else(|| "-".muted(), |v| v.to_string().success()),
        ),
    ]);

    if description.max_restorable_version.is_none() {
        report(Mark::Warning, "Backup holds no snapshot and cannot be restored");
    }

    if list_files {
        let mut files = container.list_files().await?;
        files.sort_by(|a, b| a.batch_order(b));
        let rows: Vec<Vec<String>> = files
            .iter()
            .map(|f| {
                let versions = if f.is_range {
                    f.version.to_string()
                } else {
                    format!("[{}, {})", f.begin_version, f.end_version)
                };
                vec![
                    f.file_name.clone(),
                    if f.is_range { "range" } else { "log" }.to_string(),
                    versions,
                    f.block_size.to_string(),
                    f.file_size.to_string(),
                ]
            })
            .collect();
        println!(
            "{}",
            rows_table(&["File", "Kind", "Versions", "Block size", "Bytes"], &rows)
        );
    }

    Ok(())
}
