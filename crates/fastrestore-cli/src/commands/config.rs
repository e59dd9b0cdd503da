//! Configuration commands.

use std::path::Path;

use anyhow::{Context, Result, bail};
use fastrestore_config::{ConfigLoader, RestoreConfig};

use crate::style::print_section;

/// Shows the configuration in effect for `project`.
pub fn show(project: &str, format: &str) -> Result<()> {
    let loader = ConfigLoader::new(Path::new(project));
    let config = loader.load().context("Failed to load configuration")?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", toml::to_string_pretty(&config)?),
        "text" => print_text(&config, &loader),
        other => bail!("Unknown format '{other}' (expected text, json or toml)"),
    }
    Ok(())
}

fn print_text(config: &RestoreConfig, loader: &ConfigLoader) {
    let mut sources: Vec<(&str, String)> = loader
        .files()
        .into_iter()
        .map(|file| ("File", file.display().to_string()))
        .collect();
    sources.extend(loader.env_overrides().map(|name| ("Environment", name.to_string())));
    if sources.is_empty() {
        sources.push(("Defaults", "no files or overrides found".to_string()));
    }
    print_section("Sources", &sources);

    print_section(
        "Cluster",
        &[
            ("Min workers", config.cluster.min_workers.to_string()),
            ("Loader ratio", format!("{}:1", config.cluster.loader_ratio)),
            ("Quorum timeout", format!("{} ms", config.cluster.quorum_timeout_ms)),
        ],
    );
    print_section(
        "Sampling",
        &[
            ("Sample percent", config.sampling.sample_percent.to_string()),
            ("Min sample bytes", config.sampling.min_sample_bytes.to_string()),
        ],
    );
    print_section(
        "Batching",
        &[(
            "Batch size threshold",
            format!("{} bytes", config.batching.batch_size_threshold_bytes),
        )],
    );
    print_section(
        "RPC",
        &[
            ("Round timeout", format!("{} ms", config.rpc.round_timeout_ms)),
            ("Max round retries", config.rpc.max_round_retries.to_string()),
            ("Restore timeout", format!("{} s", config.rpc.restore_timeout_secs)),
        ],
    );
    print_section(
        "Loader",
        &[
            ("Send window", config.loader.send_window.to_string()),
            ("Mutations per request", config.loader.mutations_per_request.to_string()),
        ],
    );
    print_section(
        "Applier",
        &[
            ("Max commit retries", config.applier.max_commit_retries.to_string()),
            ("Retry backoff", format!("{} ms", config.applier.retry_backoff_ms)),
        ],
    );
}
