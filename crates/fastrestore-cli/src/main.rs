//! fastrestore command-line tool.
//!
//! Restores directory backups with an in-process restore cluster.
//!
//! # Quick Start
//!
//! ```bash
//! # Write a synthetic backup
//! fastrestore generate ./backup --keys 1000 --logs 4
//!
//! # Inspect it
//! fastrestore describe ./backup
//!
//! # Restore it into an in-memory store and dump the result
//! fastrestore restore ./backup --workers 6 --dump restored.json
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::generate::GenerateOptions;
use crate::commands::restore::RestoreOptions;

/// fastrestore - parallel restore of key-value database backups.
#[derive(Parser)]
#[command(name = "fastrestore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Restore a backup with an in-process cluster.
    Restore {
        /// Backup URL (file://...) or directory path.
        backup: String,

        /// Version to restore to (default: latest restorable).
        #[arg(short, long)]
        target_version: Option<u64>,

        /// First key of the range to restore.
        #[arg(long, default_value = "")]
        begin: String,

        /// End key (exclusive) of the range to restore (default: all user keys).
        #[arg(long)]
        end: Option<String>,

        /// Prefix stripped from every restored key.
        #[arg(long, default_value = "")]
        remove_prefix: String,

        /// Prefix prepended to every restored key.
        #[arg(long, default_value = "")]
        add_prefix: String,

        /// Do not lock the target store during the restore.
        #[arg(long)]
        no_lock: bool,

        /// Number of workers (default: cluster.min_workers).
        #[arg(short, long)]
        workers: Option<u32>,

        /// Write the summary and restored key-value pairs as JSON.
        #[arg(long)]
        dump: Option<PathBuf>,

        /// Directory holding fastrestore.toml.
        #[arg(short, long, default_value = ".")]
        project: String,
    },

    /// Describe the contents of a backup.
    Describe {
        /// Backup URL (file://...) or directory path.
        backup: String,

        /// List every file.
        #[arg(long)]
        files: bool,

        /// Output format (text, json).
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a synthetic directory backup.
    Generate {
        /// Directory to write the backup into.
        path: PathBuf,

        /// Keys in the snapshot.
        #[arg(short, long, default_value = "100")]
        keys: usize,

        /// Log files following the snapshot.
        #[arg(short, long, default_value = "2")]
        logs: u64,

        /// Mutation groups per log file.
        #[arg(short, long, default_value = "20")]
        groups: u64,

        /// Block size of every file.
        #[arg(long, default_value = "4096")]
        block_size: u32,

        /// Seed for the generated contents.
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Configuration commands.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration.
    Show {
        /// Directory holding fastrestore.toml.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Output format (text, json, toml).
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color);

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Restore {
            backup,
            target_version,
            begin,
            end,
            remove_prefix,
            add_prefix,
            no_lock,
            workers,
            dump,
            project,
        } => {
            commands::restore::run(RestoreOptions {
                backup,
                target_version,
                begin,
                end,
                remove_prefix,
                add_prefix,
                lock_db: !no_lock,
                workers,
                dump,
                project,
            })
            .await
        }
        Commands::Describe {
            backup,
            files,
            format,
        } => commands::describe::run(&backup, files, &format).await,
        Commands::Generate {
            path,
            keys,
            logs,
            groups,
            block_size,
            seed,
        } => {
            commands::generate::run(GenerateOptions {
                path,
                keys,
                logs,
                groups,
                block_size,
                seed,
            })
            .await
        }
        Commands::Config(ConfigCommands::Show { project, format }) => {
            commands::config::show(&project, &format)
        }
    }
}
