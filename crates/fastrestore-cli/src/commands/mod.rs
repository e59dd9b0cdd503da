//! CLI command implementations.

pub mod config;
pub mod describe;
pub mod generate;
pub mod restore;
pub mod version;

/// Accepts either a container URL or a plain directory path.
pub fn backup_url(backup: &str) -> String {
    if backup.contains("://") {
        backup.to_string()
    } else {
        format!("file://{backup}")
    }
}
