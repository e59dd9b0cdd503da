//! Configuration for fastrestore clusters.
//!
//! [`RestoreConfig`] holds every tunable, grouped by the component that reads
//! it. [`ConfigLoader`] merges defaults, TOML files and `FASTRESTORE_*`
//! environment overrides into one validated value.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{ConfigLoader, LOCAL_FILE, PROJECT_FILE};

const MIB: u64 = 1024 * 1024;

/// Main fastrestore configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub cluster: ClusterConfig,
    pub sampling: SamplingConfig,
    pub batching: BatchingConfig,
    pub rpc: RpcConfig,
    pub loader: LoaderConfig,
    pub applier: ApplierConfig,
}

/// Worker discovery and role split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Workers that must register before roles are assigned.
    pub min_workers: u32,
    /// Loaders per applier.
    pub loader_ratio: u32,
    pub quorum_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_workers: 3,
            loader_ratio: 1,
            quorum_timeout_ms: 30_000,
        }
    }
}

impl ClusterConfig {
    pub fn quorum_timeout(&self) -> Duration {
        Duration::from_millis(self.quorum_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Fraction of a batch's bytes sampled to compute key ranges.
    pub sample_percent: f64,
    /// Lower bound on the distance between two sampled blocks.
    pub min_sample_bytes: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_percent: 0.05,
            min_sample_bytes: 10 * MIB,
        }
    }
}

impl SamplingConfig {
    /// Bytes between two sampled blocks for a batch of `batch_bytes`.
    pub fn stride(&self, batch_bytes: u64) -> u64 {
        let scaled = (self.sample_percent * batch_bytes as f64) as u64;
        scaled.max(self.min_sample_bytes).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// A version batch closes once it holds at least this many bytes.
    pub batch_size_threshold_bytes: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size_threshold_bytes: MIB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Deadline for one fan-out round (apply rounds have none).
    pub round_timeout_ms: u64,
    /// Re-sends of a timed-out round before the request fails.
    pub max_round_retries: u32,
    /// Deadline for a whole restore request.
    pub restore_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            round_timeout_ms: 10_000,
            max_round_retries: 10,
            restore_timeout_secs: 3600,
        }
    }
}

impl RpcConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Mutation RPCs in flight per loader.
    pub send_window: usize,
    /// Mutations carried by one RPC.
    pub mutations_per_request: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            send_window: 1,
            mutations_per_request: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    pub max_commit_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: 10,
            retry_backoff_ms: 10,
        }
    }
}

impl ApplierConfig {
    /// Backoff before commit attempt `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

impl RestoreConfig {
    /// Loads every layer for the project in `project_dir`.
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new(project_dir).load()
    }

    /// Create a configuration for small in-process clusters: every block is
    /// sampled, batches stay small and rounds time out quickly.
    pub fn development() -> Self {
        Self {
            sampling: SamplingConfig {
                sample_percent: 0.0,
                min_sample_bytes: 1,
            },
            batching: BatchingConfig {
                batch_size_threshold_bytes: 64 * 1024,
            },
            rpc: RpcConfig {
                round_timeout_ms: 500,
                max_round_retries: 5,
                restore_timeout_secs: 60,
            },
            applier: ApplierConfig {
                max_commit_retries: 5,
                retry_backoff_ms: 1,
            },
            ..Default::default()
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.min_workers < 2 {
            return Err(ConfigError::ValidationError(
                "cluster.min_workers must be at least 2 (one loader and one applier)".to_string(),
            ));
        }
        if self.cluster.loader_ratio == 0 {
            return Err(ConfigError::ValidationError(
                "cluster.loader_ratio must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sampling.sample_percent) {
            return Err(ConfigError::ValidationError(format!(
                "sampling.sample_percent must be within [0, 1], got {}",
                self.sampling.sample_percent
            )));
        }
        if self.loader.send_window == 0 || self.loader.mutations_per_request == 0 {
            return Err(ConfigError::ValidationError(
                "loader.send_window and loader.mutations_per_request must be positive".to_string(),
            ));
        }
        if self.rpc.round_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rpc.round_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Render as TOML, as it would appear in `fastrestore.toml`.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
