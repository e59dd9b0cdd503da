//! Layered loading of [`RestoreConfig`].
//!
//! Later layers override earlier ones key by key:
//!
//! ```text
//! defaults ─► <user config dir>/config.toml ─► fastrestore.toml
//!          ─► fastrestore.local.toml ─► FASTRESTORE_<SECTION>__<KEY>
//! ```
//!
//! Environment overrides name a section and a key joined by `__`, so
//! `FASTRESTORE_RPC__ROUND_TIMEOUT_MS=250` sets `rpc.round_timeout_ms`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat, Map};
use directories::ProjectDirs;

use crate::RestoreConfig;

/// Project-level file, usually checked in.
pub const PROJECT_FILE: &str = "fastrestore.toml";
/// Per-checkout overrides of [`PROJECT_FILE`], usually gitignored.
pub const LOCAL_FILE: &str = "fastrestore.local.toml";

const ENV_PREFIX: &str = "FASTRESTORE";
const ENV_SEPARATOR: &str = "__";

/// `config.toml` under the platform's config directory for fastrestore.
fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "fastrestore", "fastrestore")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Merges every configuration layer for one project directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    user_file: Option<PathBuf>,
    env_prefix: String,
    /// Overrides as `(variable, value)`; only `<prefix>_<SECTION>__<KEY>`
    /// names are kept.
    env: Vec<(String, String)>,
}

impl ConfigLoader {
    /// A loader reading the user file, the files in `project_dir` and the
    /// process environment.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            user_file: user_config_file(),
            env_prefix: ENV_PREFIX.to_string(),
            env: Vec::new(),
        }
        .with_env(env::vars())
    }

    /// Replaces the user-level file; `None` skips that layer.
    pub fn with_user_file(mut self, file: Option<PathBuf>) -> Self {
        self.user_file = file;
        self
    }

    /// Takes overrides from `vars` instead of the process environment.
    pub fn with_env(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let prefix = format!("{}_", self.env_prefix);
        self.env = vars
            .into_iter()
            .filter(|(name, _)| {
                name.strip_prefix(&prefix)
                    .is_some_and(|rest| rest.contains(ENV_SEPARATOR))
            })
            .collect();
        self.env.sort();
        self
    }

    /// Existing configuration files, lowest precedence first.
    pub fn files(&self) -> Vec<PathBuf> {
        self.user_file
            .iter()
            .cloned()
            .chain([
                self.project_dir.join(PROJECT_FILE),
                self.project_dir.join(LOCAL_FILE),
            ])
            .filter(|path| path.is_file())
            .collect()
    }

    /// Environment variables that override file settings.
    pub fn env_overrides(&self) -> impl Iterator<Item = &str> {
        self.env.iter().map(|(name, _)| name.as_str())
    }

    /// Merges every layer and validates the result.
    ///
    /// Errors name the layers that were merged, so a bad value can be traced
    /// to the file or variable that set it.
    pub fn load(&self) -> Result<RestoreConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&RestoreConfig::default())?);
        for file in self.files() {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml));
        }
        let env: Map<String, String> = self.env.iter().cloned().collect();
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(Some(env)),
        );

        let config: RestoreConfig = builder
            .build()
            .and_then(|merged| merged.try_deserialize())
            .with_context(|| format!("Failed to merge configuration from {}", self.layers()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration from {}", self.layers()))?;
        Ok(config)
    }

    fn layers(&self) -> String {
        let mut layers: Vec<String> = vec!["defaults".to_string()];
        layers.extend(self.files().iter().map(|f| f.display().to_string()));
        layers.extend(self.env_overrides().map(str::to_string));
        layers.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn isolated(dir: &Path) -> ConfigLoader {
        ConfigLoader::new(dir)
            .with_user_file(None)
            .with_env(Vec::new())
    }

    fn var(name: &str, value: &str) -> (String, String) {
        (name.to_string(), value.to_string())
    }

    #[test]
    fn test_empty_project_yields_defaults() {
        let dir = tempdir().unwrap();
        let loader = isolated(dir.path());
        assert!(loader.files().is_empty());
        assert_eq!(loader.load().unwrap(), RestoreConfig::default());
    }

    #[test]
    fn test_project_file_overrides_only_its_keys() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(PROJECT_FILE),
            "[cluster]\nmin_workers = 5\nloader_ratio = 2\n\n[sampling]\nsample_percent = 0.1\n",
        )
        .unwrap();

        let config = isolated(dir.path()).load().unwrap();
        assert_eq!(config.cluster.min_workers, 5);
        assert_eq!(config.cluster.loader_ratio, 2);
        assert!((config.sampling.sample_percent - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.loader, RestoreConfig::default().loader);
    }

    #[test]
    fn test_precedence_user_project_local_env() {
        let dir = tempdir().unwrap();
        let user = dir.path().join("user.toml");
        fs::write(&user, "[rpc]\nround_timeout_ms = 4000\nmax_round_retries = 7\n").unwrap();
        fs::write(dir.path().join(PROJECT_FILE), "[rpc]\nround_timeout_ms = 1000\n").unwrap();
        fs::write(dir.path().join(LOCAL_FILE), "[rpc]\nround_timeout_ms = 250\n").unwrap();

        let loader = isolated(dir.path()).with_user_file(Some(user.clone()));
        assert_eq!(
            loader.files(),
            vec![user, dir.path().join(PROJECT_FILE), dir.path().join(LOCAL_FILE)]
        );
        let config = loader.load().unwrap();
        assert_eq!(config.rpc.round_timeout_ms, 250);
        assert_eq!(config.rpc.max_round_retries, 7);

        let config = loader
            .with_env([var("FASTRESTORE_RPC__ROUND_TIMEOUT_MS", "75")])
            .load()
            .unwrap();
        assert_eq!(config.rpc.round_timeout_ms, 75);
    }

    #[test]
    fn test_env_needs_section_separator() {
        let dir = tempdir().unwrap();
        let loader = isolated(dir.path()).with_env([
            var("FASTRESTORE_LOADER__SEND_WINDOW", "3"),
            var("FASTRESTORE_VERBOSE", "1"),
            var("OTHER_LOADER__SEND_WINDOW", "9"),
        ]);
        assert_eq!(
            loader.env_overrides().collect::<Vec<_>>(),
            vec!["FASTRESTORE_LOADER__SEND_WINDOW"]
        );
        assert_eq!(loader.load().unwrap().loader.send_window, 3);
    }

    #[test]
    fn test_invalid_value_names_its_layer() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(PROJECT_FILE), "[loader]\nsend_window = 4\n").unwrap();

        let err = isolated(dir.path())
            .with_env([var("FASTRESTORE_LOADER__SEND_WINDOW", "0")])
            .load()
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("FASTRESTORE_LOADER__SEND_WINDOW"), "{message}");
        assert!(message.contains(PROJECT_FILE), "{message}");
        assert!(message.contains("send_window"), "{message}");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCAL_FILE), "[rpc\nround_timeout_ms = ").unwrap();

        let err = isolated(dir.path()).load().unwrap_err();
        assert!(format!("{err:#}").contains(LOCAL_FILE), "{err:#}");
    }

    #[test]
    fn test_user_file_lives_under_app_dir() {
        // Not every platform has a config directory.
        if let Some(file) = user_config_file() {
            assert!(file.ends_with("config.toml"));
            assert!(file.to_string_lossy().contains("fastrestore"));
        }
    }
}
