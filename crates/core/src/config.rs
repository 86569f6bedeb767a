//! Configuration management
//!
//! Loads `config.toml` from the kaws configuration directory. Every field has
//! a default, so a missing file is the same as an empty one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::credentials::DEFAULT_REGION;
use crate::error::{Error, Result};
use crate::retry::{RetryBuilder, RetryConfig, StepBackoff};

/// Environment variable that overrides the configuration directory
pub const CONFIG_DIR_ENV: &str = "KAWS_CONFIG_DIR";

/// System-wide directory holding `<environment>.yml` credential files
pub const DEFAULT_SYSTEM_ROOT: &str = "/etc/kaws/aws";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Region used when none is given on the command line
    pub region: String,
    pub paths: PathsConfig,
    pub transfer: TransferConfig,
    pub retry: PaginationRetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            paths: PathsConfig::default(),
            transfer: TransferConfig::default(),
            retry: PaginationRetryConfig::default(),
        }
    }
}

/// Credential search roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// System-wide `<environment>.yml` directory
    pub system_root: PathBuf,
    /// Per-user `<environment>.yml` directory, also the credential cache root.
    /// Defaults to `~/.kaws`.
    pub user_root: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            system_root: PathBuf::from(DEFAULT_SYSTEM_ROOT),
            user_root: None,
        }
    }
}

/// Bulk transfer tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum number of concurrent copy/delete tasks
    pub workers: usize,
    /// Per-task timeout in seconds
    pub task_timeout_secs: u64,
    /// Part size for single large-key copies and uploads, in bytes
    pub part_size: u64,
    /// Part size used by bucket-wide copies, in bytes
    pub bulk_part_size: u64,
    /// Attempts per multipart part
    pub retries_per_part: u32,
    /// Concurrent parts for a single large-key copy or upload
    pub parallel: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            task_timeout_secs: 300,
            part_size: 500_000_000,
            bulk_part_size: 50_000_000,
            retries_per_part: 2,
            parallel: 1,
        }
    }
}

/// Backoff schedule for paginated listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationRetryConfig {
    pub max_attempts: u32,
    pub fixed_delays_ms: Vec<u64>,
    pub step_ms: u64,
}

impl Default for PaginationRetryConfig {
    fn default() -> Self {
        let backoff = StepBackoff::default();
        Self {
            max_attempts: backoff.max_attempts,
            fixed_delays_ms: backoff.fixed_delays_ms,
            step_ms: backoff.step_ms,
        }
    }
}

impl PaginationRetryConfig {
    /// Build the backoff schedule described by this section
    pub fn backoff(&self) -> StepBackoff {
        StepBackoff {
            max_attempts: self.max_attempts,
            fixed_delays_ms: self.fixed_delays_ms.clone(),
            step_ms: self.step_ms,
        }
    }
}

impl TransferConfig {
    /// Per-part retry policy: exponential backoff with the configured budget
    pub fn part_retry(&self) -> RetryConfig {
        RetryBuilder::new()
            .max_attempts(self.retries_per_part)
            .build()
    }
}

/// Loads and saves [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Use `$KAWS_CONFIG_DIR/config.toml`, else `<config dir>/kaws/config.toml`
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .ok_or_else(|| Error::Config("Cannot determine config directory".to_string()))?
                .join("kaws"),
        };
        Ok(Self::with_path(dir.join("config.toml")))
    }

    /// Use an explicit config file path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Path of the config file
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, falling back to defaults when the file does not exist
    pub fn load(&self) -> Result<Config> {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.config_path.display(), "No config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&content).map_err(|e| Error::Toml {
            path: self.config_path.clone(),
            message: e.to_string(),
        })
    }

    /// Write the config, creating the parent directory if needed
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));
        let config = manager.load().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.transfer.workers, 10);
        assert_eq!(config.transfer.part_size, 500_000_000);
        assert_eq!(config.retry.fixed_delays_ms, vec![0, 1000, 2000]);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "region = \"eu-west-1\"\n[transfer]\nworkers = 3\n",
        )
        .unwrap();

        let config = ConfigManager::with_path(&path).load().unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.transfer.workers, 3);
        assert_eq!(config.transfer.task_timeout_secs, 300);
        assert_eq!(config.paths.system_root, PathBuf::from(DEFAULT_SYSTEM_ROOT));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "region = [").unwrap();

        let err = ConfigManager::with_path(&path).load().unwrap_err();
        assert!(matches!(err, Error::Toml { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nested/config.toml"));
        let mut config = Config::default();
        config.transfer.retries_per_part = 5;
        config.paths.user_root = Some(temp.path().join("user"));

        manager.save(&config).unwrap();
        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn test_part_retry_uses_budget() {
        let transfer = TransferConfig {
            retries_per_part: 4,
            ..Default::default()
        };
        assert_eq!(transfer.part_retry().max_attempts, 4);
    }
}
