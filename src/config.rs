//! Configuration for the catalogue
//!
//! Loaded in order:
//! 1. built-in defaults
//! 2. a YAML file (`<config_dir>/mako/config.yaml` unless a path is given)
//! 3. environment variables (`MAKO_DB`, `MAKO_ON_DUPLICATE`,
//!    `MAKO_BATCH_SIZE`, `MAKO_RANK_DEFAULT`)

use crate::graph::Rank;
use crate::import::{DuplicatePolicy, ImportOptions, RetryPolicy};
use crate::storage::StoreOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MakoConfig {
    pub import: ImportConfig,
    pub store: StoreConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub on_duplicate: DuplicatePolicy,
    pub batch_size: usize,
    /// Rank for taxa that carry none
    pub taxonomic_rank_default: Rank,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            on_duplicate: DuplicatePolicy::Skip,
            batch_size: 1000,
            taxonomic_rank_default: Rank::Otu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; the platform data directory when unset
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mako").join("config.yaml"))
}

/// Default database location
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("mako").join("mako.db")
}

impl MakoConfig {
    /// Load from the default file, if present, then the environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file, then the environment
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: MakoConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let invalid = |key: &str, value: &str| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        };

        if let Some(path) = lookup("MAKO_DB").filter(|v| !v.trim().is_empty()) {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup("MAKO_ON_DUPLICATE") {
            self.import.on_duplicate = value.parse().map_err(|_| invalid("MAKO_ON_DUPLICATE", &value))?;
        }
        if let Some(value) = lookup("MAKO_BATCH_SIZE") {
            self.import.batch_size = value.trim().parse().map_err(|_| invalid("MAKO_BATCH_SIZE", &value))?;
        }
        if let Some(value) = lookup("MAKO_RANK_DEFAULT") {
            self.import.taxonomic_rank_default =
                value.parse().map_err(|_| invalid("MAKO_RANK_DEFAULT", &value))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.import.batch_size == 0 {
            return Err(ConfigError::Invalid("import.batch_size must be greater than 0".into()));
        }
        if self.store.pool_size == 0 {
            return Err(ConfigError::Invalid("store.pool_size must be greater than 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be greater than 0".into()));
        }
        if !(self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid("retry.multiplier must be at least 1".into()));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(default_db_path)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
            max_idle: self.store.pool_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            multiplier: self.retry.multiplier,
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    /// Import options for a network, seeded from the import section
    pub fn import_options(&self, network_name: impl Into<String>) -> ImportOptions {
        ImportOptions::new(network_name)
            .with_on_duplicate(self.import.on_duplicate)
            .with_batch_size(self.import.batch_size)
            .with_default_rank(self.import.taxonomic_rank_default)
    }
}
