//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./metateam.toml or ./.metateam/config.toml
//! 2. User config: ~/.metateam/config.toml
//! 3. Built-in defaults

use crate::claude::ClientConfig;
use crate::env;
use crate::errors::ErrorHandlerConfig;
use crate::retry::{CircuitBreakerConfig, RetryPolicy};
use crate::usage::UsageConfig;
use crate::versioning::VersioningConfig;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the client stack needs, as read from a TOML file.
///
/// Paths left at their defaults are placed under `data_root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub data_root: PathBuf,
    pub client: ClientConfig,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub errors: ErrorHandlerConfig,
    pub usage: UsageConfig,
    pub versioning: VersioningConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::with_data_root(PathBuf::from("."))
    }
}

impl SystemConfig {
    pub fn with_data_root(data_root: PathBuf) -> Self {
        let errors = ErrorHandlerConfig {
            log_file: Some(env::error_log_file_path(&data_root)),
            ..Default::default()
        };
        Self {
            client: ClientConfig::default(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            errors,
            usage: UsageConfig::with_data_root(&data_root),
            versioning: VersioningConfig::with_data_root(&data_root),
            data_root,
        }
    }

    /// Move default-located files under `data_root`. Explicitly configured
    /// paths are left alone.
    pub fn rebase_paths(mut self) -> Self {
        let cwd = Path::new(".");
        let root = self.data_root.clone();

        rebase(&mut self.usage.stats_file, env::usage_stats_file_path(cwd), env::usage_stats_file_path(&root));
        rebase(&mut self.usage.activity_log, env::usage_log_file_path(cwd), env::usage_log_file_path(&root));
        rebase(&mut self.errors.log_file, env::error_log_file_path(cwd), env::error_log_file_path(&root));
        if self.versioning.backup_dir == env::backups_dir_path(cwd) {
            self.versioning.backup_dir = env::backups_dir_path(&root);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.client.endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: self.client.endpoint.clone(),
            source,
        })?;
        if self.client.default_max_tokens == 0 {
            return Err(ConfigError::Invalid("client.default_max_tokens must be positive".to_string()));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid("circuit breaker thresholds must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::Invalid("retry.jitter_factor must be within 0..=1".to_string()));
        }
        if self.versioning.max_versions == 0 {
            return Err(ConfigError::Invalid("versioning.max_versions must be positive".to_string()));
        }
        Ok(())
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SystemConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let config = config.rebase_paths();
        config.validate()?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn rebase(slot: &mut Option<PathBuf>, default: PathBuf, rebased: PathBuf) {
    if slot.as_deref() == Some(default.as_path()) {
        *slot = Some(rebased);
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<SystemConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return SystemConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(SystemConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        let found = Self::get_config_candidates()
            .into_iter()
            .inspect(|candidate| debug!("Checking for config file: {:?}", candidate))
            .find(|candidate| candidate.is_file());

        if found.is_none() {
            debug!("No config file found in discovery hierarchy");
        }
        found
    }

    /// Configuration file candidates in priority order
    pub fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "✓ EXISTS"
            } else if candidate.exists() {
                "✗ NOT A FILE"
            } else {
                "✗ NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}
