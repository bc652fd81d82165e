//! Environment constants and path utilities.
//!
//! Centralizes the directory names, file names and environment variable names
//! used across the client, so the on-disk layout is defined in one place.

use std::path::{Path, PathBuf};

/// Hidden directory holding local configuration (like .git, .vscode)
pub const CONFIG_DIR_NAME: &str = ".metateam";

/// Configuration file name inside [`CONFIG_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "metateam.toml";

/// Environment variable names
pub mod vars {
    /// Primary API key variable, checked first
    pub const CLAUDE_API_KEY: &str = "CLAUDE_API_KEY";

    /// Alternate API key variable, checked when the primary is absent
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

    /// Tracing filter override for the binary
    pub const LOG_FILTER: &str = "METATEAM_LOG";

    /// Versioning overrides
    pub const VERSIONING_MAX_VERSIONS: &str = "VERSIONING_MAX_VERSIONS";
    pub const VERSIONING_RETENTION_DAYS: &str = "VERSIONING_RETENTION_DAYS";
    pub const VERSIONING_BACKUP_DIR: &str = "VERSIONING_BACKUP_DIR";

    /// API key variables in lookup order
    pub const API_KEY_VARS: [&str; 2] = [CLAUDE_API_KEY, ANTHROPIC_API_KEY];
}

/// Anthropic endpoint constants
pub mod api {
    /// Messages endpoint
    pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

    /// Value of the `anthropic-version` header
    pub const API_VERSION: &str = "2023-06-01";

    /// Default model identifier
    pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

    /// Default max-token budget for a single request
    pub const DEFAULT_MAX_TOKENS: u32 = 4000;
}

/// Data directory layout
pub mod data {
    /// Usage statistics directory
    pub const STATS_DIR_NAME: &str = "stats";

    /// Usage statistics file
    pub const USAGE_STATS_FILE_NAME: &str = "claude-code-usage-stats.json";

    /// Logs directory
    pub const LOGS_DIR_NAME: &str = "logs";

    /// Newline-delimited usage activity log
    pub const USAGE_LOG_FILE_NAME: &str = "claude-code-usage.jsonl";

    /// Newline-delimited error log
    pub const ERROR_LOG_FILE_NAME: &str = "errors.jsonl";

    /// Default backup directory
    pub const BACKUPS_DIR_NAME: &str = "backups";

    /// Backup index file inside the backup directory
    pub const BACKUP_INDEX_FILE_NAME: &str = "index.json";
}

/// Test-related constants
pub mod test {
    /// Key used by tests that need a credential present
    pub const TEST_API_KEY: &str = "sk-ant-test-key";

    /// Session name used by tests
    pub const TEST_SESSION_NAME: &str = "test-session";
}

/// Build the stats directory path from a data root
pub fn stats_dir_path(data_root: &Path) -> PathBuf {
    data_root.join(data::STATS_DIR_NAME)
}

/// Build the usage statistics file path
pub fn usage_stats_file_path(data_root: &Path) -> PathBuf {
    stats_dir_path(data_root).join(data::USAGE_STATS_FILE_NAME)
}

/// Build the logs directory path from a data root
pub fn logs_dir_path(data_root: &Path) -> PathBuf {
    data_root.join(data::LOGS_DIR_NAME)
}

/// Build the usage activity log path
pub fn usage_log_file_path(data_root: &Path) -> PathBuf {
    logs_dir_path(data_root).join(data::USAGE_LOG_FILE_NAME)
}

/// Build the error log path
pub fn error_log_file_path(data_root: &Path) -> PathBuf {
    logs_dir_path(data_root).join(data::ERROR_LOG_FILE_NAME)
}

/// Build the default backup directory path
pub fn backups_dir_path(data_root: &Path) -> PathBuf {
    data_root.join(data::BACKUPS_DIR_NAME)
}

/// Build the backup index path inside a backup directory
pub fn backup_index_file_path(backup_dir: &Path) -> PathBuf {
    backup_dir.join(data::BACKUP_INDEX_FILE_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    home_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Resolve the API key: first non-blank variable in [`vars::API_KEY_VARS`] wins
pub fn resolve_api_key() -> Option<String> {
    vars::API_KEY_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Every distinct non-blank API key found in the environment, in lookup order
pub fn api_key_candidates() -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for name in vars::API_KEY_VARS {
        if let Ok(value) = std::env::var(name) {
            let value = value.trim().to_string();
            if !value.is_empty() && !keys.contains(&value) {
                keys.push(value);
            }
        }
    }
    keys
}
