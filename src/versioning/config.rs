use crate::env;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    pub enabled: bool,
    pub backup_dir: PathBuf,
    pub version_separator: String,
    pub backup_suffix: String,
    /// Backups and versions kept per file
    pub max_versions: usize,
    /// Backups older than this are removed by cleanup
    pub retention_days: u32,
    /// Store copies gzip-compressed
    pub compression: bool,
    /// File name globs eligible for backup
    pub include: Vec<String>,
    /// Path globs never backed up
    pub exclude: Vec<String>,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self::with_data_root(Path::new("."))
    }
}

impl VersioningConfig {
    pub fn with_data_root(data_root: &Path) -> Self {
        Self {
            enabled: true,
            backup_dir: env::backups_dir_path(data_root),
            version_separator: "_v".to_string(),
            backup_suffix: "_backup".to_string(),
            max_versions: 10,
            retention_days: 30,
            compression: true,
            include: ["*.html", "*.js", "*.md", "*.json", "*.py", "*.css"]
                .into_iter()
                .map(String::from)
                .collect(),
            exclude: ["node_modules/**", "*.log", "*.tmp", "backups/**", ".git/**"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    /// Apply `VERSIONING_*` environment overrides. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = read_var(env::vars::VERSIONING_MAX_VERSIONS) {
            match value.parse() {
                Ok(max) => self.max_versions = max,
                Err(_) => warn!(
                    "Ignoring {}={}: not a number",
                    env::vars::VERSIONING_MAX_VERSIONS,
                    value
                ),
            }
        }
        if let Some(value) = read_var(env::vars::VERSIONING_RETENTION_DAYS) {
            match value.parse() {
                Ok(days) => self.retention_days = days,
                Err(_) => warn!(
                    "Ignoring {}={}: not a number",
                    env::vars::VERSIONING_RETENTION_DAYS,
                    value
                ),
            }
        }
        if let Some(value) = read_var(env::vars::VERSIONING_BACKUP_DIR) {
            self.backup_dir = PathBuf::from(value);
        }
        self
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Compiled include/exclude globs
#[derive(Debug, Clone)]
pub struct FilePatterns {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl FilePatterns {
    pub fn compile(config: &VersioningConfig) -> Result<Self, glob::PatternError> {
        let compile_all = |sources: &[String]| {
            sources
                .iter()
                .map(|s| Pattern::new(s))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            include: compile_all(&config.include)?,
            exclude: compile_all(&config.exclude)?,
        })
    }

    /// True when the file name matches an include glob and no trailing
    /// portion of the path matches an exclude glob
    pub fn should_version(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };

        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(&file_name));
        included && !self.is_excluded(path)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let parts: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        (0..parts.len()).any(|start| {
            let suffix = parts[start..].join("/");
            self.exclude.iter().any(|p| p.matches(&suffix))
        })
    }
}
