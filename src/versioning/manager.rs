//! File backup, versioning and rollback
//!
//! Copies of tracked files live under the backup directory, one sub-directory
//! per original file. Every copy records the SHA-256 of the original content,
//! which is checked before and after a rollback. The index of copies is kept in
//! `index.json` so history survives across processes.

use crate::env;
use crate::versioning::config::{FilePatterns, VersioningConfig};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum VersioningError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("File does not exist: {0}")]
    NotFound(PathBuf),
    #[error("No versions or backups found for file: {0}")]
    NothingToRestore(PathBuf),
    #[error("Version {version} not found for file: {path}")]
    VersionNotFound { path: PathBuf, version: String },
    #[error("Invalid version label '{0}'")]
    InvalidVersion(String),
    #[error("Integrity check failed for {path}: expected {expected}, found {actual}")]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("Invalid file pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),
    #[error("Backup index error: {0}")]
    Index(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VersioningError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> VersioningError + '_ {
    move |source| VersioningError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    pub hash: String,
    #[serde(default)]
    pub compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub team: String,
    pub action: String,
    pub description: String,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Default for VersionMetadata {
    fn default() -> Self {
        Self {
            team: "unknown".to_string(),
            action: "version".to_string(),
            description: String::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub original_path: PathBuf,
    pub version_path: PathBuf,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    pub hash: String,
    #[serde(default)]
    pub compressed: bool,
    pub metadata: VersionMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileHistory {
    pub file: PathBuf,
    pub versions: Vec<VersionRecord>,
    pub backups: Vec<BackupRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackResult {
    /// Version label, or the backup timestamp when restored from a backup
    pub rolled_back_to: String,
    pub restored_hash: String,
    /// Snapshot of the content that was replaced
    pub pre_rollback_backup: Option<BackupRecord>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionedFileSummary {
    pub path: PathBuf,
    pub versions: usize,
    pub backups: usize,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub cleaned_backups: usize,
    pub cleaned_versions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersioningStats {
    pub total_files: usize,
    pub total_versions: usize,
    pub total_backups: usize,
    pub total_size_bytes: u64,
    pub total_size: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionIndex {
    #[serde(default)]
    files: BTreeMap<PathBuf, FileHistory>,
}

/// Backup, version and rollback manager for individual files.
///
/// All I/O is blocking; callers on an async runtime should use
/// `spawn_blocking` for large files.
#[derive(Debug)]
pub struct FileVersioning {
    config: VersioningConfig,
    patterns: FilePatterns,
    index_path: PathBuf,
    index: Mutex<VersionIndex>,
}

impl FileVersioning {
    pub fn open(config: VersioningConfig) -> Result<Self> {
        let patterns = FilePatterns::compile(&config)?;
        fs::create_dir_all(&config.backup_dir).map_err(io_error(&config.backup_dir))?;

        let index_path = env::backup_index_file_path(&config.backup_dir);
        let index = if index_path.exists() {
            let content = fs::read(&index_path).map_err(io_error(&index_path))?;
            serde_json::from_slice(&content)?
        } else {
            VersionIndex::default()
        };

        debug!(
            "File versioning ready at {} ({} tracked files)",
            config.backup_dir.display(),
            index.files.len()
        );

        Ok(Self {
            config,
            patterns,
            index_path,
            index: Mutex::new(index),
        })
    }

    pub fn config(&self) -> &VersioningConfig {
        &self.config
    }

    pub fn should_version(&self, path: &Path) -> bool {
        self.patterns.should_version(path)
    }

    /// Copy `path` into the backup directory.
    ///
    /// Returns `Ok(None)` when versioning is disabled, the file is missing, or
    /// the file is not eligible under the include/exclude patterns.
    pub fn create_backup(&self, path: &Path) -> Result<Option<BackupRecord>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let absolute = absolute_path(path)?;
        if !absolute.is_file() {
            warn!("File does not exist for backup: {}", path.display());
            return Ok(None);
        }
        if !self.patterns.should_version(&absolute) {
            debug!("File not eligible for versioning: {}", path.display());
            return Ok(None);
        }

        let mut index = self.lock_index();
        let record = self.backup_unchecked(&mut index, &absolute)?;
        self.save_index(&index)?;
        Ok(Some(record))
    }

    fn backup_unchecked(&self, index: &mut VersionIndex, absolute: &Path) -> Result<BackupRecord> {
        let content = fs::read(absolute).map_err(io_error(absolute))?;
        let timestamp = Utc::now();
        let (stem, ext) = split_name(absolute);
        let file_dir = self.file_dir(absolute);
        let name = format!(
            "{}{}_{}{}",
            stem,
            self.config.backup_suffix,
            timestamp.format("%Y-%m-%d_%H-%M-%S-%3f"),
            ext
        );
        let backup_path = self.unique_path(&file_dir, &name);
        self.write_copy(&backup_path, &content)?;

        let record = BackupRecord {
            original_path: absolute.to_path_buf(),
            backup_path,
            timestamp,
            size: content.len() as u64,
            hash: calculate_sha256(&content),
            compressed: self.config.compression,
        };
        info!("Backup created: {}", record.backup_path.display());

        let history = history_entry(index, absolute);
        history.backups.push(record.clone());
        let overflow = history.backups.len().saturating_sub(self.config.max_versions.max(1));
        for old in history.backups.drain(..overflow) {
            remove_copy(&old.backup_path);
        }

        Ok(record)
    }

    /// Store a labelled copy of `path`. An existing copy with the same label is replaced.
    pub fn create_version(
        &self,
        path: &Path,
        version: &str,
        metadata: VersionMetadata,
    ) -> Result<VersionRecord> {
        let version = version.trim();
        if version.is_empty() || version.contains(['/', '\\']) || version == "." || version == ".." {
            return Err(VersioningError::InvalidVersion(version.to_string()));
        }

        let absolute = absolute_path(path)?;
        if !absolute.is_file() {
            return Err(VersioningError::NotFound(absolute));
        }

        let content = fs::read(&absolute).map_err(io_error(&absolute))?;
        let (stem, ext) = split_name(&absolute);
        let version_path = self
            .file_dir(&absolute)
            .join(self.stored_name(&format!("{}{}{}{}", stem, self.config.version_separator, version, ext)));
        self.write_copy(&version_path, &content)?;

        let record = VersionRecord {
            original_path: absolute.clone(),
            version_path,
            version: version.to_string(),
            timestamp: Utc::now(),
            size: content.len() as u64,
            hash: calculate_sha256(&content),
            compressed: self.config.compression,
            metadata,
        };
        info!(
            "Version {} created for {} by {} ({})",
            record.version,
            absolute.display(),
            record.metadata.team,
            record.metadata.action
        );

        let mut index = self.lock_index();
        let history = history_entry(&mut index, &absolute);
        history.versions.retain(|v| v.version != record.version);
        history.versions.push(record.clone());
        let overflow = history.versions.len().saturating_sub(self.config.max_versions.max(1));
        for old in history.versions.drain(..overflow) {
            remove_copy(&old.version_path);
        }
        self.save_index(&index)?;

        Ok(record)
    }

    /// Restore `path` to `version`, or to the most recent version (falling
    /// back to the most recent backup) when `version` is `None`.
    ///
    /// The current content is snapshotted first, and the stored copy's hash
    /// is verified both before and after it is written back.
    pub fn rollback(&self, path: &Path, version: Option<&str>) -> Result<RollbackResult> {
        let absolute = absolute_path(path)?;
        let mut index = self.lock_index();

        let (label, source, compressed, expected_hash) = {
            let history = index
                .files
                .get(&absolute)
                .ok_or_else(|| VersioningError::NothingToRestore(absolute.clone()))?;

            match version {
                Some(wanted) => {
                    let record = history
                        .versions
                        .iter()
                        .find(|v| v.version == wanted)
                        .ok_or_else(|| VersioningError::VersionNotFound {
                            path: absolute.clone(),
                            version: wanted.to_string(),
                        })?;
                    (
                        record.version.clone(),
                        record.version_path.clone(),
                        record.compressed,
                        record.hash.clone(),
                    )
                }
                None => match (history.versions.last(), history.backups.last()) {
                    (Some(record), _) => (
                        record.version.clone(),
                        record.version_path.clone(),
                        record.compressed,
                        record.hash.clone(),
                    ),
                    (None, Some(record)) => (
                        record.timestamp.to_rfc3339(),
                        record.backup_path.clone(),
                        record.compressed,
                        record.hash.clone(),
                    ),
                    (None, None) => return Err(VersioningError::NothingToRestore(absolute)),
                },
            }
        };

        let restored = self.read_copy(&source, compressed)?;
        verify_hash(&source, &expected_hash, &restored)?;

        let pre_rollback_backup = if absolute.is_file() {
            Some(self.backup_unchecked(&mut index, &absolute)?)
        } else {
            None
        };

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&absolute, &restored).map_err(io_error(&absolute))?;

        let written = fs::read(&absolute).map_err(io_error(&absolute))?;
        verify_hash(&absolute, &expected_hash, &written)?;
        self.save_index(&index)?;

        info!("File rolled back to {}: {}", label, absolute.display());
        Ok(RollbackResult {
            rolled_back_to: label,
            restored_hash: expected_hash,
            pre_rollback_backup,
            timestamp: Utc::now(),
        })
    }

    /// Versions and backups of `path`, oldest first
    pub fn history(&self, path: &Path) -> Result<FileHistory> {
        let absolute = absolute_path(path)?;
        let index = self.lock_index();
        let mut history = index.files.get(&absolute).cloned().unwrap_or_else(|| FileHistory {
            file: absolute.clone(),
            ..Default::default()
        });
        history.versions.sort_by_key(|v| v.timestamp);
        history.backups.sort_by_key(|b| b.timestamp);
        Ok(history)
    }

    /// Tracked files, most recently versioned first
    pub fn list_versioned_files(&self) -> Vec<VersionedFileSummary> {
        let index = self.lock_index();
        let mut files: Vec<VersionedFileSummary> = index
            .files
            .values()
            .map(|h| VersionedFileSummary {
                path: h.file.clone(),
                versions: h.versions.len(),
                backups: h.backups.len(),
                last_modified: h
                    .versions
                    .iter()
                    .map(|v| v.timestamp)
                    .chain(h.backups.iter().map(|b| b.timestamp))
                    .max(),
            })
            .collect();
        files.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        files
    }

    /// Drop backups past the retention period and versions beyond `max_versions`
    pub fn cleanup_old_files(&self) -> Result<CleanupReport> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.config.retention_days));
        let max_versions = self.config.max_versions.max(1);
        let mut report = CleanupReport::default();

        let mut index = self.lock_index();
        for history in index.files.values_mut() {
            let (expired, kept): (Vec<_>, Vec<_>) = history
                .backups
                .drain(..)
                .partition(|b| b.timestamp < cutoff);
            for old in &expired {
                remove_copy(&old.backup_path);
            }
            report.cleaned_backups += expired.len();
            history.backups = kept;

            let overflow = history.versions.len().saturating_sub(max_versions);
            for old in history.versions.drain(..overflow) {
                remove_copy(&old.version_path);
                report.cleaned_versions += 1;
            }
        }
        index
            .files
            .retain(|_, h| !h.versions.is_empty() || !h.backups.is_empty());
        self.save_index(&index)?;

        info!(
            "Cleanup completed: {} backups, {} versions removed",
            report.cleaned_backups, report.cleaned_versions
        );
        Ok(report)
    }

    pub fn stats(&self) -> VersioningStats {
        let index = self.lock_index();
        let total_versions = index.files.values().map(|h| h.versions.len()).sum();
        let total_backups = index.files.values().map(|h| h.backups.len()).sum();
        let total_size_bytes = index
            .files
            .values()
            .flat_map(|h| {
                h.versions
                    .iter()
                    .map(|v| v.size)
                    .chain(h.backups.iter().map(|b| b.size))
            })
            .sum();

        VersioningStats {
            total_files: index.files.len(),
            total_versions,
            total_backups,
            total_size_bytes,
            total_size: format_bytes(total_size_bytes),
        }
    }

    fn lock_index(&self) -> MutexGuard<'_, VersionIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save_index(&self, index: &VersionIndex) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(index)?;
        let temp_path = self.index_path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(io_error(&temp_path))?;
        fs::rename(&temp_path, &self.index_path).map_err(io_error(&self.index_path))?;
        Ok(())
    }

    /// Per-file directory, keyed by a digest of the absolute path
    fn file_dir(&self, absolute: &Path) -> PathBuf {
        let digest = calculate_sha256(absolute.to_string_lossy().as_bytes());
        self.config.backup_dir.join(&digest[..16])
    }

    fn stored_name(&self, name: &str) -> String {
        if self.config.compression {
            format!("{}.gz", name)
        } else {
            name.to_string()
        }
    }

    fn unique_path(&self, dir: &Path, name: &str) -> PathBuf {
        let candidate = dir.join(self.stored_name(name));
        if !candidate.exists() {
            return candidate;
        }
        (1..)
            .map(|n| dir.join(self.stored_name(&format!("{}.{}", name, n))))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }

    fn write_copy(&self, target: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        if self.config.compression {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(content).map_err(io_error(target))?;
            let compressed = encoder.finish().map_err(io_error(target))?;
            fs::write(target, compressed).map_err(io_error(target))
        } else {
            fs::write(target, content).map_err(io_error(target))
        }
    }

    fn read_copy(&self, source: &Path, compressed: bool) -> Result<Vec<u8>> {
        let raw = fs::read(source).map_err(io_error(source))?;
        if !compressed {
            return Ok(raw);
        }
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(io_error(source))?;
        Ok(decoded)
    }
}

fn history_entry<'a>(index: &'a mut VersionIndex, absolute: &Path) -> &'a mut FileHistory {
    index
        .files
        .entry(absolute.to_path_buf())
        .or_insert_with(|| FileHistory {
            file: absolute.to_path_buf(),
            ..Default::default()
        })
}

fn remove_copy(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!("Cleaned up old copy: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to clean up {}: {}", path.display(), e),
    }
}

fn verify_hash(path: &Path, expected: &str, content: &[u8]) -> Result<()> {
    let actual = calculate_sha256(content);
    if actual == expected {
        Ok(())
    } else {
        Err(VersioningError::IntegrityMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(io_error(path))
}

fn split_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

pub fn calculate_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let mut unit = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && unit < UNITS.len() - 1 {
        scaled /= 1024;
        unit += 1;
    }
    let value = bytes as f64 / 1024f64.powi(unit as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
