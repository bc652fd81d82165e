use crate::usage::types::{ActivityLogEntry, UsageStats};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Reads and writes usage statistics and the activity log
#[derive(Debug, Clone)]
pub struct UsageStore {
    stats_file: Option<PathBuf>,
    activity_log: Option<PathBuf>,
}

impl UsageStore {
    pub fn new(stats_file: Option<PathBuf>, activity_log: Option<PathBuf>) -> Self {
        Self {
            stats_file,
            activity_log,
        }
    }

    pub fn stats_file(&self) -> Option<&Path> {
        self.stats_file.as_deref()
    }

    /// Load persisted statistics; `Ok(None)` when nothing was saved yet
    pub async fn load(&self) -> Result<Option<UsageStats>> {
        let Some(path) = &self.stats_file else {
            return Ok(None);
        };
        if !async_fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = async_fs::read(path)
            .await
            .with_context(|| format!("Failed to read usage stats: {}", path.display()))?;
        let stats = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse usage stats: {}", path.display()))?;
        Ok(Some(stats))
    }

    /// Write statistics through a temp file and rename, so readers never see
    /// a partial file
    pub async fn save(&self, stats: &UsageStats) -> Result<()> {
        let Some(path) = &self.stats_file else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let serialized =
            serde_json::to_vec_pretty(stats).context("Failed to serialize usage stats")?;
        let temp_file = path.with_extension("json.tmp");

        let mut file = async_fs::File::create(&temp_file)
            .await
            .context("Failed to create temporary stats file")?;
        file.write_all(&serialized)
            .await
            .context("Failed to write usage stats")?;
        file.sync_all()
            .await
            .context("Failed to sync usage stats")?;
        drop(file);

        async_fs::rename(&temp_file, path)
            .await
            .with_context(|| format!("Failed to move stats into place: {}", path.display()))?;

        debug!("Usage stats saved: {} bytes", serialized.len());
        Ok(())
    }

    pub async fn append_activity(&self, entry: &ActivityLogEntry) -> Result<()> {
        let Some(path) = &self.activity_log else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut line = serde_json::to_string(entry).context("Failed to serialize activity")?;
        line.push('\n');

        let mut file = async_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open activity log: {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append activity")?;
        Ok(())
    }
}
