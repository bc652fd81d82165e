pub mod config;
pub mod manager;

#[cfg(test)]
mod tests;

pub use config::{FilePatterns, VersioningConfig};
pub use manager::{
    BackupRecord, CleanupReport, FileHistory, FileVersioning, RollbackResult, VersionMetadata,
    VersionRecord, VersionedFileSummary, VersioningError, VersioningStats, calculate_sha256,
    format_bytes,
};
