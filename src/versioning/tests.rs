use super::*;
use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn versioning_in(dir: &TempDir) -> FileVersioning {
    let config = VersioningConfig::with_data_root(dir.path());
    FileVersioning::open(config).unwrap()
}

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join("work").join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn metadata(team: &str) -> VersionMetadata {
    VersionMetadata {
        team: team.to_string(),
        action: "review".to_string(),
        description: "checkpoint".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_default_config() {
    let config = VersioningConfig::with_data_root(Path::new("/data"));
    assert!(config.enabled);
    assert_eq!(config.backup_dir, Path::new("/data/backups"));
    assert_eq!(config.max_versions, 10);
    assert_eq!(config.retention_days, 30);
    assert!(config.compression);
    assert!(config.include.contains(&"*.md".to_string()));
    assert!(config.exclude.contains(&"node_modules/**".to_string()));
}

#[test]
fn test_pattern_filtering() {
    let patterns = FilePatterns::compile(&VersioningConfig::default()).unwrap();

    assert!(patterns.should_version(Path::new("/project/docs/readme.md")));
    assert!(patterns.should_version(Path::new("src/app.js")));
    assert!(!patterns.should_version(Path::new("src/main.rs")));
    assert!(!patterns.should_version(Path::new("/project/node_modules/pkg/index.js")));
    assert!(!patterns.should_version(Path::new("/project/.git/config.json")));
    assert!(!patterns.should_version(Path::new("/project/backups/old.md")));
}

#[test]
fn test_invalid_pattern_rejected() {
    let config = VersioningConfig {
        include: vec!["[unclosed".to_string()],
        ..Default::default()
    };
    assert!(matches!(
        FileVersioning::open(config),
        Err(VersioningError::InvalidPattern(_))
    ));
}

#[test]
fn test_backup_round_trip_preserves_hash() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let file = write_file(&dir, "notes.md", "# Notes\n\nfirst draft\n");

    let record = versioning.create_backup(&file).unwrap().unwrap();

    assert!(record.backup_path.exists());
    assert!(record.backup_path.starts_with(&versioning.config().backup_dir));
    assert!(record.compressed);
    assert_eq!(record.size, 21);
    assert_eq!(record.hash, calculate_sha256(b"# Notes\n\nfirst draft\n"));

    let name = record.backup_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("notes_backup_"));
    assert!(name.ends_with(".md.gz"));
}

#[test]
fn test_backup_skips_ineligible_and_missing_files() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);

    let rust_file = write_file(&dir, "main.rs", "fn main() {}");
    assert!(versioning.create_backup(&rust_file).unwrap().is_none());

    let missing = dir.path().join("work").join("missing.md");
    assert!(versioning.create_backup(&missing).unwrap().is_none());

    assert_eq!(versioning.stats().total_backups, 0);
}

#[test]
fn test_backup_disabled() {
    let dir = TempDir::new().unwrap();
    let config = VersioningConfig {
        enabled: false,
        ..VersioningConfig::with_data_root(dir.path())
    };
    let versioning = FileVersioning::open(config).unwrap();
    let file = write_file(&dir, "notes.md", "content");

    assert!(versioning.create_backup(&file).unwrap().is_none());
}

#[test]
fn test_backups_pruned_beyond_max_versions() {
    let dir = TempDir::new().unwrap();
    let config = VersioningConfig {
        max_versions: 2,
        ..VersioningConfig::with_data_root(dir.path())
    };
    let versioning = FileVersioning::open(config).unwrap();
    let file = write_file(&dir, "page.html", "v1");

    let first = versioning.create_backup(&file).unwrap().unwrap();
    fs::write(&file, "v2").unwrap();
    versioning.create_backup(&file).unwrap().unwrap();
    fs::write(&file, "v3").unwrap();
    versioning.create_backup(&file).unwrap().unwrap();

    let history = versioning.history(&file).unwrap();
    assert_eq!(history.backups.len(), 2);
    assert!(!first.backup_path.exists());
    assert_eq!(history.backups[1].hash, calculate_sha256(b"v3"));
}

#[test]
fn test_create_version_and_rollback() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let file = write_file(&dir, "plan.md", "original plan");

    let v1 = versioning.create_version(&file, "1.0", metadata("strategy")).unwrap();
    assert_eq!(v1.version, "1.0");
    assert_eq!(v1.metadata.team, "strategy");
    let name = v1.version_path.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(name, "plan_v1.0.md.gz");

    fs::write(&file, "rewritten plan").unwrap();
    let result = versioning.rollback(&file, Some("1.0")).unwrap();

    assert_eq!(fs::read_to_string(&file).unwrap(), "original plan");
    assert_eq!(result.rolled_back_to, "1.0");
    assert_eq!(result.restored_hash, calculate_sha256(b"original plan"));

    // The replaced content is recoverable
    let snapshot = result.pre_rollback_backup.unwrap();
    assert_eq!(snapshot.hash, calculate_sha256(b"rewritten plan"));
    assert!(snapshot.backup_path.exists());
}

#[test]
fn test_rollback_defaults_to_latest_version() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let file = write_file(&dir, "data.json", "{\"v\":1}");

    versioning.create_version(&file, "1", metadata("ops")).unwrap();
    fs::write(&file, "{\"v\":2}").unwrap();
    versioning.create_version(&file, "2", metadata("ops")).unwrap();
    fs::write(&file, "{\"v\":3}").unwrap();

    let result = versioning.rollback(&file, None).unwrap();
    assert_eq!(result.rolled_back_to, "2");
    assert_eq!(fs::read_to_string(&file).unwrap(), "{\"v\":2}");
}

#[test]
fn test_rollback_falls_back_to_latest_backup() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let file = write_file(&dir, "style.css", "body {}");

    versioning.create_backup(&file).unwrap().unwrap();
    fs::write(&file, "body { color: red; }").unwrap();

    versioning.rollback(&file, None).unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "body {}");
}

#[test]
fn test_rollback_of_ineligible_file_still_snapshots() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let file = write_file(&dir, "build.log", "first run");

    // Explicit versions ignore the include/exclude patterns
    versioning.create_version(&file, "baseline", metadata("ops")).unwrap();
    fs::write(&file, "second run").unwrap();

    let result = versioning.rollback(&file, Some("baseline")).unwrap();
    assert!(result.pre_rollback_backup.is_some());
    assert_eq!(fs::read_to_string(&file).unwrap(), "first run");
}

#[test]
fn test_rollback_errors() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let file = write_file(&dir, "notes.md", "content");

    assert!(matches!(
        versioning.rollback(&file, None),
        Err(VersioningError::NothingToRestore(_))
    ));

    versioning.create_version(&file, "1", metadata("ops")).unwrap();
    assert!(matches!(
        versioning.rollback(&file, Some("9")),
        Err(VersioningError::VersionNotFound { .. })
    ));
}

#[test]
fn test_rollback_detects_tampered_copy() {
    let dir = TempDir::new().unwrap();
    let config = VersioningConfig {
        compression: false,
        ..VersioningConfig::with_data_root(dir.path())
    };
    let versioning = FileVersioning::open(config).unwrap();
    let file = write_file(&dir, "notes.md", "trusted");

    let record = versioning.create_version(&file, "1", metadata("ops")).unwrap();
    fs::write(&record.version_path, "tampered").unwrap();
    fs::write(&file, "current").unwrap();

    assert!(matches!(
        versioning.rollback(&file, Some("1")),
        Err(VersioningError::IntegrityMismatch { .. })
    ));
    assert_eq!(fs::read_to_string(&file).unwrap(), "current");
}

#[test]
fn test_version_label_validation_and_replacement() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let file = write_file(&dir, "notes.md", "a");

    assert!(matches!(
        versioning.create_version(&file, "../escape", metadata("ops")),
        Err(VersioningError::InvalidVersion(_))
    ));
    assert!(matches!(
        versioning.create_version(&file, "  ", metadata("ops")),
        Err(VersioningError::InvalidVersion(_))
    ));

    versioning.create_version(&file, "1", metadata("ops")).unwrap();
    fs::write(&file, "b").unwrap();
    versioning.create_version(&file, "1", metadata("ops")).unwrap();

    let history = versioning.history(&file).unwrap();
    assert_eq!(history.versions.len(), 1);
    assert_eq!(history.versions[0].hash, calculate_sha256(b"b"));
}

#[test]
fn test_create_version_missing_file() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let missing = dir.path().join("nope.md");

    assert!(matches!(
        versioning.create_version(&missing, "1", metadata("ops")),
        Err(VersioningError::NotFound(_))
    ));
}

#[test]
fn test_index_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "notes.md", "kept");
    {
        let versioning = versioning_in(&dir);
        versioning.create_version(&file, "1", metadata("ops")).unwrap();
    }

    fs::write(&file, "changed").unwrap();
    let reopened = versioning_in(&dir);
    reopened.rollback(&file, Some("1")).unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "kept");
}

#[test]
fn test_list_and_stats() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let a = write_file(&dir, "a.md", "aaaa");
    let b = write_file(&dir, "b.js", "bb");

    versioning.create_backup(&a).unwrap().unwrap();
    versioning.create_version(&a, "1", metadata("ops")).unwrap();
    versioning.create_backup(&b).unwrap().unwrap();

    let files = versioning.list_versioned_files();
    assert_eq!(files.len(), 2);
    let summary_a = files.iter().find(|f| f.path.ends_with("a.md")).unwrap();
    assert_eq!(summary_a.versions, 1);
    assert_eq!(summary_a.backups, 1);

    let stats = versioning.stats();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.total_versions, 1);
    assert_eq!(stats.total_backups, 2);
    assert_eq!(stats.total_size_bytes, 10);
    assert_eq!(stats.total_size, "10 Bytes");
}

#[test]
fn test_cleanup_trims_versions() {
    let dir = TempDir::new().unwrap();
    let versioning = versioning_in(&dir);
    let file = write_file(&dir, "notes.md", "x");

    for label in ["1", "2", "3"] {
        versioning.create_version(&file, label, metadata("ops")).unwrap();
    }
    let report = versioning.cleanup_old_files().unwrap();
    assert_eq!(report, CleanupReport::default());

    let tight = FileVersioning::open(VersioningConfig {
        max_versions: 1,
        ..VersioningConfig::with_data_root(dir.path())
    })
    .unwrap();
    let report = tight.cleanup_old_files().unwrap();
    assert_eq!(report.cleaned_versions, 2);
    assert_eq!(tight.history(&file).unwrap().versions[0].version, "3");
}

#[test]
fn test_format_bytes() {
    assert_eq!(format_bytes(0), "0 Bytes");
    assert_eq!(format_bytes(512), "512 Bytes");
    assert_eq!(format_bytes(1536), "1.5 KB");
    assert_eq!(format_bytes(1024 * 1024), "1 MB");
}

#[test]
#[serial]
fn test_env_overrides() {
    // SAFETY: serialized with every other test touching these variables
    unsafe {
        std::env::set_var("VERSIONING_MAX_VERSIONS", "4");
        std::env::set_var("VERSIONING_RETENTION_DAYS", "not-a-number");
        std::env::set_var("VERSIONING_BACKUP_DIR", "/var/backups/meta");
    }

    let config = VersioningConfig::default().with_env_overrides();
    assert_eq!(config.max_versions, 4);
    assert_eq!(config.retention_days, 30);
    assert_eq!(config.backup_dir, Path::new("/var/backups/meta"));

    unsafe {
        std::env::remove_var("VERSIONING_MAX_VERSIONS");
        std::env::remove_var("VERSIONING_RETENTION_DAYS");
        std::env::remove_var("VERSIONING_BACKUP_DIR");
    }
}
