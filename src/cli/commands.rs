//! Subcommand implementations for the `metateam` binary

use super::args::{ExecutionMode, GlobalOptions, QueryConfig, VersionConfig};
use crate::claude::{Attachment, ClaudeApiClient};
use crate::config::{ConfigDiscovery, SystemConfig};
use crate::integration::MetaTeamContext;
use crate::usage::{Trend, format_duration};
use crate::versioning::{VersionMetadata, format_bytes};
use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::info;

/// Resolve configuration: explicit file, else discovery; `--data-root` wins over the file
pub fn load_config(options: &GlobalOptions) -> Result<SystemConfig> {
    let mut config = match &options.config {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            SystemConfig::from_toml_file(path)?
        }
        None => ConfigDiscovery::discover_config()?,
    };

    if let Some(root) = &options.data_root {
        config = SystemConfig {
            data_root: root.clone(),
            ..config
        }
        .rebase_paths();
    }
    config.versioning = config.versioning.with_env_overrides();
    Ok(config)
}

pub async fn run(mode: ExecutionMode, options: &GlobalOptions) -> Result<()> {
    let config = load_config(options)?;
    match mode {
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            println!();
            println!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
            Ok(())
        }
        ExecutionMode::Query(query) => run_query(config, query).await,
        ExecutionMode::TestConnection => run_test_connection(config).await,
        ExecutionMode::Stats { json } => show_stats(config, json).await,
        ExecutionMode::ResetStats => {
            let context = MetaTeamContext::offline(config).await?;
            context.tracker().reset_stats().await?;
            println!("Usage statistics reset");
            Ok(())
        }
        ExecutionMode::Backup { file } => {
            let context = MetaTeamContext::offline(config).await?;
            match context.versioning().create_backup(&file)? {
                Some(record) => println!(
                    "Backed up {} -> {} ({})",
                    file.display(),
                    record.backup_path.display(),
                    format_bytes(record.size)
                ),
                None => println!("Skipped {}: missing, excluded, or versioning disabled", file.display()),
            }
            Ok(())
        }
        ExecutionMode::Version(version) => create_version(config, version).await,
        ExecutionMode::Rollback { file, version } => {
            let context = MetaTeamContext::offline(config).await?;
            let result = context.versioning().rollback(&file, version.as_deref())?;
            println!("Rolled back {} to {}", file.display(), result.rolled_back_to);
            if let Some(snapshot) = result.pre_rollback_backup {
                println!("Previous content saved to {}", snapshot.backup_path.display());
            }
            Ok(())
        }
        ExecutionMode::History { file, json } => show_history(config, &file, json).await,
        ExecutionMode::Cleanup => {
            let context = MetaTeamContext::offline(config).await?;
            let report = context.versioning().cleanup_old_files()?;
            println!(
                "Removed {} expired backups and {} surplus versions",
                report.cleaned_backups, report.cleaned_versions
            );
            Ok(())
        }
    }
}

async fn run_query(config: SystemConfig, query: QueryConfig) -> Result<()> {
    let context = MetaTeamContext::new(config).await?;
    if let Some(session) = &query.session {
        context
            .tracker()
            .start_session(session, "Started from the command line")
            .await?;
    }

    let attachments = query
        .attachments
        .iter()
        .map(|path| {
            Attachment::from_file(path)
                .with_context(|| format!("Failed to read attachment {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut request = context.request(query.prompt.as_str())?.with_attachments(attachments);
    if let Some(model) = query.model {
        request = request.with_model(model);
    }
    if let Some(max_tokens) = query.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    let outcome = tokio::select! {
        result = context.query_with_recovery(&request, "cli-query") => result,
        _ = tokio::signal::ctrl_c() => {
            context.shutdown().await?;
            bail!("Interrupted");
        }
    };

    // Persist accounting before reporting either outcome
    context.shutdown().await?;
    let response = outcome?;

    println!("{}", response.text);
    info!(
        "{} tokens ({} in, {} out) from {} in {}ms",
        response.usage.total(),
        response.usage.input_tokens,
        response.usage.output_tokens,
        response.model,
        response.latency.as_millis()
    );
    Ok(())
}

async fn run_test_connection(config: SystemConfig) -> Result<()> {
    let context = MetaTeamContext::offline(config).await?;
    let client = ClaudeApiClient::new(context.config().client.clone(), context.tracker().clone())?;

    let report = client.test_connection().await;
    context.shutdown().await?;

    println!("{}", report.message);
    if let Some(preview) = &report.preview {
        println!("Response: {}", preview);
    }
    match report.error {
        Some(error) if !report.success => bail!("{}", error),
        _ => Ok(()),
    }
}

async fn show_stats(config: SystemConfig, json: bool) -> Result<()> {
    let context = MetaTeamContext::offline(config).await?;
    let retrospective = context.tracker().retrospective().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&retrospective)?);
        return Ok(());
    }

    let overall = &retrospective.overall;
    println!("Usage statistics:");
    println!("  Total calls:      {}", overall.total_calls);
    println!("  Successful calls: {}", overall.successful_calls);
    println!("  Failed calls:     {}", overall.failed_calls);
    println!("  Claude Code:      {}%", overall.claude_code_percentage);
    println!("  Fallback:         {}%", overall.fallback_percentage);
    println!("  Tokens used:      {}", overall.total_tokens_used);
    println!("  Time spent:       {}", overall.total_time_spent);
    println!();
    println!("Sessions: {}", retrospective.total_sessions);
    for session in &retrospective.recent_sessions {
        println!(
            "  {} - {} calls ({}% Claude Code) in {}",
            session.name,
            session.total_calls,
            session.claude_code_percentage,
            format_duration(session.duration_ms.unwrap_or(0))
        );
    }

    let trends = &retrospective.trends;
    match trends.trend {
        Trend::InsufficientData => println!("Trend: not enough sessions yet"),
        trend => println!(
            "Trend: {:?} ({:.1} points, recent {:.1}% vs older {:.1}%)",
            trend, trends.change, trends.recent_average, trends.older_average
        ),
    }
    Ok(())
}

async fn create_version(config: SystemConfig, version: VersionConfig) -> Result<()> {
    let context = MetaTeamContext::offline(config).await?;
    let metadata = VersionMetadata {
        team: version.team,
        action: version.action,
        description: version.description,
        ..Default::default()
    };
    let record = context
        .versioning()
        .create_version(&version.file, &version.version, metadata)?;
    println!(
        "Created version {} of {} at {}",
        record.version,
        version.file.display(),
        record.version_path.display()
    );
    Ok(())
}

async fn show_history(config: SystemConfig, file: &Path, json: bool) -> Result<()> {
    let context = MetaTeamContext::offline(config).await?;
    let history = context.versioning().history(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    println!("History for {}:", history.file.display());
    println!("  Versions:");
    for version in &history.versions {
        println!(
            "    {} - {} by {} ({}), {}",
            version.version,
            version.timestamp.to_rfc3339(),
            version.metadata.team,
            version.metadata.action,
            format_bytes(version.size)
        );
    }
    println!("  Backups:");
    for backup in &history.backups {
        println!(
            "    {} - {}",
            backup.timestamp.to_rfc3339(),
            format_bytes(backup.size)
        );
    }
    Ok(())
}
