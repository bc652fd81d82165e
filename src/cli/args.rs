//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `query`: Send a prompt (with optional file attachments) and print the answer
//! - `test-connection`: Probe the API with a short prompt
//! - `stats` / `reset-stats`: Usage accounting
//! - `backup` / `version` / `rollback` / `history` / `cleanup`: File versioning
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, PartialEq)]
pub enum ExecutionMode {
    Query(QueryConfig),
    TestConnection,
    Stats { json: bool },
    ResetStats,
    Backup { file: PathBuf },
    Version(VersionConfig),
    Rollback { file: PathBuf, version: Option<String> },
    History { file: PathBuf, json: bool },
    Cleanup,
    ShowConfig,
}

#[derive(Debug, PartialEq)]
pub struct QueryConfig {
    pub prompt: String,
    pub attachments: Vec<PathBuf>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub session: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct VersionConfig {
    pub file: PathBuf,
    pub version: String,
    pub team: String,
    pub action: String,
    pub description: String,
}

/// Options shared by every subcommand
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub data_root: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "metateam")]
#[command(author = "Meta Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Anthropic API client with retries, usage accounting and file versioning")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path (skips discovery)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Directory holding stats/, logs/ and backups/
    #[arg(short = 'd', long = "data-root", global = true)]
    pub data_root: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a prompt and print the response
    Query {
        /// Prompt text
        prompt: String,
        /// Text file to attach (can be used multiple times)
        #[arg(short = 'f', long = "file", value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Model override
        #[arg(short = 'm', long = "model")]
        model: Option<String>,
        /// Max-token budget override
        #[arg(long = "max-tokens")]
        max_tokens: Option<u32>,
        /// Record the call under a named usage session
        #[arg(short = 's', long = "session")]
        session: Option<String>,
    },
    /// Check that the API answers
    TestConnection,
    /// Show usage statistics and trends
    Stats {
        /// Print as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Zero all usage statistics
    ResetStats,
    /// Back up a file
    Backup {
        file: PathBuf,
    },
    /// Store a labelled version of a file
    Version {
        file: PathBuf,
        /// Version label
        version: String,
        #[arg(long = "team", default_value = "unknown")]
        team: String,
        #[arg(long = "action", default_value = "version")]
        action: String,
        #[arg(long = "description", default_value = "")]
        description: String,
    },
    /// Restore a file to a version (latest when omitted)
    Rollback {
        file: PathBuf,
        version: Option<String>,
    },
    /// List versions and backups of a file
    History {
        file: PathBuf,
        /// Print as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Remove expired backups and surplus versions
    Cleanup,
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            config: self.config.clone(),
            data_root: self.data_root.clone(),
        }
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Query {
                prompt,
                files,
                model,
                max_tokens,
                session,
            }) => {
                if prompt.trim().is_empty() {
                    return Err("Prompt must not be empty".to_string());
                }
                Ok(ExecutionMode::Query(QueryConfig {
                    prompt: prompt.clone(),
                    attachments: files.clone(),
                    model: model.clone(),
                    max_tokens: *max_tokens,
                    session: session.clone(),
                }))
            }
            Some(Commands::TestConnection) => Ok(ExecutionMode::TestConnection),
            Some(Commands::Stats { json }) => Ok(ExecutionMode::Stats { json: *json }),
            Some(Commands::ResetStats) => Ok(ExecutionMode::ResetStats),
            Some(Commands::Backup { file }) => Ok(ExecutionMode::Backup { file: file.clone() }),
            Some(Commands::Version {
                file,
                version,
                team,
                action,
                description,
            }) => Ok(ExecutionMode::Version(VersionConfig {
                file: file.clone(),
                version: version.clone(),
                team: team.clone(),
                action: action.clone(),
                description: description.clone(),
            })),
            Some(Commands::Rollback { file, version }) => Ok(ExecutionMode::Rollback {
                file: file.clone(),
                version: version.clone(),
            }),
            Some(Commands::History { file, json }) => Ok(ExecutionMode::History {
                file: file.clone(),
                json: *json,
            }),
            Some(Commands::Cleanup) => Ok(ExecutionMode::Cleanup),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'metateam --help' to see available commands.".to_string(),
            ),
        }
    }
}
