//! # Meta Team Client
//!
//! An Anthropic Messages API client with the reliability and bookkeeping layers
//! the Meta Team scripts share: retries with exponential backoff, a circuit
//! breaker, error classification with recovery strategies, usage and session
//! accounting persisted as JSON, and a file backup/versioning utility.
//!
//! ## Architecture Overview
//!
//! - **[`claude`]**: HTTP client for the Messages endpoint with typed errors
//! - **[`retry`]**: Retry executor and circuit breaker
//! - **[`errors`]**: Error classification, escalation and recovery dispatch
//! - **[`usage`]**: Per-session and lifetime call accounting
//! - **[`versioning`]**: File backups, labelled versions and rollback
//! - **[`integration`]**: [`MetaTeamContext`] wiring all of the above together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metateam_client::{MetaTeamContext, SystemConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = MetaTeamContext::new(SystemConfig::default()).await?;
//!
//!     let request = context.request("List three risks in this rollout plan")?;
//!     let response = context.query_with_recovery(&request, "rollout-review").await?;
//!     println!("{}", response.text);
//!
//!     context.shutdown().await?;
//!     Ok(())
//! }
//! ```

/// Anthropic Messages API client.
///
/// Credential resolution, request/response wire types and the mapping of
/// HTTP failures onto [`claude::ApiError`].
pub mod claude;

/// Retry with backoff, and the circuit breaker guarding the endpoint.
pub mod retry;

/// Error classification, logging, escalation and recovery strategies.
pub mod errors;

/// Usage and session accounting persisted to `stats/`.
pub mod usage;

/// File backups, versions and rollback with integrity checks.
pub mod versioning;

/// Configuration file discovery and loading.
pub mod config;

/// High-level wiring of every component.
pub mod integration;

/// Environment constants and path utilities.
///
/// Centralizes all hardcoded paths and directory names used throughout
/// the application for easier maintenance and consistency.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use claude::{ApiError, ApiRequest, ApiResponse, ClaudeApiClient, ClientConfig, MessageSender};
pub use config::{ConfigDiscovery, ConfigError, SystemConfig};
pub use errors::{Classification, ErrorHandler, ErrorInfo, RecoveryOutcome, Severity};
pub use integration::{MetaTeamContext, SystemStatus};
pub use retry::{CircuitBreaker, RetryExecutor, RetryPolicy};
pub use usage::{UsageSession, UsageStats, UsageTracker};
pub use versioning::{FileVersioning, VersioningConfig, VersioningError};
