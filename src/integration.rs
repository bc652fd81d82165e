//! # System Integration
//!
//! [`MetaTeamContext`] owns one instance of every component and hands out
//! shared references, replacing the process-wide singletons a script would use.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   MetaTeamContext                    │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────────────┐  │
//! │  │   Client   │ │  Circuit   │ │  Error handler   │  │
//! │  │ (sender)   │ │  breaker   │ │  + recovery      │  │
//! │  └────────────┘ └────────────┘ └──────────────────┘  │
//! │  ┌────────────────────────┐ ┌──────────────────────┐ │
//! │  │     Usage tracker      │ │   File versioning    │ │
//! │  └────────────────────────┘ └──────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use metateam_client::{MetaTeamContext, SystemConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = MetaTeamContext::new(SystemConfig::default()).await?;
//!     context.tracker().start_session("review", "Weekly review").await?;
//!
//!     let request = context.request("Summarize the open issues")?;
//!     let response = context.query_with_recovery(&request, "weekly-review").await?;
//!     println!("{}", response.text);
//!
//!     context.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::claude::{ApiError, ApiRequest, ApiResponse, ClaudeApiClient, MessageSender};
use crate::config::SystemConfig;
use crate::errors::{ErrorHandler, ErrorMetrics, RecoveryOutcome};
use crate::retry::{CircuitBreaker, CircuitBreakerStats, RetryExecutor};
use crate::usage::{UsageSession, UsageTracker};
use crate::versioning::{FileVersioning, VersioningStats};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared wiring of client, retry, error handling, accounting and versioning
pub struct MetaTeamContext {
    config: SystemConfig,
    tracker: Arc<UsageTracker>,
    breaker: Arc<CircuitBreaker>,
    errors: Arc<ErrorHandler>,
    versioning: Arc<FileVersioning>,
    sender: Option<Arc<dyn MessageSender>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub online: bool,
    pub circuit: CircuitBreakerStats,
    pub errors: ErrorMetrics,
    pub total_calls: u64,
    pub claude_code_percentage: f64,
    pub active_session: Option<String>,
    pub versioning: VersioningStats,
}

impl MetaTeamContext {
    /// Build every component, including the API client. Fails without a credential.
    pub async fn new(config: SystemConfig) -> Result<Self> {
        let mut context = Self::offline(config).await?;
        let client = ClaudeApiClient::new(context.config.client.clone(), context.tracker.clone())
            .context("Failed to initialize API client")?;
        context.sender = Some(Arc::new(client));
        Ok(context)
    }

    /// Build everything except the API client, for commands that never call the API
    pub async fn offline(config: SystemConfig) -> Result<Self> {
        let tracker = Arc::new(
            UsageTracker::load(config.usage.clone())
                .await
                .context("Failed to load usage statistics")?,
        );
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        let errors = Arc::new(ErrorHandler::new(config.errors.clone(), breaker.clone()));
        let versioning = Arc::new(
            FileVersioning::open(config.versioning.clone()).with_context(|| {
                format!(
                    "Failed to open backup directory {}",
                    config.versioning.backup_dir.display()
                )
            })?,
        );

        info!("Context initialized with data root {}", config.data_root.display());
        Ok(Self {
            config,
            tracker,
            breaker,
            errors,
            versioning,
            sender: None,
        })
    }

    /// Replace the transport, e.g. with a test double
    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    pub fn versioning(&self) -> &Arc<FileVersioning> {
        &self.versioning
    }

    pub fn sender(&self) -> Result<&Arc<dyn MessageSender>, ApiError> {
        self.sender.as_ref().ok_or(ApiError::MissingCredentials)
    }

    /// Request carrying the configured model and token budget
    pub fn request(&self, prompt: impl Into<String>) -> Result<ApiRequest, ApiError> {
        let request = ApiRequest::new(prompt, self.config.client.default_model.clone())
            .with_max_tokens(self.config.client.default_max_tokens);
        request.validate()?;
        Ok(request)
    }

    /// Send `request` through the retry executor and circuit breaker. When that
    /// still fails, the error is handled (logged, counted, maybe escalated) and
    /// the recovery strategy for its classification gets one go.
    pub async fn query_with_recovery(
        &self,
        request: &ApiRequest,
        context: &str,
    ) -> Result<ApiResponse, ApiError> {
        let sender = self.sender()?.clone();
        let breaker = self.breaker.clone();

        let attempt = RetryExecutor::new(self.config.retry.clone())
            .execute(|| {
                let sender = sender.clone();
                let breaker = breaker.clone();
                async move { breaker.call(|| async { sender.send(request).await }).await }
            })
            .await;

        let error = match attempt {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        let handled = self.errors.handle_error(&error, context).await;
        let outcome = self
            .errors
            .recover(&error, request, sender.as_ref(), context)
            .await;

        match &outcome {
            RecoveryOutcome::Recovered { strategy, .. } => {
                info!("Recovered from {} error via {:?}", handled.info.classification, strategy)
            }
            RecoveryOutcome::Failed { strategy, error } => warn!(
                "Recovery via {:?} failed for {} error: {}",
                strategy, handled.info.classification, error
            ),
            RecoveryOutcome::NotAttempted { classification } => {
                warn!("No recovery strategy for {} error", classification)
            }
        }

        outcome.into_result(error)
    }

    /// Query, and when the API cannot answer, produce the result locally with
    /// `fallback` and count it as a fallback call.
    pub async fn query_or_fallback<F>(&self, prompt: &str, activity: &str, fallback: F) -> Result<String>
    where
        F: FnOnce() -> String,
    {
        let request = self.request(prompt)?;
        match self.query_with_recovery(&request, activity).await {
            Ok(response) => Ok(response.text),
            Err(error) => {
                warn!("Falling back for '{}': {}", activity, error);
                self.tracker.record_fallback(activity, &error.to_string()).await;
                Ok(fallback())
            }
        }
    }

    pub async fn status(&self) -> SystemStatus {
        let usage = self.tracker.global_stats().await;
        SystemStatus {
            online: self.sender.is_some(),
            circuit: self.breaker.stats().await,
            errors: self.errors.metrics().await,
            total_calls: usage.total_calls,
            claude_code_percentage: usage.claude_code_percentage,
            active_session: self.tracker.current_session().await.map(|s| s.name),
            versioning: self.versioning.stats(),
        }
    }

    /// Close the active usage session, if any, and persist it
    pub async fn shutdown(&self) -> Result<Option<UsageSession>> {
        let closed = self
            .tracker
            .end_session()
            .await
            .context("Failed to persist usage session")?;
        info!("Context shut down");
        Ok(closed)
    }
}

impl std::fmt::Debug for MetaTeamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaTeamContext")
            .field("data_root", &self.config.data_root)
            .field("online", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}
