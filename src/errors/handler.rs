use crate::claude::ApiError;
use crate::errors::classifier::{Classification, ErrorInfo, Severity};
use crate::retry::{CircuitBreaker, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

const RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlerConfig {
    /// Occurrences of one classification inside the window before escalating
    pub escalation_threshold: u32,
    pub observation_window: Duration,
    pub max_log_entries: usize,
    pub retention: Duration,
    /// Tried in order when a model is unavailable or the server fails
    pub fallback_models: Vec<String>,
    /// Wait used for rate limits that carry no `retry-after` hint
    pub rate_limit_delay: Duration,
    /// Upper bound of the random extra wait, as a fraction of the delay
    pub rate_limit_jitter: f64,
    /// Token budget used when a response stream breaks
    pub reduced_max_tokens: u32,
    pub network_retry: RetryPolicy,
    /// NDJSON error log; `None` disables file logging
    pub log_file: Option<PathBuf>,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 5,
            observation_window: Duration::from_secs(60 * 60),
            max_log_entries: 1000,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            fallback_models: vec![
                "claude-3-5-sonnet-20241022".to_string(),
                "claude-3-5-haiku-20241022".to_string(),
                "claude-3-opus-20240229".to_string(),
            ],
            rate_limit_delay: Duration::from_secs(5),
            rate_limit_jitter: 0.2,
            reduced_max_tokens: 2000,
            network_retry: RetryPolicy::default(),
            log_file: Some(crate::env::error_log_file_path(Path::new("."))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationReason {
    Severity(Severity),
    Recurrence { count: u32 },
}

/// Where errors that need a human go
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn escalate(&self, info: &ErrorInfo, reason: EscalationReason);
}

/// Reports escalations through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEscalationSink;

#[async_trait]
impl EscalationSink for TracingEscalationSink {
    async fn escalate(&self, info: &ErrorInfo, reason: EscalationReason) {
        error!(
            "Escalating {} {} error ({:?}): {} (context: {})",
            info.severity, info.classification, reason, info.message, info.context
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HandledError {
    pub info: ErrorInfo,
    pub escalated: Option<EscalationReason>,
    /// Occurrences of this classification inside the observation window
    pub recent_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    pub counts: HashMap<Classification, u64>,
    pub recent: Vec<ErrorInfo>,
}

/// Classifies, logs, counts and escalates failures, and dispatches recovery.
pub struct ErrorHandler {
    pub(crate) config: ErrorHandlerConfig,
    pub(crate) breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn EscalationSink>,
    window: DashMap<Classification, VecDeque<DateTime<Utc>>>,
    totals: DashMap<Classification, u64>,
    total_errors: AtomicU64,
    log: Mutex<VecDeque<ErrorInfo>>,
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("config", &self.config)
            .field("total_errors", &self.total_errors.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlerConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            config,
            breaker,
            sink: Arc::new(TracingEscalationSink),
            window: DashMap::new(),
            totals: DashMap::new(),
            total_errors: AtomicU64::new(0),
            log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EscalationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ErrorHandlerConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn handle_error(&self, error: &ApiError, context: &str) -> HandledError {
        self.handle_info(ErrorInfo::from_api_error(error, context)).await
    }

    /// Handle an error that did not come from the HTTP layer
    pub async fn handle_foreign(&self, error: &anyhow::Error, context: &str) -> HandledError {
        self.handle_info(ErrorInfo::from_error(error, context)).await
    }

    pub async fn handle_info(&self, info: ErrorInfo) -> HandledError {
        warn!(
            "[{}] {} {}: {} (Context: {})",
            info.timestamp.to_rfc3339(),
            info.severity,
            info.classification,
            info.message,
            info.context
        );

        self.append_log_file(&info).await;
        let recent_count = self.count_in_window(&info);
        self.append_in_memory(info.clone()).await;

        let escalated = if info.severity >= Severity::High {
            Some(EscalationReason::Severity(info.severity))
        } else if recent_count > self.config.escalation_threshold {
            Some(EscalationReason::Recurrence {
                count: recent_count,
            })
        } else {
            None
        };

        if let Some(reason) = escalated {
            self.sink.escalate(&info, reason).await;
        }

        HandledError {
            info,
            escalated,
            recent_count,
        }
    }

    fn count_in_window(&self, info: &ErrorInfo) -> u32 {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        *self.totals.entry(info.classification).or_insert(0) += 1;

        let cutoff = window_start(info.timestamp, self.config.observation_window);
        let mut occurrences = self.window.entry(info.classification).or_default();
        occurrences.push_back(info.timestamp);
        while occurrences.front().is_some_and(|t| *t < cutoff) {
            occurrences.pop_front();
        }
        occurrences.len() as u32
    }

    async fn append_in_memory(&self, info: ErrorInfo) {
        let cutoff = window_start(info.timestamp, self.config.retention);
        let mut log = self.log.lock().await;
        log.push_back(info);
        while log.len() > self.config.max_log_entries
            || log.front().is_some_and(|e| e.timestamp < cutoff)
        {
            log.pop_front();
        }
    }

    async fn append_log_file(&self, info: &ErrorInfo) {
        let Some(path) = &self.config.log_file else {
            return;
        };

        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut line = serde_json::to_string(info).map_err(std::io::Error::other)?;
            line.push('\n');
            let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
            file.write_all(line.as_bytes()).await
        }
        .await;

        if let Err(e) = result {
            debug!("Could not append to error log {}: {}", path.display(), e);
        }
    }

    pub async fn metrics(&self) -> ErrorMetrics {
        let log = self.log.lock().await;
        let skip = log.len().saturating_sub(RECENT_ERRORS);
        ErrorMetrics {
            total_errors: self.total_errors.load(Ordering::Relaxed),
            counts: self
                .totals
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            recent: log.iter().skip(skip).cloned().collect(),
        }
    }

    /// Entries currently held in the in-memory log
    pub async fn log_entries(&self) -> Vec<ErrorInfo> {
        self.log.lock().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        self.log.lock().await.clear();
        self.window.clear();
        self.totals.clear();
        self.total_errors.store(0, Ordering::Relaxed);
    }
}

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
