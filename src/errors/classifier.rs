use crate::claude::ApiError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Taxonomy bucket used to route an error to a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Authentication,
    Network,
    RateLimit,
    Streaming,
    Model,
    Validation,
    General,
}

impl Classification {
    pub const ALL: [Classification; 7] = [
        Classification::Authentication,
        Classification::Network,
        Classification::RateLimit,
        Classification::Streaming,
        Classification::Model,
        Classification::Validation,
        Classification::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Authentication => "AUTHENTICATION",
            Classification::Network => "NETWORK",
            Classification::RateLimit => "RATE_LIMIT",
            Classification::Streaming => "STREAMING",
            Classification::Model => "MODEL",
            Classification::Validation => "VALIDATION",
            Classification::General => "GENERAL",
        }
    }

    /// Severity when the message carries no stronger signal
    pub fn base_severity(&self) -> Severity {
        match self {
            Classification::Authentication | Classification::Network => Severity::High,
            Classification::RateLimit | Classification::Streaming | Classification::Model => {
                Severity::Medium
            }
            Classification::Validation | Classification::General => Severity::Low,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// One classified failure, as logged and counted by the error handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub classification: Classification,
    pub severity: Severity,
    pub message: String,
    /// Debug rendering of the source error, including any cause chain
    pub detail: String,
    pub status: Option<u16>,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    /// Classify an error raised by the HTTP layer from its variant
    pub fn from_api_error(error: &ApiError, context: impl Into<String>) -> Self {
        let message = error.to_string();
        let classification = classify_api_error(error);
        let severity = if mentions_fatal(&message) {
            Severity::Critical
        } else {
            classification.base_severity()
        };

        Self {
            classification,
            severity,
            message,
            detail: format!("{:?}", error),
            status: error.status(),
            context: context.into(),
            timestamp: Utc::now(),
        }
    }

    /// Classify an error from outside the HTTP layer by its message
    pub fn from_error(error: &anyhow::Error, context: impl Into<String>) -> Self {
        let message = format!("{:#}", error);
        let classification = classify_message(&message);

        Self {
            classification,
            severity: assess_severity(&message, classification),
            message,
            detail: format!("{:?}", error),
            status: None,
            context: context.into(),
            timestamp: Utc::now(),
        }
    }
}

pub fn classify_api_error(error: &ApiError) -> Classification {
    match error {
        ApiError::MissingCredentials | ApiError::AuthFailed { .. } => Classification::Authentication,
        ApiError::RateLimited { .. } => Classification::RateLimit,
        ApiError::ModelUnavailable { .. } => Classification::Model,
        ApiError::Streaming(_) | ApiError::Parse(_) => Classification::Streaming,
        ApiError::Network(_) | ApiError::Timeout(_) | ApiError::CircuitOpen => Classification::Network,
        ApiError::InvalidRequest(_) | ApiError::InvalidConfig(_) => Classification::Validation,
        // Server-side failures are routed to the fallback model list
        ApiError::Http { status, .. } if *status >= 500 => Classification::Model,
        ApiError::Http { status, .. } if *status == 400 || *status == 422 => Classification::Validation,
        ApiError::Http { .. } | ApiError::Cancelled => Classification::General,
    }
}

type Pattern = LazyLock<Option<Regex>>;

static AUTHENTICATION: Pattern = LazyLock::new(|| {
    Regex::new(r"(?i)authenticat|unauthori[sz]ed|\bauth\b|api[ _-]?key|\b401\b|\b403\b").ok()
});
static RATE_LIMIT: Pattern =
    LazyLock::new(|| Regex::new(r"(?i)rate[ _-]?limit|too many requests|\b429\b").ok());
static STREAMING: Pattern = LazyLock::new(|| Regex::new(r"(?i)stream").ok());
static MODEL: Pattern = LazyLock::new(|| Regex::new(r"(?i)\bmodel\b|overloaded").ok());
static NETWORK: Pattern = LazyLock::new(|| {
    Regex::new(
        r"(?i)network|connection (reset|refused|closed)|\bECONN[A-Z]+\b|\bETIMEDOUT\b|\bENOTFOUND\b|timed out|socket hang up",
    )
    .ok()
});
static VALIDATION: Pattern = LazyLock::new(|| Regex::new(r"(?i)validation|invalid").ok());
static FATAL: Pattern = LazyLock::new(|| Regex::new(r"(?i)critical|fatal").ok());

fn matches(pattern: &Pattern, message: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(message))
}

/// Keyword classification for errors that carry no structure
pub fn classify_message(message: &str) -> Classification {
    if matches(&AUTHENTICATION, message) {
        Classification::Authentication
    } else if matches(&RATE_LIMIT, message) {
        Classification::RateLimit
    } else if matches(&STREAMING, message) {
        Classification::Streaming
    } else if matches(&MODEL, message) {
        Classification::Model
    } else if matches(&NETWORK, message) {
        Classification::Network
    } else if matches(&VALIDATION, message) {
        Classification::Validation
    } else {
        Classification::General
    }
}

pub fn assess_severity(message: &str, classification: Classification) -> Severity {
    if mentions_fatal(message) {
        Severity::Critical
    } else {
        classification.base_severity()
    }
}

fn mentions_fatal(message: &str) -> bool {
    matches(&FATAL, message)
}
