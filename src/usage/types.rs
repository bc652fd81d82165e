use crate::env;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Persisted statistics; `None` keeps everything in memory
    pub stats_file: Option<PathBuf>,
    /// NDJSON activity log; `None` disables it
    pub activity_log: Option<PathBuf>,
    pub max_activities_per_session: usize,
    /// Closed sessions older than this are dropped on save; 0 keeps everything
    pub history_retention_days: u32,
    pub preview_chars: usize,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self::with_data_root(Path::new("."))
    }
}

impl UsageConfig {
    pub fn with_data_root(data_root: &Path) -> Self {
        Self {
            stats_file: Some(env::usage_stats_file_path(data_root)),
            activity_log: Some(env::usage_log_file_path(data_root)),
            max_activities_per_session: 500,
            history_retention_days: 90,
            preview_chars: 100,
        }
    }

    /// No files are read or written
    pub fn in_memory() -> Self {
        Self {
            stats_file: None,
            activity_log: None,
            ..Self::with_data_root(Path::new("."))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    #[serde(rename = "claude-code")]
    ClaudeCode,
    #[serde(rename = "claude-code-failed")]
    ClaudeCodeFailed,
    #[serde(rename = "fallback")]
    Fallback,
}

impl ActivityKind {
    /// Action name written to the activity log
    pub fn action(&self) -> &'static str {
        match self {
            ActivityKind::ClaudeCode => "CLAUDE_CODE_CALL",
            ActivityKind::ClaudeCodeFailed => "CLAUDE_CODE_FAILED",
            ActivityKind::Fallback => "FALLBACK_CALL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub duration_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSession {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub claude_code_calls: u64,
    #[serde(default)]
    pub fallback_calls: u64,
    #[serde(default)]
    pub total_calls: u64,
    #[serde(default)]
    pub successful_calls: u64,
    #[serde(default)]
    pub failed_calls: u64,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub time_spent_ms: u64,
    #[serde(default)]
    pub claude_code_percentage: f64,
    #[serde(default)]
    pub fallback_percentage: f64,
    #[serde(default)]
    pub activities: Vec<ActivityRecord>,
}

impl UsageSession {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            claude_code_calls: 0,
            fallback_calls: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            tokens_used: 0,
            time_spent_ms: 0,
            claude_code_percentage: 0.0,
            fallback_percentage: 0.0,
            activities: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Lifetime counters plus the closed-session history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_tokens_used: u64,
    pub total_time_spent_ms: u64,
    pub claude_code_percentage: f64,
    pub fallback_percentage: f64,
    pub sessions: Vec<UsageSession>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub trend: Trend,
    /// Absolute difference of the two averages, in percentage points
    pub change: f64,
    pub recent_average: f64,
    pub older_average: f64,
}

impl TrendAnalysis {
    pub fn insufficient() -> Self {
        Self {
            trend: Trend::InsufficientData,
            change: 0.0,
            recent_average: 0.0,
            older_average: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallUsage {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub claude_code_percentage: f64,
    pub fallback_percentage: f64,
    pub total_tokens_used: u64,
    pub total_time_spent: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Retrospective {
    pub overall: OverallUsage,
    pub total_sessions: usize,
    pub recent_sessions: Vec<UsageSession>,
    /// Mean Claude Code calls per session
    pub average_claude_code_calls: f64,
    pub average_fallback_calls: f64,
    pub trends: TrendAnalysis,
}

/// One line of the activity log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub session: String,
    pub data: ActivityRecord,
}
