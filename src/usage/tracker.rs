//! Usage and session accounting
//!
//! Counts every API call (successful, failed, or replaced by a fallback) into
//! the active session and into lifetime totals. Closed sessions are appended
//! to the persisted history, which feeds trend analysis and retrospectives.

use crate::claude::interface::preview;
use crate::usage::store::UsageStore;
use crate::usage::types::*;
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const AUTO_SESSION_NAME: &str = "Auto Session";
const AUTO_SESSION_DESCRIPTION: &str = "Automatically started session";
const TREND_WINDOW: usize = 5;
const RETROSPECTIVE_SESSIONS: usize = 10;

#[derive(Debug)]
pub struct UsageTracker {
    config: UsageConfig,
    store: UsageStore,
    state: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    stats: UsageStats,
    current: Option<UsageSession>,
}

impl UsageTracker {
    /// Start with empty statistics, ignoring anything already on disk
    pub fn new(config: UsageConfig) -> Self {
        let store = UsageStore::new(config.stats_file.clone(), config.activity_log.clone());
        Self {
            config,
            store,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Tracker that never touches the filesystem
    pub fn in_memory() -> Self {
        Self::new(UsageConfig::in_memory())
    }

    /// Start from the persisted statistics, if any. Unreadable files are
    /// reported and replaced by empty statistics on the next save.
    pub async fn load(config: UsageConfig) -> Result<Self> {
        let tracker = Self::new(config);
        match tracker.store.load().await {
            Ok(Some(stats)) => {
                info!(
                    "Loaded usage stats: {} calls across {} sessions",
                    stats.total_calls,
                    stats.sessions.len()
                );
                tracker.state.lock().await.stats = stats;
            }
            Ok(None) => debug!("No persisted usage stats found"),
            Err(e) => warn!("Could not load usage stats: {:#}", e),
        }
        Ok(tracker)
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    /// Open a session. An already active session is closed and persisted first.
    pub async fn start_session(&self, name: &str, description: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(active) = state.current.take() {
            warn!(
                "Session '{}' still active; closing it before starting '{}'",
                active.name, name
            );
            self.close(&mut state, active);
            self.store.save(&state.stats).await?;
        }

        state.current = Some(UsageSession::new(name, description));
        info!("Usage session started: {} ({})", name, description);
        Ok(())
    }

    pub async fn record_success(&self, prompt: &str, response: &str, tokens: u64, duration: Duration) {
        let record = ActivityRecord {
            kind: ActivityKind::ClaudeCode,
            timestamp: Utc::now(),
            prompt: Some(preview(prompt, self.config.preview_chars)),
            response: Some(preview(response, self.config.preview_chars)),
            error: None,
            activity: None,
            reason: None,
            tokens_used: tokens,
            duration_ms: duration.as_millis() as u64,
            success: true,
        };
        self.record(record).await;
    }

    pub async fn record_failure(&self, prompt: &str, error: &str, duration: Duration) {
        let record = ActivityRecord {
            kind: ActivityKind::ClaudeCodeFailed,
            timestamp: Utc::now(),
            prompt: Some(preview(prompt, self.config.preview_chars)),
            response: None,
            error: Some(error.to_string()),
            activity: None,
            reason: None,
            tokens_used: 0,
            duration_ms: duration.as_millis() as u64,
            success: false,
        };
        self.record(record).await;
    }

    /// Count work that was done without the API
    pub async fn record_fallback(&self, activity: &str, reason: &str) {
        let record = ActivityRecord {
            kind: ActivityKind::Fallback,
            timestamp: Utc::now(),
            prompt: None,
            response: None,
            error: None,
            activity: Some(activity.to_string()),
            reason: Some(reason.to_string()),
            tokens_used: 0,
            duration_ms: 0,
            success: false,
        };
        self.record(record).await;
    }

    async fn record(&self, record: ActivityRecord) {
        let entry = {
            let mut state = self.state.lock().await;
            let TrackerState { stats, current } = &mut *state;

            let session = current.get_or_insert_with(|| {
                info!("Usage session started: {}", AUTO_SESSION_NAME);
                UsageSession::new(AUTO_SESSION_NAME, AUTO_SESSION_DESCRIPTION)
            });

            session.total_calls += 1;
            stats.total_calls += 1;
            match record.kind {
                ActivityKind::ClaudeCode => {
                    session.claude_code_calls += 1;
                    session.successful_calls += 1;
                    session.tokens_used += record.tokens_used;
                    session.time_spent_ms += record.duration_ms;
                    stats.successful_calls += 1;
                    stats.total_tokens_used += record.tokens_used;
                    stats.total_time_spent_ms += record.duration_ms;
                }
                ActivityKind::ClaudeCodeFailed => {
                    session.claude_code_calls += 1;
                    session.failed_calls += 1;
                    session.time_spent_ms += record.duration_ms;
                    stats.failed_calls += 1;
                    stats.total_time_spent_ms += record.duration_ms;
                }
                ActivityKind::Fallback => {
                    session.fallback_calls += 1;
                    session.failed_calls += 1;
                    stats.failed_calls += 1;
                }
            }

            session.activities.push(record.clone());
            let overflow = session
                .activities
                .len()
                .saturating_sub(self.config.max_activities_per_session);
            session.activities.drain(..overflow);

            update_global_percentages(stats);

            debug!(
                "Current session '{}': {} Claude Code calls, {} fallback calls, {} total, {} tokens, {}",
                session.name,
                session.claude_code_calls,
                session.fallback_calls,
                session.total_calls,
                session.tokens_used,
                format_duration(session.time_spent_ms)
            );

            ActivityLogEntry {
                timestamp: record.timestamp,
                action: record.kind.action().to_string(),
                session: session.name.clone(),
                data: record,
            }
        };

        if let Err(e) = self.store.append_activity(&entry).await {
            debug!("Could not append usage activity: {:#}", e);
        }
    }

    /// Close the active session and persist it. `Ok(None)` when none is active.
    pub async fn end_session(&self) -> Result<Option<UsageSession>> {
        let mut state = self.state.lock().await;

        let Some(active) = state.current.take() else {
            info!("No active session to end");
            return Ok(None);
        };

        let closed = self.close(&mut state, active);
        info!(
            "Usage session '{}' ended after {}: {} Claude Code calls ({}%), {} fallback calls ({}%), {} tokens",
            closed.name,
            format_duration(closed.duration_ms.unwrap_or(0)),
            closed.claude_code_calls,
            closed.claude_code_percentage,
            closed.fallback_calls,
            closed.fallback_percentage,
            closed.tokens_used
        );

        self.store.save(&state.stats).await?;
        Ok(Some(closed))
    }

    fn close(&self, state: &mut TrackerState, mut session: UsageSession) -> UsageSession {
        let now = Utc::now();
        session.end_time = Some(now);
        session.duration_ms = Some((now - session.start_time).num_milliseconds().max(0) as u64);
        session.claude_code_percentage = percentage(session.claude_code_calls, session.total_calls);
        session.fallback_percentage = percentage(session.fallback_calls, session.total_calls);

        state.stats.sessions.push(session.clone());
        self.prune_history(&mut state.stats);
        update_global_percentages(&mut state.stats);
        session
    }

    fn prune_history(&self, stats: &mut UsageStats) {
        if self.config.history_retention_days == 0 {
            return;
        }
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.config.history_retention_days));
        let before = stats.sessions.len();
        stats
            .sessions
            .retain(|s| s.end_time.unwrap_or(s.start_time) >= cutoff);
        let pruned = before - stats.sessions.len();
        if pruned > 0 {
            debug!("Pruned {} usage sessions older than {} days", pruned, self.config.history_retention_days);
        }
    }

    pub async fn current_session(&self) -> Option<UsageSession> {
        self.state.lock().await.current.clone()
    }

    pub async fn global_stats(&self) -> UsageStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn analyze_trends(&self) -> TrendAnalysis {
        analyze_sessions(&self.state.lock().await.stats.sessions)
    }

    pub async fn retrospective(&self) -> Retrospective {
        let state = self.state.lock().await;
        let stats = &state.stats;
        let total_sessions = stats.sessions.len();

        let (claude_code_calls, fallback_calls) = stats
            .sessions
            .iter()
            .fold((0u64, 0u64), |(cc, fb), s| (cc + s.claude_code_calls, fb + s.fallback_calls));
        let average = |calls: u64| {
            if total_sessions > 0 {
                round_to(calls as f64 / total_sessions as f64, 1)
            } else {
                0.0
            }
        };

        Retrospective {
            overall: OverallUsage {
                total_calls: stats.total_calls,
                successful_calls: stats.successful_calls,
                failed_calls: stats.failed_calls,
                claude_code_percentage: stats.claude_code_percentage,
                fallback_percentage: stats.fallback_percentage,
                total_tokens_used: stats.total_tokens_used,
                total_time_spent: format_duration(stats.total_time_spent_ms),
            },
            total_sessions,
            recent_sessions: stats.sessions[total_sessions.saturating_sub(RETROSPECTIVE_SESSIONS)..].to_vec(),
            average_claude_code_calls: average(claude_code_calls),
            average_fallback_calls: average(fallback_calls),
            trends: analyze_sessions(&stats.sessions),
        }
    }

    /// Zero every counter and drop the session history
    pub async fn reset_stats(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.stats = UsageStats::default();
        self.store.save(&state.stats).await?;
        info!("Usage stats reset");
        Ok(())
    }
}

/// Compare the last five sessions against the five before them
pub fn analyze_sessions(sessions: &[UsageSession]) -> TrendAnalysis {
    if sessions.len() < 2 {
        return TrendAnalysis::insufficient();
    }

    let len = sessions.len();
    let recent = &sessions[len.saturating_sub(TREND_WINDOW)..];
    let older = &sessions[len.saturating_sub(2 * TREND_WINDOW)..len.saturating_sub(TREND_WINDOW)];
    if older.is_empty() {
        return TrendAnalysis::insufficient();
    }

    let mean = |window: &[UsageSession]| {
        window.iter().map(|s| s.claude_code_percentage).sum::<f64>() / window.len() as f64
    };
    let recent_average = mean(recent);
    let older_average = mean(older);
    let difference = recent_average - older_average;

    let trend = if difference.abs() < 1e-9 {
        Trend::Stable
    } else if difference > 0.0 {
        Trend::Improving
    } else {
        Trend::Declining
    };

    TrendAnalysis {
        trend,
        change: round_to(difference.abs(), 1),
        recent_average: round_to(recent_average, 1),
        older_average: round_to(older_average, 1),
    }
}

/// Human-readable duration: `850ms`, `12.5s`, `3m 20s`
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60_000;
        let seconds = ((ms % 60_000) as f64 / 1000.0).round() as u64;
        format!("{}m {}s", minutes, seconds)
    }
}

fn update_global_percentages(stats: &mut UsageStats) {
    stats.claude_code_percentage = percentage(stats.successful_calls, stats.total_calls);
    stats.fallback_percentage = percentage(stats.failed_calls, stats.total_calls);
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round_to(part as f64 / total as f64 * 100.0, 2)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
