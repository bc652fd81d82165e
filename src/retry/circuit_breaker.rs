use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Returned instead of invoking the wrapped operation while the circuit is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_failures: u64,
    total_rejections: u64,
    opened_at: Option<Instant>,
    probe_started_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            opened_at: None,
            probe_started_at: None,
            last_failure: None,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.probe_started_at = None;
        self.consecutive_successes = 0;
    }
}

/// Stops calls to a failing dependency for a cooldown window.
///
/// Closed → Open after `failure_threshold` consecutive failures. Open rejects
/// everything until `open_timeout` elapses, then admits a single probe
/// (HalfOpen). A probe failure reopens; `success_threshold` consecutive probe
/// successes close the circuit.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to make one call
    pub async fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.open_timeout {
                    info!("Circuit breaker moved to HALF_OPEN state");
                    state.state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    state.probe_started_at = Some(Instant::now());
                    Ok(())
                } else {
                    state.total_rejections += 1;
                    Err(CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                // A probe abandoned mid-flight must not wedge the breaker
                let probe_stale = state
                    .probe_started_at
                    .is_some_and(|t| t.elapsed() >= self.config.open_timeout);
                if state.probe_started_at.is_none() || probe_stale {
                    state.probe_started_at = Some(Instant::now());
                    Ok(())
                } else {
                    state.total_rejections += 1;
                    Err(CircuitOpen)
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;

        match state.state {
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                state.probe_started_at = None;
                if state.consecutive_successes >= self.config.success_threshold {
                    info!("Circuit breaker moved to CLOSED state");
                    state.state = CircuitState::Closed;
                    state.consecutive_successes = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Closed => {
                state.consecutive_successes = state.consecutive_successes.saturating_add(1);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        state.total_failures += 1;
        state.last_failure = Some(Utc::now());

        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker moved to OPEN state after {} consecutive failures",
                        state.consecutive_failures
                    );
                    state.open();
                }
            }
            CircuitState::HalfOpen => {
                warn!("Probe failed, circuit breaker moved back to OPEN state");
                state.open();
            }
            CircuitState::Open => {
                debug!("Failure recorded while circuit already open");
            }
        }
    }

    /// Run `op` through the breaker. Rejected calls never invoke `op`.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        self.try_acquire().await?;

        let result = op().await;
        match &result {
            Ok(_) => self.record_success().await,
            Err(_) => self.record_failure().await,
        }
        result
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// True while calls would be rejected without probing
    pub async fn is_open(&self) -> bool {
        let state = self.state.lock().await;
        match state.state {
            CircuitState::Open => state
                .opened_at
                .is_some_and(|t| t.elapsed() < self.config.open_timeout),
            _ => false,
        }
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock().await;
        CircuitBreakerStats {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            total_failures: state.total_failures,
            total_rejections: state.total_rejections,
            last_failure: state.last_failure,
            failure_threshold: self.config.failure_threshold,
            open_timeout: self.config.open_timeout,
        }
    }

    pub async fn force_open(&self) {
        let mut state = self.state.lock().await;
        state.open();
    }

    pub async fn force_close(&self) {
        let mut state = self.state.lock().await;
        let (total_failures, total_rejections) = (state.total_failures, state.total_rejections);
        *state = BreakerState::closed();
        state.total_failures = total_failures;
        state.total_rejections = total_rejections;
    }
}
