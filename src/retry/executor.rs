use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Minimum wait requested by the remote side
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Marker produced when a cancellable execution is aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_backoff: bool,
    pub jitter: bool,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            exponential_backoff: true,
            jitter: true,
            jitter_factor: 0.1,
        }
    }
}

/// Preset policies for the kinds of work the scripts retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    ClaudeCode,
    Api,
    File,
}

impl RetryPolicy {
    pub fn for_service(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::ClaudeCode => Self {
                max_retries: 3,
                base_delay: Duration::from_millis(2000),
                max_delay: Duration::from_millis(30000),
                ..Default::default()
            },
            ServiceKind::Api => Self {
                max_retries: 5,
                base_delay: Duration::from_millis(1000),
                max_delay: Duration::from_millis(60000),
                ..Default::default()
            },
            ServiceKind::File => Self {
                max_retries: 2,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_millis(5000),
                ..Default::default()
            },
        }
    }

    /// Exponential backoff without jitter
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter: false,
            ..Default::default()
        }
    }

    /// Same delay before every retry
    pub fn fixed_delay(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay.max(Duration::from_millis(30000)),
            exponential_backoff: false,
            jitter: false,
            jitter_factor: 0.0,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay_ms = self.base_delay.as_millis() as f64;

        if self.exponential_backoff {
            let exponent = attempt.saturating_sub(1).min(31) as i32;
            delay_ms *= 2f64.powi(exponent);
        }

        if self.jitter && self.jitter_factor > 0.0 {
            let spread = delay_ms * self.jitter_factor;
            delay_ms += (rand::random::<f64>() - 0.5) * 2.0 * spread;
        }

        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(delay_ms.clamp(0.0, max_ms).round() as u64)
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;
type RetryCallback<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;
type ExhaustedCallback<E> = Arc<dyn Fn(&E, u32) + Send + Sync>;

/// Runs an async operation until it succeeds, the predicate refuses, or
/// `max_retries + 1` invocations have been made.
pub struct RetryExecutor<E> {
    policy: RetryPolicy,
    predicate: RetryPredicate<E>,
    on_retry: Option<RetryCallback<E>>,
    on_exhausted: Option<ExhaustedCallback<E>>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            predicate: self.predicate.clone(),
            on_retry: self.on_retry.clone(),
            on_exhausted: self.on_exhausted.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("on_retry", &self.on_retry.is_some())
            .field("on_exhausted", &self.on_exhausted.is_some())
            .finish()
    }
}

impl<E> RetryExecutor<E>
where
    E: Retryable + Display + Send + Sync + 'static,
{
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            predicate: Arc::new(|error: &E, _attempt| error.is_retryable()),
            on_retry: None,
            on_exhausted: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Replace the default `Retryable`-based predicate
    pub fn with_predicate(mut self, predicate: impl Fn(&E, u32) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn on_retry(mut self, callback: impl Fn(&E, u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn on_exhausted(mut self, callback: impl Fn(&E, u32) + Send + Sync + 'static) -> Self {
        self.on_exhausted = Some(Arc::new(callback));
        self
    }

    /// Delay for `attempt`, stretched to honour any server hint
    pub fn delay_for(&self, error: &E, attempt: u32) -> Duration {
        let computed = self.policy.delay_for_attempt(attempt);
        match error.retry_after() {
            Some(hint) => computed.max(hint).min(self.policy.max_delay),
            None => computed,
        }
    }

    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(op, None).await
    }

    /// Like [`execute`](Self::execute), but stops as soon as `token` is cancelled,
    /// including mid-attempt and mid-backoff.
    pub async fn execute_cancellable<T, F, Fut>(&self, token: &CancellationToken, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Cancelled>,
    {
        self.run(op, Some((token, &|| E::from(Cancelled)))).await
    }

    async fn run<T, F, Fut>(
        &self,
        mut op: F,
        cancel: Option<(&CancellationToken, &(dyn Fn() -> E + Send + Sync))>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 1;

        loop {
            let result = match cancel {
                Some((token, cancelled)) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(cancelled()),
                        result = op() => result,
                    }
                }
                None => op().await,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt > self.policy.max_retries || !(self.predicate)(&error, attempt) {
                match &self.on_exhausted {
                    Some(callback) => callback(&error, attempt),
                    None => error!(
                        "Giving up after {} attempt(s). Final error: {}",
                        attempt, error
                    ),
                }
                return Err(error);
            }

            let delay = self.delay_for(&error, attempt);
            match &self.on_retry {
                Some(callback) => callback(&error, attempt, delay),
                None => warn!(
                    "Retry attempt {} in {}ms due to: {}",
                    attempt,
                    delay.as_millis(),
                    error
                ),
            }

            match cancel {
                Some((token, cancelled)) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}
