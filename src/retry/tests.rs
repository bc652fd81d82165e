use super::*;
use crate::claude::ApiError;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn server_error() -> ApiError {
    ApiError::Http {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_success_with_exponential_delays() {
    let policy = RetryPolicy::exponential(2, Duration::from_millis(100));
    let delays = Arc::new(StdMutex::new(Vec::new()));
    let recorded = delays.clone();
    let executor = RetryExecutor::<ApiError>::new(policy).on_retry(move |_, _, delay| {
        recorded.lock().unwrap().push(delay);
    });

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let started = tokio::time::Instant::now();

    let result = executor
        .execute(|| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(server_error()) } else { Ok("done") }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        *delays.lock().unwrap(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_errors_invoke_once() {
    let non_retryable = vec![
        ApiError::AuthFailed {
            status: 401,
            body: "invalid x-api-key".to_string(),
        },
        ApiError::Http {
            status: 400,
            body: "bad request".to_string(),
        },
        ApiError::InvalidRequest("prompt must not be empty".to_string()),
        ApiError::MissingCredentials,
    ];

    for error in non_retryable {
        let executor = RetryExecutor::<ApiError>::new(RetryPolicy::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), ApiError> = executor
            .execute(|| {
                let counter = counter.clone();
                let error = error.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(error)
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "retried {}", error);
    }
}

#[tokio::test(start_paused = true)]
async fn test_invocations_bounded_by_max_retries() {
    let exhausted = Arc::new(AtomicU32::new(0));
    let seen = exhausted.clone();
    let executor = RetryExecutor::<ApiError>::new(RetryPolicy::exponential(4, Duration::from_millis(10)))
        .on_exhausted(move |_, attempts| {
            seen.store(attempts, Ordering::SeqCst);
        });

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let result: Result<(), ApiError> = executor
        .execute(|| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Network("connection reset".to_string()))
            }
        })
        .await;

    assert!(matches!(result, Err(ApiError::Network(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(exhausted.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_invokes_once() {
    let executor = RetryExecutor::<ApiError>::new(RetryPolicy::exponential(0, Duration::from_millis(10)));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), ApiError> = executor
        .execute(|| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_delays_monotonic_and_capped_without_jitter() {
    let policy = RetryPolicy {
        max_retries: 10,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        jitter: false,
        ..Default::default()
    };

    let delays: Vec<Duration> = (1..=10).map(|a| policy.delay_for_attempt(a)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(delays[0], Duration::from_millis(100));
    assert_eq!(delays[3], Duration::from_millis(800));
    assert_eq!(*delays.last().unwrap(), Duration::from_millis(1000));

    // Huge attempt numbers must not overflow
    assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(1000));
}

#[test]
fn test_jitter_stays_within_factor() {
    let policy = RetryPolicy {
        base_delay: Duration::from_millis(1000),
        jitter_factor: 0.1,
        ..Default::default()
    };

    for _ in 0..100 {
        let delay = policy.delay_for_attempt(1).as_millis();
        assert!((899..=1100).contains(&delay), "delay {}ms out of range", delay);
    }
}

#[test]
fn test_fixed_delay_and_service_presets() {
    let fixed = RetryPolicy::fixed_delay(3, Duration::from_millis(250));
    assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(250));
    assert_eq!(fixed.delay_for_attempt(3), Duration::from_millis(250));

    let api = RetryPolicy::for_service(ServiceKind::Api);
    assert_eq!(api.max_retries, 5);
    assert_eq!(api.max_delay, Duration::from_secs(60));

    let file = RetryPolicy::for_service(ServiceKind::File);
    assert_eq!(file.max_retries, 2);
    assert_eq!(file.base_delay, Duration::from_millis(500));

    let claude_code = RetryPolicy::for_service(ServiceKind::ClaudeCode);
    assert_eq!(claude_code.base_delay, Duration::from_secs(2));
}

#[test]
fn test_retry_after_hint_raises_delay() {
    let executor = RetryExecutor::<ApiError>::new(RetryPolicy::exponential(3, Duration::from_millis(100)));
    let limited = ApiError::RateLimited {
        retry_after: Some(Duration::from_secs(7)),
        body: String::new(),
    };
    assert_eq!(executor.delay_for(&limited, 1), Duration::from_secs(7));

    // Still capped by max_delay
    let excessive = ApiError::RateLimited {
        retry_after: Some(Duration::from_secs(600)),
        body: String::new(),
    };
    assert_eq!(executor.delay_for(&excessive, 1), Duration::from_secs(30));
}

#[test]
fn test_default_predicate_classification() {
    use crate::retry::Retryable;

    assert!(server_error().is_retryable());
    assert!(
        ApiError::Http {
            status: 529,
            body: "overloaded".to_string()
        }
        .is_retryable()
    );
    assert!(ApiError::Timeout("deadline".to_string()).is_retryable());
    assert!(ApiError::Parse("eof".to_string()).is_retryable());
    assert!(
        ApiError::RateLimited {
            retry_after: None,
            body: String::new()
        }
        .is_retryable()
    );
    assert!(
        !ApiError::Http {
            status: 404,
            body: String::new()
        }
        .is_retryable()
    );
    assert!(!ApiError::CircuitOpen.is_retryable());
    assert!(!ApiError::Cancelled.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_custom_predicate_overrides_default() {
    let executor = RetryExecutor::<ApiError>::new(RetryPolicy::exponential(5, Duration::from_millis(10)))
        .with_predicate(|_, attempt| attempt < 2);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), ApiError> = executor
        .execute(|| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::InvalidRequest("refused".to_string()))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff() {
    let executor = RetryExecutor::<ApiError>::new(RetryPolicy::exponential(5, Duration::from_secs(10)));
    let token = CancellationToken::new();
    let calls = Arc::new(AtomicU32::new(0));

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let counter = calls.clone();
    let result: Result<(), ApiError> = executor
        .execute_cancellable(&token, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;

    assert!(matches!(result, Err(ApiError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_token_short_circuits() {
    let executor = RetryExecutor::<ApiError>::new(RetryPolicy::default());
    let token = CancellationToken::new();
    token.cancel();

    let result: Result<(), ApiError> = executor
        .execute_cancellable(&token, || async { Ok(()) })
        .await;
    assert!(matches!(result, Err(ApiError::Cancelled)));
}

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        open_timeout: Duration::from_secs(60),
    }
}

async fn fail(breaker: &CircuitBreaker) -> Result<(), ApiError> {
    breaker
        .call(|| async { Err::<(), ApiError>(server_error()) })
        .await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<(), ApiError> {
    breaker.call(|| async { Ok::<(), ApiError>(()) }).await
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_threshold() {
    let breaker = CircuitBreaker::new(breaker_config());

    for _ in 0..3 {
        assert!(matches!(fail(&breaker).await, Err(ApiError::Http { .. })));
    }
    assert_eq!(breaker.state().await, CircuitState::Open);
    assert!(breaker.is_open().await);

    // Rejected without invoking the operation
    let invoked = Arc::new(AtomicU32::new(0));
    let counter = invoked.clone();
    let result = breaker
        .call(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ApiError>(())
        })
        .await;
    assert!(matches!(result, Err(ApiError::CircuitOpen)));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    let stats = breaker.stats().await;
    assert_eq!(stats.total_failures, 3);
    assert_eq!(stats.total_rejections, 1);
    assert!(stats.last_failure.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_streak() {
    let breaker = CircuitBreaker::new(breaker_config());

    fail(&breaker).await.unwrap_err();
    fail(&breaker).await.unwrap_err();
    succeed(&breaker).await.unwrap();
    fail(&breaker).await.unwrap_err();
    fail(&breaker).await.unwrap_err();

    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_single_probe() {
    let breaker = CircuitBreaker::new(breaker_config());
    breaker.force_open().await;

    assert!(breaker.try_acquire().await.is_err());
    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(breaker.try_acquire().await.is_ok());
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    // Second caller while the probe is in flight
    assert_eq!(breaker.try_acquire().await, Err(CircuitOpen));

    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    assert!(breaker.try_acquire().await.is_ok());
    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let breaker = CircuitBreaker::new(breaker_config());
    for _ in 0..3 {
        fail(&breaker).await.unwrap_err();
    }

    tokio::time::advance(Duration::from_secs(60)).await;
    fail(&breaker).await.unwrap_err();

    assert_eq!(breaker.state().await, CircuitState::Open);
    assert!(matches!(succeed(&breaker).await, Err(ApiError::CircuitOpen)));
}

#[tokio::test(start_paused = true)]
async fn test_force_close_keeps_totals() {
    let breaker = CircuitBreaker::new(breaker_config());
    for _ in 0..3 {
        fail(&breaker).await.unwrap_err();
    }
    breaker.force_close().await;

    assert_eq!(breaker.state().await, CircuitState::Closed);
    let stats = breaker.stats().await;
    assert_eq!(stats.total_failures, 3);
    assert_eq!(stats.consecutive_failures, 0);
    succeed(&breaker).await.unwrap();
}
