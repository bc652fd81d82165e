use super::*;
use crate::claude::{ApiError, ApiRequest, ApiResponse, MessageSender, TokenUsage};
use crate::retry::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tempfile::TempDir;

/// Sender that replays scripted outcomes and records what it was asked to send
struct ScriptedSender {
    outcomes: StdMutex<VecDeque<Result<String, ApiError>>>,
    sent: StdMutex<Vec<ApiRequest>>,
    can_rotate: bool,
}

impl ScriptedSender {
    fn new(outcomes: Vec<Result<String, ApiError>>) -> Self {
        Self {
            outcomes: StdMutex::new(outcomes.into()),
            sent: StdMutex::new(Vec::new()),
            can_rotate: false,
        }
    }

    fn rotating(mut self) -> Self {
        self.can_rotate = true;
        self
    }

    fn sent(&self) -> Vec<ApiRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for ScriptedSender {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.sent.lock().unwrap().push(request.clone());
        let next = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network("script exhausted".to_string())));
        next.map(|text| ApiResponse {
            request_id: request.id(),
            text,
            usage: TokenUsage {
                input_tokens: 5,
                output_tokens: 7,
            },
            latency: Duration::from_millis(3),
            model: request.model().to_string(),
            stop_reason: Some("end_turn".to_string()),
        })
    }

    async fn rotate_credential(&self) -> bool {
        self.can_rotate
    }

    fn sender_name(&self) -> &'static str {
        "scripted"
    }
}

/// Sink that remembers every escalation
#[derive(Default)]
struct RecordingSink {
    escalations: StdMutex<Vec<(Classification, EscalationReason)>>,
}

#[async_trait]
impl EscalationSink for RecordingSink {
    async fn escalate(&self, info: &ErrorInfo, reason: EscalationReason) {
        self.escalations
            .lock()
            .unwrap()
            .push((info.classification, reason));
    }
}

fn quiet_config() -> ErrorHandlerConfig {
    ErrorHandlerConfig {
        log_file: None,
        network_retry: RetryPolicy::exponential(2, Duration::from_millis(10)),
        ..Default::default()
    }
}

fn handler_with(config: ErrorHandlerConfig) -> (ErrorHandler, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let handler = ErrorHandler::new(config, breaker).with_sink(sink.clone());
    (handler, sink)
}

fn request() -> ApiRequest {
    ApiRequest::new("Summarise the sprint", "claude-3-5-sonnet-20241022").with_max_tokens(4000)
}

#[test]
fn test_structural_classification() {
    let cases = vec![
        (
            ApiError::AuthFailed {
                status: 401,
                body: String::new(),
            },
            Classification::Authentication,
            Severity::High,
        ),
        (ApiError::MissingCredentials, Classification::Authentication, Severity::High),
        (
            ApiError::RateLimited {
                retry_after: None,
                body: String::new(),
            },
            Classification::RateLimit,
            Severity::Medium,
        ),
        (
            ApiError::Streaming("body closed".to_string()),
            Classification::Streaming,
            Severity::Medium,
        ),
        (
            ApiError::ModelUnavailable {
                model: "claude-x".to_string(),
                status: 404,
                body: String::new(),
            },
            Classification::Model,
            Severity::Medium,
        ),
        (
            ApiError::Http {
                status: 529,
                body: "overloaded".to_string(),
            },
            Classification::Model,
            Severity::Medium,
        ),
        (
            ApiError::Timeout("30s".to_string()),
            Classification::Network,
            Severity::High,
        ),
        (
            ApiError::InvalidRequest("prompt must not be empty".to_string()),
            Classification::Validation,
            Severity::Low,
        ),
        (
            ApiError::Http {
                status: 409,
                body: String::new(),
            },
            Classification::General,
            Severity::Low,
        ),
    ];

    for (error, classification, severity) in cases {
        let info = ErrorInfo::from_api_error(&error, "test");
        assert_eq!(info.classification, classification, "{}", error);
        assert_eq!(info.severity, severity, "{}", error);
        assert_eq!(info.status, error.status());
    }
}

#[test]
fn test_message_classification() {
    assert_eq!(classify_message("Authentication failed"), Classification::Authentication);
    assert_eq!(classify_message("HTTP 403 forbidden"), Classification::Authentication);
    assert_eq!(classify_message("Rate limit exceeded"), Classification::RateLimit);
    assert_eq!(classify_message("status 429"), Classification::RateLimit);
    assert_eq!(classify_message("stream ended early"), Classification::Streaming);
    assert_eq!(classify_message("model not found"), Classification::Model);
    assert_eq!(classify_message("read ECONNRESET"), Classification::Network);
    assert_eq!(classify_message("connection reset by peer"), Classification::Network);
    assert_eq!(classify_message("invalid input"), Classification::Validation);
    assert_eq!(classify_message("something odd"), Classification::General);
}

#[test]
fn test_fatal_messages_are_critical() {
    assert_eq!(
        assess_severity("fatal: disk full", Classification::General),
        Severity::Critical
    );
    let info = ErrorInfo::from_error(&anyhow::anyhow!("critical failure in writer"), "io");
    assert_eq!(info.severity, Severity::Critical);
    assert!(Severity::Critical > Severity::High);
    assert!(Severity::Medium > Severity::Low);
}

#[tokio::test]
async fn test_high_severity_escalates_immediately() {
    let (handler, sink) = handler_with(quiet_config());
    let error = ApiError::AuthFailed {
        status: 401,
        body: "invalid x-api-key".to_string(),
    };

    let handled = handler.handle_error(&error, "query").await;

    assert_eq!(handled.escalated, Some(EscalationReason::Severity(Severity::High)));
    assert_eq!(
        *sink.escalations.lock().unwrap(),
        vec![(
            Classification::Authentication,
            EscalationReason::Severity(Severity::High)
        )]
    );
}

#[tokio::test]
async fn test_recurrence_escalates_after_threshold() {
    let (handler, sink) = handler_with(quiet_config());
    let error = ApiError::InvalidRequest("bad input".to_string());

    for _ in 0..5 {
        let handled = handler.handle_error(&error, "validation").await;
        assert!(handled.escalated.is_none());
    }
    let sixth = handler.handle_error(&error, "validation").await;

    assert_eq!(sixth.recent_count, 6);
    assert_eq!(sixth.escalated, Some(EscalationReason::Recurrence { count: 6 }));
    assert_eq!(sink.escalations.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_in_memory_log_is_capped() {
    let (handler, _) = handler_with(ErrorHandlerConfig {
        max_log_entries: 3,
        ..quiet_config()
    });

    for i in 0..12 {
        handler
            .handle_error(&ApiError::InvalidRequest(format!("bad {}", i)), "cap")
            .await;
    }

    let entries = handler.log_entries().await;
    assert_eq!(entries.len(), 3);
    assert!(entries[2].message.contains("bad 11"));

    let metrics = handler.metrics().await;
    assert_eq!(metrics.total_errors, 12);
    assert_eq!(metrics.counts.get(&Classification::Validation), Some(&12));
    assert_eq!(metrics.recent.len(), 3);

    handler.clear().await;
    let metrics = handler.metrics().await;
    assert_eq!(metrics.total_errors, 0);
    assert!(metrics.recent.is_empty());
}

#[tokio::test]
async fn test_errors_written_as_ndjson() {
    let dir = TempDir::new().unwrap();
    let log_file = dir.path().join("logs").join("errors.jsonl");
    let (handler, _) = handler_with(ErrorHandlerConfig {
        log_file: Some(log_file.clone()),
        ..quiet_config()
    });

    handler
        .handle_error(&ApiError::Network("connection refused".to_string()), "first")
        .await;
    handler
        .handle_foreign(&anyhow::anyhow!("stream ended early"), "second")
        .await;

    let content = std::fs::read_to_string(&log_file).unwrap();
    let lines: Vec<ErrorInfo> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].classification, Classification::Network);
    assert_eq!(lines[1].classification, Classification::Streaming);
    assert_eq!(lines[1].context, "second");
}

#[tokio::test]
async fn test_no_strategy_for_validation() {
    let (handler, _) = handler_with(quiet_config());
    let sender = ScriptedSender::new(vec![]);
    let error = ApiError::InvalidRequest("bad".to_string());

    let outcome = handler.recover(&error, &request(), &sender, "test").await;

    assert!(matches!(
        outcome,
        RecoveryOutcome::NotAttempted {
            classification: Classification::Validation
        }
    ));
    assert!(sender.sent().is_empty());
    assert!(matches!(
        outcome.into_result(error),
        Err(ApiError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_swap_credential_retries_once() {
    let (handler, _) = handler_with(quiet_config());
    let sender = ScriptedSender::new(vec![Ok("hello".to_string())]).rotating();
    let error = ApiError::AuthFailed {
        status: 401,
        body: String::new(),
    };

    let outcome = handler.recover(&error, &request(), &sender, "auth").await;

    assert_eq!(outcome.strategy(), Some(RecoveryStrategy::SwapCredential));
    assert!(outcome.is_recovered());
    assert_eq!(sender.sent().len(), 1);
}

#[tokio::test]
async fn test_swap_credential_without_alternate_fails_fast() {
    let (handler, _) = handler_with(quiet_config());
    let sender = ScriptedSender::new(vec![Ok("unused".to_string())]);
    let error = ApiError::AuthFailed {
        status: 403,
        body: String::new(),
    };

    let outcome = handler.recover(&error, &request(), &sender, "auth").await;

    assert!(matches!(
        outcome,
        RecoveryOutcome::Failed {
            error: ApiError::AuthFailed { status: 403, .. },
            ..
        }
    ));
    assert!(sender.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wait_and_retry_honours_retry_after() {
    let (handler, _) = handler_with(quiet_config());
    let sender = ScriptedSender::new(vec![Ok("after wait".to_string())]);
    let error = ApiError::RateLimited {
        retry_after: Some(Duration::from_secs(2)),
        body: String::new(),
    };

    let started = tokio::time::Instant::now();
    let outcome = handler.recover(&error, &request(), &sender, "rate").await;

    assert!(outcome.is_recovered());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2));
    assert!(waited <= Duration::from_millis(2400));
}

#[test]
fn test_rate_limit_delay_defaults_to_five_seconds() {
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let handler = ErrorHandler::new(quiet_config(), breaker);
    let error = ApiError::RateLimited {
        retry_after: None,
        body: String::new(),
    };

    for _ in 0..20 {
        let delay = handler.rate_limit_delay(&error);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_secs(6));
    }
}

#[tokio::test]
async fn test_reduced_tokens_caps_budget() {
    let (handler, _) = handler_with(quiet_config());
    let sender = ScriptedSender::new(vec![Ok("short".to_string())]);
    let error = ApiError::Streaming("connection closed mid-body".to_string());

    let outcome = handler.recover(&error, &request(), &sender, "stream").await;

    assert!(outcome.is_recovered());
    assert_eq!(sender.sent()[0].max_tokens(), 2000);

    // Budgets already below the cap are kept
    let sender = ScriptedSender::new(vec![Ok("short".to_string())]);
    let small = request().with_max_tokens(500);
    handler.recover(&error, &small, &sender, "stream").await;
    assert_eq!(sender.sent()[0].max_tokens(), 500);
}

#[tokio::test]
async fn test_fallback_models_skip_failing_model() {
    let (handler, _) = handler_with(quiet_config());
    let unavailable = |model: &str| ApiError::ModelUnavailable {
        model: model.to_string(),
        status: 404,
        body: "not_found_error".to_string(),
    };
    let sender = ScriptedSender::new(vec![
        Err(unavailable("claude-3-5-haiku-20241022")),
        Ok("from opus".to_string()),
    ]);
    let error = unavailable("claude-3-5-sonnet-20241022");

    let outcome = handler.recover(&error, &request(), &sender, "model").await;

    let models: Vec<String> = sender.sent().iter().map(|r| r.model().to_string()).collect();
    assert_eq!(
        models,
        vec!["claude-3-5-haiku-20241022", "claude-3-opus-20240229"]
    );
    match outcome {
        RecoveryOutcome::Recovered { response, .. } => {
            assert_eq!(response.model, "claude-3-opus-20240229");
            assert_eq!(response.text, "from opus");
        }
        other => panic!("expected recovery, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fallback_models_exhausted_returns_last_error() {
    let (handler, _) = handler_with(ErrorHandlerConfig {
        fallback_models: vec!["claude-3-5-haiku-20241022".to_string()],
        ..quiet_config()
    });
    let sender = ScriptedSender::new(vec![Err(ApiError::Http {
        status: 500,
        body: "boom".to_string(),
    })]);
    let error = ApiError::Http {
        status: 503,
        body: String::new(),
    };

    let outcome = handler.recover(&error, &request(), &sender, "model").await;

    assert!(matches!(
        outcome,
        RecoveryOutcome::Failed {
            strategy: RecoveryStrategy::FallbackModels,
            error: ApiError::Http { status: 500, .. }
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_circuit_backoff_retries_network_errors() {
    let (handler, _) = handler_with(quiet_config());
    let sender = ScriptedSender::new(vec![
        Err(ApiError::Network("connection reset".to_string())),
        Ok("recovered".to_string()),
    ]);
    let error = ApiError::Network("connection reset".to_string());

    let outcome = handler.recover(&error, &request(), &sender, "network").await;

    assert!(outcome.is_recovered());
    assert_eq!(sender.sent().len(), 2);
}

#[tokio::test]
async fn test_circuit_backoff_fails_fast_when_open() {
    let (handler, _) = handler_with(quiet_config());
    handler.breaker().force_open().await;
    let sender = ScriptedSender::new(vec![Ok("unused".to_string())]);
    let error = ApiError::Timeout("deadline".to_string());

    let outcome = handler.recover(&error, &request(), &sender, "network").await;

    assert!(matches!(
        outcome,
        RecoveryOutcome::Failed {
            error: ApiError::CircuitOpen,
            ..
        }
    ));
    assert!(sender.sent().is_empty());
}
