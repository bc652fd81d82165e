//! Anthropic Messages API client
//!
//! Sends a single prompt to the Messages endpoint over HTTPS and returns the
//! decoded text. It includes:
//!
//! - Fail-fast credential resolution at construction
//! - Typed errors for every failure mode (status, transport, parse)
//! - Usage accounting for every call, successful or not
//! - Request timeout and cooperative cancellation
//!
//! ## Request Format
//!
//! ```json
//! {
//!   "model": "claude-3-5-sonnet-20241022",
//!   "max_tokens": 4000,
//!   "messages": [{ "role": "user", "content": "Prompt" }]
//! }
//! ```
//!
//! ## Response Format
//!
//! ```json
//! {
//!   "content": [{ "type": "text", "text": "Response" }],
//!   "usage": { "input_tokens": 10, "output_tokens": 25 }
//! }
//! ```

use crate::claude::sender::MessageSender;
use crate::claude::types::*;
use crate::env;
use crate::usage::UsageTracker;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

const CONNECTION_PROBE_PROMPT: &str = "Hello, this is a test message.";
const PREVIEW_CHARS: usize = 100;

#[derive(Clone)]
pub struct ClaudeApiClient {
    config: ClientConfig,
    endpoint: Url,
    http: reqwest::Client,
    credentials: Arc<Mutex<CredentialSet>>,
    tracker: Arc<UsageTracker>,
}

struct CredentialSet {
    keys: Vec<String>,
    active: usize,
}

impl CredentialSet {
    fn active_key(&self) -> &str {
        &self.keys[self.active]
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("keys", &format_args!("[{} redacted]", self.keys.len()))
            .field("active", &self.active)
            .finish()
    }
}

impl fmt::Debug for ClaudeApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaudeApiClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("default_model", &self.config.default_model)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

impl ClaudeApiClient {
    /// Build a client; fails immediately when no credential can be found.
    pub fn new(config: ClientConfig, tracker: Arc<UsageTracker>) -> Result<Self, ApiError> {
        let mut keys = Vec::new();
        if let Some(explicit) = config.api_key.as_deref().map(str::trim)
            && !explicit.is_empty()
        {
            keys.push(explicit.to_string());
        }
        for candidate in env::api_key_candidates() {
            if !keys.contains(&candidate) {
                keys.push(candidate);
            }
        }

        if keys.is_empty() {
            error!("Refusing to build API client without a credential");
            return Err(ApiError::MissingCredentials);
        }

        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| ApiError::InvalidConfig(format!("endpoint {}: {}", config.endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ApiError::InvalidConfig(format!(
                "endpoint scheme must be http or https, got {}",
                endpoint.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        debug!(
            "API client ready for {} ({} credential(s) available)",
            endpoint,
            keys.len()
        );

        Ok(Self {
            config,
            endpoint,
            http,
            credentials: Arc::new(Mutex::new(CredentialSet { keys, active: 0 })),
            tracker,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    /// Build a request using the client's defaults
    pub fn request(&self, prompt: impl Into<String>) -> ApiRequest {
        ApiRequest::new(prompt, self.config.default_model.clone())
            .with_max_tokens(self.config.default_max_tokens)
    }

    /// Send a prompt and return the response text
    pub async fn query(&self, prompt: &str, options: QueryOptions) -> Result<String, ApiError> {
        let QueryOptions {
            model,
            max_tokens,
            attachments,
            cancel,
        } = options;

        let mut request = self.request(prompt).with_attachments(attachments);
        if let Some(model) = model {
            request = request.with_model(model);
        }
        if let Some(max_tokens) = max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = match cancel {
            Some(token) => self.send_cancellable(&request, &token).await?,
            None => self.send(&request).await?,
        };
        Ok(response.text)
    }

    /// Send a request, recording its outcome in usage accounting exactly once
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let started = Instant::now();
        let outcome = self.dispatch(request, started).await;
        self.record_outcome(request, &outcome, started.elapsed()).await;
        outcome
    }

    /// Like [`send`](Self::send), but aborts when `token` is cancelled
    pub async fn send_cancellable(
        &self,
        request: &ApiRequest,
        token: &CancellationToken,
    ) -> Result<ApiResponse, ApiError> {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                warn!("Request {} cancelled after {:?}", request.id(), started.elapsed());
                Err(ApiError::Cancelled)
            }
            result = self.dispatch(request, started) => result,
        };
        self.record_outcome(request, &outcome, started.elapsed()).await;
        outcome
    }

    /// Switch to the next available credential. Returns false when there is none.
    pub async fn rotate_credential(&self) -> bool {
        let mut credentials = self.credentials.lock().await;
        if credentials.keys.len() < 2 {
            return false;
        }
        credentials.active = (credentials.active + 1) % credentials.keys.len();
        info!(
            "Switched to alternate credential ({} of {})",
            credentials.active + 1,
            credentials.keys.len()
        );
        true
    }

    /// Probe the endpoint with a short prompt
    pub async fn test_connection(&self) -> ConnectionReport {
        match self.query(CONNECTION_PROBE_PROMPT, QueryOptions::default()).await {
            Ok(text) => ConnectionReport {
                success: true,
                preview: Some(preview(&text, PREVIEW_CHARS)),
                error: None,
                message: "API connection successful".to_string(),
            },
            Err(e) => ConnectionReport {
                success: false,
                preview: None,
                error: Some(e.to_string()),
                message: "API connection failed".to_string(),
            },
        }
    }

    async fn dispatch(&self, request: &ApiRequest, started: Instant) -> Result<ApiResponse, ApiError> {
        request.validate()?;

        let api_key = self.credentials.lock().await.active_key().to_string();
        info!("Making API call to {}...", request.model());

        let response = self
            .http
            .post(self.endpoint.clone())
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.config.api_version)
            .header(CONTENT_TYPE, "application/json")
            .json(&request.to_wire())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(map_body_error)?;

        if status != 200 {
            return Err(error_for_status(status, retry_after, body, request.model()));
        }

        let parsed = parse_response_body(&body)?;
        let latency = started.elapsed();
        info!("API call completed in {}ms", latency.as_millis());

        Ok(ApiResponse {
            request_id: request.id(),
            text: parsed.text,
            usage: parsed.usage,
            latency,
            model: parsed.model.unwrap_or_else(|| request.model().to_string()),
            stop_reason: parsed.stop_reason,
        })
    }

    async fn record_outcome(
        &self,
        request: &ApiRequest,
        outcome: &Result<ApiResponse, ApiError>,
        elapsed: Duration,
    ) {
        match outcome {
            Ok(response) => {
                self.tracker
                    .record_success(request.prompt(), &response.text, response.usage.total(), elapsed)
                    .await;
            }
            Err(e) => {
                error!(
                    "API call {} failed at {}: {}",
                    request.id(),
                    chrono::Utc::now().to_rfc3339(),
                    e
                );
                self.tracker
                    .record_failure(request.prompt(), &e.to_string(), elapsed)
                    .await;
            }
        }
    }
}

#[async_trait]
impl MessageSender for ClaudeApiClient {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        ClaudeApiClient::send(self, request).await
    }

    async fn rotate_credential(&self) -> bool {
        ClaudeApiClient::rotate_credential(self).await
    }

    fn sender_name(&self) -> &'static str {
        "anthropic-messages"
    }
}

pub(crate) struct ParsedBody {
    pub text: String,
    pub usage: TokenUsage,
    pub model: Option<String>,
    pub stop_reason: Option<String>,
}

/// Decode a 200 response body; text blocks are concatenated in order
pub(crate) fn parse_response_body(body: &str) -> Result<ParsedBody, ApiError> {
    let decoded: MessagesResponseBody =
        serde_json::from_str(body).map_err(|e| ApiError::Parse(e.to_string()))?;

    let text = decoded
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<String>();

    Ok(ParsedBody {
        text,
        usage: decoded.usage.unwrap_or_default(),
        model: decoded.model,
        stop_reason: decoded.stop_reason,
    })
}

/// Map a non-200 status to its typed error
pub(crate) fn error_for_status(
    status: u16,
    retry_after: Option<Duration>,
    body: String,
    model: &str,
) -> ApiError {
    match status {
        401 | 403 => ApiError::AuthFailed { status, body },
        429 => ApiError::RateLimited { retry_after, body },
        400 | 404 if mentions_model(&body) => ApiError::ModelUnavailable {
            model: model.to_string(),
            status,
            body,
        },
        _ => ApiError::Http { status, body },
    }
}

fn mentions_model(body: &str) -> bool {
    let lowered = body.to_lowercase();
    lowered.contains("model") || lowered.contains("not_found_error")
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(err.to_string())
    } else if err.is_builder() {
        ApiError::InvalidRequest(err.to_string())
    } else {
        ApiError::Network(err.to_string())
    }
}

fn map_body_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(err.to_string())
    } else {
        ApiError::Streaming(err.to_string())
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
