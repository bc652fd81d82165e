use crate::env;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type RequestId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Explicit credential; environment variables are consulted when absent
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub api_version: String,
    pub default_model: String,
    pub default_max_tokens: u32,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: env::api::DEFAULT_ENDPOINT.to_string(),
            api_version: env::api::API_VERSION.to_string(),
            default_model: env::api::DEFAULT_MODEL.to_string(),
            default_max_tokens: env::api::DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(30),
            user_agent: format!("metateam-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// A text file sent along with the prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, content })
    }

    fn render(&self) -> String {
        format!("File: {}\n```\n{}\n```", self.name, self.content)
    }
}

/// A single prompt bound for the Messages endpoint.
///
/// Fields are private; the builder methods consume the request so an issued
/// request is never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    id: RequestId,
    prompt: String,
    model: String,
    max_tokens: u32,
    attachments: Vec<Attachment>,
}

impl ApiRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            model: model.into(),
            max_tokens: env::api::DEFAULT_MAX_TOKENS,
            attachments: Vec::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_attachments(mut self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        self.attachments.extend(attachments);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Reject requests the endpoint would refuse anyway
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.prompt.trim().is_empty() {
            return Err(ApiError::InvalidRequest("prompt must not be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ApiError::InvalidRequest("model must not be empty".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(ApiError::InvalidRequest(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn to_wire(&self) -> MessagesRequestBody {
        let content = if self.attachments.is_empty() {
            WireContent::Text(self.prompt.clone())
        } else {
            let mut blocks = vec![ContentBlock::text(self.prompt.clone())];
            blocks.extend(self.attachments.iter().map(|a| ContentBlock::text(a.render())));
            WireContent::Blocks(blocks)
        };

        MessagesRequestBody {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![WireMessage {
                role: "user".to_string(),
                content,
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub request_id: RequestId,
    pub text: String,
    pub usage: TokenUsage,
    pub latency: Duration,
    pub model: String,
    pub stop_reason: Option<String>,
}

/// Per-call overrides for [`crate::claude::ClaudeApiClient::query`]
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub attachments: Vec<Attachment>,
    pub cancel: Option<CancellationToken>,
}

impl QueryOptions {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Result of a connectivity probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub preview: Option<String>,
    pub error: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("No API key found; set {} or {}", env::vars::CLAUDE_API_KEY, env::vars::ANTHROPIC_API_KEY)]
    MissingCredentials,
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Authentication failed ({status}): {body}")]
    AuthFailed { status: u16, body: String },
    #[error("Rate limit exceeded (429): {body}")]
    RateLimited {
        retry_after: Option<Duration>,
        body: String,
    },
    #[error("Model {model} unavailable ({status}): {body}")]
    ModelUnavailable {
        model: String,
        status: u16,
        body: String,
    },
    #[error("API request failed: {status} - {body}")]
    Http { status: u16, body: String },
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Response stream interrupted: {0}")]
    Streaming(String),
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    /// HTTP status carried by the error, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthFailed { status, .. }
            | ApiError::ModelUnavailable { status, .. }
            | ApiError::Http { status, .. } => Some(*status),
            ApiError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Server-provided `retry-after` hint
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, ApiError::Http { status, .. } if *status >= 500)
    }
}

impl From<crate::retry::CircuitOpen> for ApiError {
    fn from(_: crate::retry::CircuitOpen) -> Self {
        ApiError::CircuitOpen
    }
}

impl From<crate::retry::Cancelled> for ApiError {
    fn from(_: crate::retry::Cancelled) -> Self {
        ApiError::Cancelled
    }
}

impl crate::retry::Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_)
            | ApiError::Timeout(_)
            | ApiError::Streaming(_)
            | ApiError::Parse(_)
            | ApiError::RateLimited { .. } => true,
            ApiError::Http { status, .. } => *status >= 500,
            ApiError::MissingCredentials
            | ApiError::InvalidConfig(_)
            | ApiError::InvalidRequest(_)
            | ApiError::AuthFailed { .. }
            | ApiError::ModelUnavailable { .. }
            | ApiError::CircuitOpen
            | ApiError::Cancelled => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        ApiError::retry_after(self)
    }
}

// Wire format of the Messages endpoint

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MessagesRequestBody {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub role: String,
    pub content: WireContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentBlock {
    fn text(text: String) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessagesResponseBody {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}
