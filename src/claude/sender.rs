use crate::claude::types::{ApiError, ApiRequest, ApiResponse};
use async_trait::async_trait;

/// Anything that can deliver an [`ApiRequest`] to a model endpoint.
///
/// Recovery strategies resend through this trait, so tests and alternate
/// transports can stand in for the HTTP client.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver one request; every call is a single attempt
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;

    /// Switch to an alternate credential if one is available
    async fn rotate_credential(&self) -> bool {
        false
    }

    /// Identifier used in logs
    fn sender_name(&self) -> &'static str;
}
