use crate::claude::{ApiError, ApiRequest, ApiResponse, MessageSender};
use crate::errors::classifier::{Classification, ErrorInfo, classify_api_error};
use crate::errors::handler::ErrorHandler;
use crate::retry::RetryExecutor;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// The single recovery action tied to each classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    /// Switch to the alternate credential and resend once
    SwapCredential,
    /// Sleep for the server hint (or the default delay) and resend once
    WaitAndRetry,
    /// Resend with a smaller token budget
    ReducedTokens,
    /// Walk the configured fallback model list
    FallbackModels,
    /// Exponential backoff retries guarded by the circuit breaker
    CircuitBackoff,
}

impl RecoveryStrategy {
    pub fn for_classification(classification: Classification) -> Option<Self> {
        match classification {
            Classification::Authentication => Some(RecoveryStrategy::SwapCredential),
            Classification::RateLimit => Some(RecoveryStrategy::WaitAndRetry),
            Classification::Streaming => Some(RecoveryStrategy::ReducedTokens),
            Classification::Model => Some(RecoveryStrategy::FallbackModels),
            Classification::Network => Some(RecoveryStrategy::CircuitBackoff),
            Classification::Validation | Classification::General => None,
        }
    }
}

#[derive(Debug)]
pub enum RecoveryOutcome {
    /// No strategy exists for this classification
    NotAttempted { classification: Classification },
    Recovered {
        strategy: RecoveryStrategy,
        response: ApiResponse,
    },
    Failed {
        strategy: RecoveryStrategy,
        error: ApiError,
    },
}

impl RecoveryOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered { .. })
    }

    pub fn strategy(&self) -> Option<RecoveryStrategy> {
        match self {
            RecoveryOutcome::NotAttempted { .. } => None,
            RecoveryOutcome::Recovered { strategy, .. } | RecoveryOutcome::Failed { strategy, .. } => {
                Some(*strategy)
            }
        }
    }

    /// Collapse into a result; unattempted recoveries surface `original`
    pub fn into_result(self, original: ApiError) -> Result<ApiResponse, ApiError> {
        match self {
            RecoveryOutcome::Recovered { response, .. } => Ok(response),
            RecoveryOutcome::Failed { error, .. } => Err(error),
            RecoveryOutcome::NotAttempted { .. } => Err(original),
        }
    }
}

impl ErrorHandler {
    /// Run the strategy tied to `error`'s classification, at most once.
    pub async fn recover(
        &self,
        error: &ApiError,
        request: &ApiRequest,
        sender: &dyn MessageSender,
        context: &str,
    ) -> RecoveryOutcome {
        let classification = classify_api_error(error);
        let Some(strategy) = RecoveryStrategy::for_classification(classification) else {
            info!("No recovery strategy for {} error (context: {})", classification, context);
            return RecoveryOutcome::NotAttempted { classification };
        };

        let severity = ErrorInfo::from_api_error(error, context).severity;
        info!(
            "Attempting {:?} recovery for {} {} error via {} (context: {})",
            strategy,
            severity,
            classification,
            sender.sender_name(),
            context
        );

        let result = match strategy {
            RecoveryStrategy::SwapCredential => self.swap_credential(error, request, sender).await,
            RecoveryStrategy::WaitAndRetry => self.wait_and_retry(error, request, sender).await,
            RecoveryStrategy::ReducedTokens => self.reduced_tokens(request, sender).await,
            RecoveryStrategy::FallbackModels => self.fallback_models(error, request, sender).await,
            RecoveryStrategy::CircuitBackoff => self.circuit_backoff(request, sender).await,
        };

        match result {
            Ok(response) => {
                info!(
                    "{:?} recovery succeeded for {} error (context: {})",
                    strategy, classification, context
                );
                RecoveryOutcome::Recovered { strategy, response }
            }
            Err(error) => {
                warn!(
                    "{:?} recovery failed for {} {} error (context: {}): {}",
                    strategy, severity, classification, context, error
                );
                RecoveryOutcome::Failed { strategy, error }
            }
        }
    }

    async fn swap_credential(
        &self,
        error: &ApiError,
        request: &ApiRequest,
        sender: &dyn MessageSender,
    ) -> Result<ApiResponse, ApiError> {
        if !sender.rotate_credential().await {
            warn!("No alternate credential available");
            return Err(error.clone());
        }
        sender.send(request).await
    }

    async fn wait_and_retry(
        &self,
        error: &ApiError,
        request: &ApiRequest,
        sender: &dyn MessageSender,
    ) -> Result<ApiResponse, ApiError> {
        let delay = self.rate_limit_delay(error);
        info!("Rate limited, waiting {}ms before retrying", delay.as_millis());
        tokio::time::sleep(delay).await;
        sender.send(request).await
    }

    /// Server hint (or the configured default) plus random extra wait
    pub fn rate_limit_delay(&self, error: &ApiError) -> Duration {
        let base = error.retry_after().unwrap_or(self.config.rate_limit_delay);
        let jitter = rand::random::<f64>() * self.config.rate_limit_jitter.max(0.0);
        base + base.mul_f64(jitter)
    }

    async fn reduced_tokens(
        &self,
        request: &ApiRequest,
        sender: &dyn MessageSender,
    ) -> Result<ApiResponse, ApiError> {
        let max_tokens = request.max_tokens().min(self.config.reduced_max_tokens);
        info!("Retrying with reduced token budget: {}", max_tokens);
        let reduced = request.clone().with_max_tokens(max_tokens);
        sender.send(&reduced).await
    }

    async fn fallback_models(
        &self,
        error: &ApiError,
        request: &ApiRequest,
        sender: &dyn MessageSender,
    ) -> Result<ApiResponse, ApiError> {
        let mut last_error = error.clone();

        for model in self
            .config
            .fallback_models
            .iter()
            .filter(|m| m.as_str() != request.model())
        {
            info!("Trying fallback model: {}", model);
            match sender.send(&request.clone().with_model(model.clone())).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("Fallback model {} failed: {}", model, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn circuit_backoff(
        &self,
        request: &ApiRequest,
        sender: &dyn MessageSender,
    ) -> Result<ApiResponse, ApiError> {
        let breaker = self.breaker.as_ref();
        if breaker.is_open().await {
            return Err(ApiError::CircuitOpen);
        }

        RetryExecutor::new(self.config.network_retry.clone())
            .execute(move || breaker.call(move || sender.send(request)))
            .await
    }
}
