pub mod circuit_breaker;
pub mod executor;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitOpen, CircuitState,
};
pub use executor::{Cancelled, Retryable, RetryExecutor, RetryPolicy, ServiceKind};
