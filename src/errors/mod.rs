pub mod classifier;
pub mod handler;
pub mod recovery;

#[cfg(test)]
mod tests;

pub use classifier::{
    Classification, ErrorInfo, Severity, assess_severity, classify_api_error, classify_message,
};
pub use handler::{
    ErrorHandler, ErrorHandlerConfig, ErrorMetrics, EscalationReason, EscalationSink,
    HandledError, TracingEscalationSink,
};
pub use recovery::{RecoveryOutcome, RecoveryStrategy};
