use crate::config::ConfigError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the public gate operations.
///
/// Every variant is raised before any state mutation, so a failed call never
/// leaves a partial transition behind.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payment provider unavailable: {0}")]
    PaymentProviderUnavailable(String),

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("malformed payment event: {0}")]
    MalformedEvent(String),

    #[error("content engine failed: {0}")]
    ContentEngineFailure(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl GateError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn content_not_found(content_id: &str) -> Self {
        Self::NotFound(format!("content '{content_id}' not found"))
    }

    /// Stable machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::PaymentProviderUnavailable(_) => "payment_provider_unavailable",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::MalformedEvent(_) => "malformed_event",
            Self::ContentEngineFailure(_) => "content_engine_failure",
            Self::Config(_) => "configuration",
            Self::Storage(_) => "internal",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PaymentProviderUnavailable(_) | Self::ContentEngineFailure(_) | Self::Storage(_)
        )
    }
}
