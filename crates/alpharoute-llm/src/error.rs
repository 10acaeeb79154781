use std::time::Duration;

use thiserror::Error;

use crate::backoff::RetryKind;

/// Errors raised by provider transports and the unified client
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Request was rejected before it was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider answered 429
    #[error("rate limited by provider")]
    RateLimited {
        /// Server-suggested wait, from `Retry-After`
        retry_after: Option<Duration>,
    },

    /// Provider answered with a non-success status
    #[error("provider returned {status}: {message}")]
    ProviderApi { status: u16, message: String },

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Request exceeded its time budget
    #[error("request timed out")]
    Timeout,

    /// No usable provider configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Named provider does not exist
    #[error("provider not found: {provider}")]
    ProviderNotFound { provider: String },
}

impl LlmError {
    /// Whether the same provider may succeed on another attempt
    ///
    /// Rate limits, 5xx responses, transport failures and timeouts are
    /// transient. Other 4xx responses are not.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport(_) | Self::Timeout => true,
            Self::ProviderApi { status, .. } => *status >= 500,
            Self::InvalidRequest(_) | Self::Configuration(_) | Self::ProviderNotFound { .. } => false,
        }
    }

    /// Backoff curve for a retryable error
    pub const fn retry_kind(&self) -> Option<RetryKind> {
        match self {
            Self::RateLimited { .. } => Some(RetryKind::RateLimit),
            _ if self.is_retryable() => Some(RetryKind::ServerError),
            _ => None,
        }
    }

    /// Server-suggested wait, if any
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether this error stems from configuration rather than a call
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ProviderNotFound { .. })
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}
