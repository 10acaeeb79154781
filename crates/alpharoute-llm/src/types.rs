//! Provider-neutral request and response types

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Highest temperature any provider accepts
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion request addressed to one transport
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Model override; the transport default is used when absent
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Check the request and clamp the temperature into range
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an empty message list or a zero token limit
    pub fn validated(&self) -> Result<Self, LlmError> {
        if self.messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".to_owned()));
        }
        if self.max_tokens == Some(0) {
            return Err(LlmError::InvalidRequest("max_tokens must be positive".to_owned()));
        }

        let mut request = self.clone();
        request.temperature = self.temperature.map(|t| {
            if t.is_finite() { t.clamp(0.0, MAX_TEMPERATURE) } else { 1.0 }
        });
        Ok(request)
    }
}

/// Token counts reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Total, derived from the parts when the provider omitted it
    pub const fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }
}

/// Parsed provider response
#[derive(Debug, Clone, Serialize)]
pub struct RawResponse {
    /// `choices[0].message.content` or the equivalent
    pub content: String,
    /// Model the provider reports having used
    pub model: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

/// A model advertised by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

/// Per-transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageStats {
    /// HTTP attempts, retries included
    pub request_count: u64,
    pub retry_count: u64,
    /// Failed HTTP attempts
    pub error_count: u64,
    /// Fraction of attempts that succeeded
    pub success_rate: f64,
}

/// Result of a health probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub provider: String,
    pub healthy: bool,
    /// Endpoint that answered, when probed live
    pub endpoint: Option<String>,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
    /// Served from the transport's cache
    pub cached: bool,
}

impl HealthStatus {
    pub fn healthy(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            healthy: true,
            endpoint: None,
            latency_ms: None,
            error: None,
            cached: false,
        }
    }

    pub fn unhealthy(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            healthy: false,
            endpoint: None,
            latency_ms: None,
            error: Some(error.into()),
            cached: false,
        }
    }
}
