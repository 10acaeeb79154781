//! Hosted Anthropic Messages API

use alpharoute_config::{ProviderConfig, ProviderKind};
use async_trait::async_trait;

use super::{AuthScheme, HttpCore, ProviderTransport, TransportOptions};
use crate::error::LlmError;
use crate::protocol::{AnthropicRequest, AnthropicResponse};
use crate::types::{ChatRequest, HealthStatus, ModelInfo, RawResponse, UsageStats};

/// Value of the `anthropic-version` header
pub const API_VERSION: &str = "2023-06-01";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

const MESSAGES_PATH: &str = "messages";

const MODELS_PATH: &str = "models";

/// Models advertised without a network call
const KNOWN_MODELS: [&str; 4] = [
    "claude-3-5-haiku-latest",
    "claude-3-5-sonnet-latest",
    "claude-3-7-sonnet-latest",
    "claude-sonnet-4-0",
];

/// Transport for the Anthropic Messages API
#[derive(Debug)]
pub struct AnthropicTransport {
    core: HttpCore,
    default_model: String,
}

impl AnthropicTransport {
    /// Create from provider configuration
    ///
    /// # Errors
    ///
    /// `Configuration` if the base URL is invalid
    pub fn new(name: &str, config: &ProviderConfig, options: &TransportOptions) -> Result<Self, LlmError> {
        let core = HttpCore::new(name, config, options, DEFAULT_BASE_URL, AuthScheme::AnthropicKey)?;
        if !core.has_api_key() {
            tracing::warn!(provider = %name, "no API key configured; requests will be unauthenticated");
        }
        Ok(Self {
            core,
            default_model: config.default_model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
        })
    }
}

#[async_trait]
impl ProviderTransport for AnthropicTransport {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat_completion(&self, request: &ChatRequest) -> Result<RawResponse, LlmError> {
        let request = request.validated()?;
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = AnthropicRequest::new(&request, model);
        if body.messages.is_empty() {
            return Err(LlmError::InvalidRequest(
                "at least one user or assistant message is required".to_owned(),
            ));
        }

        let response: AnthropicResponse = self
            .core
            .with_retries(|| self.core.post_json(MESSAGES_PATH, &body))
            .await?;

        Ok(response.into_raw(model))
    }

    async fn health_check(&self, force: bool) -> HealthStatus {
        if force {
            return self.core.probe(&[MODELS_PATH], true).await;
        }
        if self.core.has_api_key() {
            HealthStatus::healthy(self.core.name())
        } else {
            HealthStatus::unhealthy(self.core.name(), "no API key configured")
        }
    }

    async fn get_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        Ok(KNOWN_MODELS
            .iter()
            .map(|id| ModelInfo {
                id: (*id).to_owned(),
                owned_by: Some("anthropic".to_owned()),
            })
            .collect())
    }

    fn get_stats(&self) -> UsageStats {
        self.core.stats()
    }

    async fn close(&self) {
        self.core.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use secrecy::SecretString;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::backoff::RecordingSleeper;
    use crate::types::ChatMessage;

    fn transport(server: &MockServer) -> AnthropicTransport {
        let mut config = ProviderConfig::new(ProviderKind::Anthropic);
        config.base_url = Some(format!("{}/v1", server.uri()).parse().unwrap());
        config.api_key = Some(SecretString::from("ak-test".to_owned()));

        let options = TransportOptions {
            timeout: Duration::from_secs(5),
            retry_delay: Duration::ZERO,
            sleeper: Arc::new(RecordingSleeper::new()),
            caller_retries: false,
        };
        AnthropicTransport::new("anthropic", &config, &options).unwrap()
    }

    #[tokio::test]
    async fn maps_messages_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "claude-3-5-haiku-latest",
                "content": [{"type": "text", "text": "bullish"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 12, "output_tokens": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ChatRequest::new(vec![
            ChatMessage::system("You are an analyst"),
            ChatMessage::user("BTC outlook?"),
        ]);
        let response = transport(&server).chat_completion(&request).await.unwrap();

        assert_eq!(response.content, "bullish");
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.total(), 13);
    }

    #[tokio::test]
    async fn system_only_request_is_invalid() {
        let server = MockServer::start().await;
        let request = ChatRequest::new(vec![ChatMessage::system("rules")]);
        let err = transport(&server).chat_completion(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn models_are_static() {
        let server = MockServer::start().await;
        let models = transport(&server).get_models().await.unwrap();
        assert!(models.iter().any(|m| m.id == DEFAULT_MODEL));
    }
}
