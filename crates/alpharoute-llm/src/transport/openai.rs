//! Hosted `OpenAI` API

use alpharoute_config::{ProviderConfig, ProviderKind};
use async_trait::async_trait;

use super::{AuthScheme, HttpCore, ProviderTransport, TransportOptions};
use crate::error::LlmError;
use crate::protocol::{OpenAiChatRequest, OpenAiChatResponse, OpenAiModelList};
use crate::types::{ChatRequest, HealthStatus, ModelInfo, RawResponse, UsageStats};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_MODEL: &str = "gpt-4o-mini";

const CHAT_PATH: &str = "chat/completions";

const MODELS_PATH: &str = "models";

/// Transport for the hosted `OpenAI` API
///
/// Makes a single attempt per call unless `max_retries` is configured;
/// the unified client owns retries for hosted providers.
#[derive(Debug)]
pub struct OpenAiTransport {
    core: HttpCore,
    default_model: String,
}

impl OpenAiTransport {
    /// Create from provider configuration
    ///
    /// # Errors
    ///
    /// `Configuration` if the base URL is invalid
    pub fn new(name: &str, config: &ProviderConfig, options: &TransportOptions) -> Result<Self, LlmError> {
        let core = HttpCore::new(name, config, options, DEFAULT_BASE_URL, AuthScheme::Bearer)?;
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
impl ProviderTransport for OpenAiTransport {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
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
        let body = OpenAiChatRequest::new(&request, model);

        let response: OpenAiChatResponse = self
            .core
            .with_retries(|| self.core.post_json(CHAT_PATH, &body))
            .await?;

        response.into_raw(model).ok_or_else(|| LlmError::ProviderApi {
            status: 200,
            message: "response contained no choices".to_owned(),
        })
    }

    /// Healthy when a key is configured; `force` lists models live
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
        let list: OpenAiModelList = self.core.get_json(MODELS_PATH).await?;
        Ok(list.data)
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
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::backoff::RecordingSleeper;
    use crate::types::ChatMessage;

    fn transport(server: &MockServer, key: Option<&str>) -> OpenAiTransport {
        let mut config = ProviderConfig::new(ProviderKind::Openai);
        config.base_url = Some(format!("{}/v1", server.uri()).parse().unwrap());
        config.api_key = key.map(|k| SecretString::from(k.to_owned()));

        let options = TransportOptions {
            timeout: Duration::from_secs(5),
            retry_delay: Duration::ZERO,
            sleeper: Arc::new(RecordingSleeper::new()),
            caller_retries: false,
        };
        OpenAiTransport::new("openai", &config, &options).unwrap()
    }

    #[tokio::test]
    async fn sends_bearer_auth_and_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{"message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(&server, Some("sk-test"));
        let response = transport
            .chat_completion(&ChatRequest::new(vec![ChatMessage::user("hello")]))
            .await
            .unwrap();

        assert_eq!(response.content, "hi");
        assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn hosted_transport_does_not_retry_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(&server, Some("sk-test"));
        let err = transport
            .chat_completion(&ChatRequest::new(vec![ChatMessage::user("hello")]))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::ProviderApi { status: 502, .. }));
        assert_eq!(transport.get_stats().request_count, 1);
    }

    #[tokio::test]
    async fn health_without_force_skips_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        assert!(transport(&server, Some("sk-test")).health_check(false).await.healthy);
        assert!(!transport(&server, None).health_check(false).await.healthy);
    }

    #[tokio::test]
    async fn forced_health_lists_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let status = transport(&server, Some("sk-test")).health_check(true).await;
        assert!(status.healthy);
    }
}
