//! Self-hosted OpenAI-compatible inference server

use alpharoute_config::{ProviderConfig, ProviderKind};
use async_trait::async_trait;

use super::{AuthScheme, HttpCore, ProviderTransport, TransportOptions};
use crate::error::LlmError;
use crate::protocol::{OpenAiChatRequest, OpenAiChatResponse, OpenAiModelList};
use crate::types::{ChatRequest, HealthStatus, ModelInfo, RawResponse, UsageStats};

/// Server root used when no base URL is configured
const DEFAULT_BASE_URL: &str = "http://localhost:8000";

const DEFAULT_MODEL: &str = "gpt-oss-20b";

const CHAT_PATH: &str = "v1/chat/completions";

const MODELS_PATH: &str = "v1/models";

/// Health endpoints tried in order, relative to the server root
const HEALTH_PATHS: [&str; 3] = ["health", "v1/health", "v1/models"];

/// Transport for the self-hosted server
///
/// Retries 429 and 5xx responses itself with exponential backoff.
#[derive(Debug)]
pub struct GptOssTransport {
    core: HttpCore,
    default_model: String,
}

impl GptOssTransport {
    /// Create from provider configuration
    ///
    /// # Errors
    ///
    /// `Configuration` if the base URL is invalid
    pub fn new(name: &str, config: &ProviderConfig, options: &TransportOptions) -> Result<Self, LlmError> {
        let core = HttpCore::new(name, config, options, DEFAULT_BASE_URL, AuthScheme::Bearer)?;
        Ok(Self {
            core,
            default_model: config.default_model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
        })
    }
}

#[async_trait]
impl ProviderTransport for GptOssTransport {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GptOss
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

    async fn health_check(&self, force: bool) -> HealthStatus {
        self.core.probe(&HEALTH_PATHS, force).await
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
