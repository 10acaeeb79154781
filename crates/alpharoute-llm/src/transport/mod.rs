//! Provider transports
//!
//! One implementation per provider kind behind [`ProviderTransport`]. The
//! shared [`HttpCore`] owns the pooled client, counters, retry loop and
//! health cache.

pub mod anthropic;
pub mod gpt_oss;
pub mod openai;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use alpharoute_config::{LlmConfig, ProviderConfig, ProviderKind};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use url::Url;

pub use anthropic::AnthropicTransport;
pub use gpt_oss::GptOssTransport;
pub use openai::OpenAiTransport;

use crate::backoff::{self, Sleeper, TokioSleeper};
use crate::error::LlmError;
use crate::types::{ChatRequest, HealthStatus, ModelInfo, RawResponse, UsageStats};

/// Per-probe timeout for health endpoints
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a transport reuses its last health result
pub const HEALTH_CACHE_TTL: Duration = Duration::from_secs(60);

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 500;

/// Reliable access to exactly one provider backend
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Wire protocol spoken by this transport
    fn kind(&self) -> ProviderKind;

    /// Configured provider name
    fn name(&self) -> &str;

    /// Model used when a request names none
    fn default_model(&self) -> &str;

    /// Send a chat completion, retrying transient failures
    async fn chat_completion(&self, request: &ChatRequest) -> Result<RawResponse, LlmError>;

    /// Probe health, served from cache unless `force`
    async fn health_check(&self, force: bool) -> HealthStatus;

    /// Models the provider advertises
    async fn get_models(&self) -> Result<Vec<ModelInfo>, LlmError>;

    /// Attempt counters
    fn get_stats(&self) -> UsageStats;

    /// Release the pooled connection; idempotent
    async fn close(&self);
}

/// Settings shared by every transport built from one configuration
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Bound on one HTTP exchange, body included
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub sleeper: Arc<dyn Sleeper>,
    /// The caller retries failed calls itself; transports then retry only
    /// when a provider sets `max_retries` explicitly
    pub caller_retries: bool,
}

impl TransportOptions {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retry_delay: config.retry_delay(),
            sleeper: Arc::new(TokioSleeper),
            caller_retries: false,
        }
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub const fn with_caller_retries(mut self) -> Self {
        self.caller_retries = true;
        self
    }

    /// Internal retry budget for one provider
    pub fn retries_for(&self, config: &ProviderConfig) -> u32 {
        if self.caller_retries {
            config.max_retries.unwrap_or(0)
        } else {
            config.transport_retries()
        }
    }
}

/// Build the transport matching a provider's kind
///
/// # Errors
///
/// `Configuration` when the base URL cannot be resolved
pub fn build_transport(
    name: &str,
    config: &ProviderConfig,
    options: &TransportOptions,
) -> Result<Arc<dyn ProviderTransport>, LlmError> {
    let transport: Arc<dyn ProviderTransport> = match config.kind {
        ProviderKind::GptOss => Arc::new(GptOssTransport::new(name, config, options)?),
        ProviderKind::Openai => Arc::new(OpenAiTransport::new(name, config, options)?),
        ProviderKind::Anthropic => Arc::new(AnthropicTransport::new(name, config, options)?),
    };
    Ok(transport)
}

/// How a transport authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    None,
    Bearer,
    /// `x-api-key` plus the Anthropic version header
    AnthropicKey,
}

/// HTTP plumbing shared by all transports
pub struct HttpCore {
    name: String,
    base_url: Url,
    api_key: Option<SecretString>,
    auth: AuthScheme,
    timeout: Duration,
    pool_max_idle: usize,
    max_retries: u32,
    retry_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
    /// Created on first use, dropped by `close`
    client: Mutex<Option<Client>>,
    request_count: AtomicU64,
    retry_count: AtomicU64,
    error_count: AtomicU64,
    health: std::sync::Mutex<Option<(Instant, HealthStatus)>>,
}

impl HttpCore {
    /// Resolve the base URL and capture settings
    ///
    /// # Errors
    ///
    /// `Configuration` if `default_base_url` does not parse
    pub fn new(
        name: &str,
        config: &ProviderConfig,
        options: &TransportOptions,
        default_base_url: &str,
        auth: AuthScheme,
    ) -> Result<Self, LlmError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(default_base_url)
                .map_err(|e| LlmError::Configuration(format!("invalid base URL for '{name}': {e}")))?,
        };

        Ok(Self {
            name: name.to_owned(),
            base_url,
            api_key: config.api_key.clone(),
            auth,
            timeout: options.timeout,
            pool_max_idle: config.pool_max_idle,
            max_retries: options.retries_for(config),
            retry_delay: options.retry_delay,
            sleeper: Arc::clone(&options.sleeper),
            client: Mutex::new(None),
            request_count: AtomicU64::new(0),
            retry_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            health: std::sync::Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The pooled client, created on first use
    pub async fn client(&self) -> Result<Client, LlmError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(self.pool_max_idle)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client for '{}': {e}", self.name)))?;

        tracing::debug!(provider = %self.name, base_url = %self.base_url, "HTTP client created");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Drop the pooled client; the next call builds a fresh one
    pub async fn close(&self) {
        if self.client.lock().await.take().is_some() {
            tracing::debug!(provider = %self.name, "HTTP client closed");
        }
    }

    /// Absolute URL for a path below the base URL
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{}", path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let Some(key) = &self.api_key else {
            return builder;
        };
        match self.auth {
            AuthScheme::None => builder,
            AuthScheme::Bearer => builder.bearer_auth(key.expose_secret()),
            AuthScheme::AnthropicKey => builder
                .header("x-api-key", key.expose_secret())
                .header("anthropic-version", anthropic::API_VERSION),
        }
    }

    /// One POST attempt; counted in the stats
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let client = self.client().await?;
        let request = self.authorize(client.post(self.endpoint(path)).json(body));
        self.attempt(request).await
    }

    /// One GET attempt; counted in the stats
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, LlmError> {
        let client = self.client().await?;
        let request = self.authorize(client.get(self.endpoint(path)));
        self.attempt(request).await
    }

    async fn attempt<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, LlmError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        // headers and body share one deadline
        let exchange = async {
            let response = request.send().await.map_err(LlmError::from)?;
            read_json(response).await
        };
        let result = tokio::time::timeout(self.timeout, exchange)
            .await
            .unwrap_or(Err(LlmError::Timeout));

        if let Err(e) = &result {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(provider = %self.name, error = %e, "provider attempt failed");
        }
        result
    }

    /// Run `op`, retrying retryable failures up to the transport budget
    pub async fn with_retries<T, F, Fut>(&self, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, LlmError>> + Send,
    {
        let mut attempt = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let Some(kind) = error.retry_kind() else {
                return Err(error);
            };
            if attempt >= self.max_retries {
                tracing::warn!(provider = %self.name, attempts = attempt + 1, error = %error, "retries exhausted");
                return Err(error);
            }

            let wait = backoff::delay_with_hint(self.retry_delay, attempt, kind, error.retry_after());
            self.retry_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                provider = %self.name,
                attempt = attempt + 1,
                delay_ms = wait.as_millis(),
                error = %error,
                "retrying provider request"
            );
            self.sleeper.sleep(wait).await;
            attempt += 1;
        }
    }

    pub fn stats(&self) -> UsageStats {
        let request_count = self.request_count.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);
        let success_rate = if request_count == 0 {
            0.0
        } else {
            request_count.saturating_sub(error_count) as f64 / request_count as f64
        };

        UsageStats {
            request_count,
            retry_count: self.retry_count.load(Ordering::Relaxed),
            error_count,
            success_rate,
        }
    }

    fn cached_health(&self) -> Option<HealthStatus> {
        let cache = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|(at, _)| at.elapsed() < HEALTH_CACHE_TTL)
            .map(|(_, status)| HealthStatus {
                cached: true,
                ..status.clone()
            })
    }

    fn store_health(&self, status: &HealthStatus) {
        *self.health.lock().unwrap_or_else(PoisonError::into_inner) = Some((Instant::now(), status.clone()));
    }

    /// Probe `paths` in order; the first 200 wins
    ///
    /// Results are cached for [`HEALTH_CACHE_TTL`] unless `force` is set.
    pub async fn probe(&self, paths: &[&str], force: bool) -> HealthStatus {
        if !force && let Some(cached) = self.cached_health() {
            return cached;
        }

        let status = self.probe_uncached(paths).await;
        self.store_health(&status);
        status
    }

    async fn probe_uncached(&self, paths: &[&str]) -> HealthStatus {
        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => return HealthStatus::unhealthy(&self.name, e.to_string()),
        };

        let mut last_error = None;
        for path in paths {
            let url = self.endpoint(path);
            let started = Instant::now();
            let request = self.authorize(client.get(&url));

            match tokio::time::timeout(PROBE_TIMEOUT, request.send()).await {
                Ok(Ok(response)) if response.status() == StatusCode::OK => {
                    return HealthStatus {
                        endpoint: Some(url),
                        latency_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
                        ..HealthStatus::healthy(&self.name)
                    };
                }
                Ok(Ok(response)) => last_error = Some(format!("{url} returned {}", response.status())),
                Ok(Err(e)) => last_error = Some(format!("{url}: {e}")),
                Err(_) => last_error = Some(format!("{url}: timed out")),
            }
        }

        let error = last_error.unwrap_or_else(|| "no health endpoints".to_owned());
        tracing::warn!(provider = %self.name, %error, "health probe failed");
        HealthStatus::unhealthy(&self.name, error)
    }
}

impl std::fmt::Debug for HttpCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCore")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("auth", &self.auth)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Map a response to a parsed body or a classified error
async fn read_json<R: DeserializeOwned>(response: Response) -> Result<R, LlmError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64);
        return Err(LlmError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::ProviderApi {
            status: status.as_u16(),
            message: body.chars().take(MAX_ERROR_BODY).collect(),
        });
    }

    response.json::<R>().await.map_err(|e| {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::ProviderApi {
                status: status.as_u16(),
                message: format!("failed to parse response: {e}"),
            }
        }
    })
}
