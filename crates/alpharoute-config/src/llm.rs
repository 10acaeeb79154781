use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::routing::PrivacyTier;

/// Unified LLM client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider used when intelligent routing is disabled
    #[serde(default)]
    pub provider: Option<String>,
    /// Providers in the order they should be tried. Empty means
    /// self-hosted first, then the hosted providers.
    #[serde(default)]
    pub provider_priority: Vec<String>,
    /// Route through the task router instead of the static priority list
    #[serde(default = "default_true")]
    pub enable_intelligent_routing: bool,
    /// Fail over to another provider once retries are exhausted
    #[serde(default = "default_true")]
    pub fallback_on_error: bool,
    /// Attempts per provider inside one `analyze` call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry delay in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// How long provider health results stay fresh, in seconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Distinct providers tried per call
    #[serde(default = "default_max_failover_providers")]
    pub max_failover_providers: usize,
    /// Provider configurations keyed by name
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            provider_priority: Vec::new(),
            enable_intelligent_routing: true,
            fallback_on_error: true,
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            health_check_interval: default_health_check_interval(),
            timeout: default_timeout(),
            max_failover_providers: default_max_failover_providers(),
            providers: IndexMap::new(),
        }
    }
}

impl LlmConfig {
    /// Base retry delay as a `Duration`
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    /// Health cache freshness window
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval)
    }

    /// Request timeout
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Effective provider priority
    ///
    /// Uses the configured list when present, otherwise orders the
    /// configured providers by kind: self-hosted, hosted-A, hosted-B.
    pub fn effective_priority(&self) -> Vec<String> {
        if !self.provider_priority.is_empty() {
            return self.provider_priority.clone();
        }

        let mut names: Vec<(&String, &ProviderConfig)> = self.providers.iter().collect();
        names.sort_by_key(|(_, p)| p.kind.preference_rank());
        names.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Configuration for a single provider transport
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Wire protocol spoken by the provider
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// API key for hosted providers
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Model used when a request does not name one
    #[serde(default)]
    pub default_model: Option<String>,
    /// Transport-level retries. Defaults to 3 for self-hosted, 0 for hosted.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Idle pooled connections kept per host
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,
    /// Per-model pricing, in USD per 1K tokens
    #[serde(default)]
    pub pricing: IndexMap<String, ModelPricing>,
}

impl ProviderConfig {
    /// Minimal configuration for a provider kind
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            base_url: None,
            default_model: None,
            max_retries: None,
            pool_max_idle: default_pool_max_idle(),
            pricing: IndexMap::new(),
        }
    }

    /// Transport-level retry budget
    pub fn transport_retries(&self) -> u32 {
        self.max_retries.unwrap_or(match self.kind {
            ProviderKind::GptOss => 3,
            ProviderKind::Openai | ProviderKind::Anthropic => 0,
        })
    }
}

/// Supported provider protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    /// Self-hosted OpenAI-compatible inference server
    GptOss,
    /// Hosted `OpenAI` API
    Openai,
    /// Hosted Anthropic Messages API
    Anthropic,
}

impl ProviderKind {
    /// Fallback order when no priority is configured
    pub const fn preference_rank(self) -> u8 {
        match self {
            Self::GptOss => 0,
            Self::Openai => 1,
            Self::Anthropic => 2,
        }
    }

    /// Where this provider processes data
    pub const fn privacy_tier(self) -> PrivacyTier {
        match self {
            Self::GptOss => PrivacyTier::Local,
            Self::Openai | Self::Anthropic => PrivacyTier::Cloud,
        }
    }
}

/// Token pricing for one model
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    /// USD per 1K input tokens
    pub input_per_1k: f64,
    /// USD per 1K output tokens
    pub output_per_1k: f64,
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_retries() -> u32 {
    3
}

#[allow(clippy::missing_const_for_fn)]
fn default_retry_delay() -> f64 {
    1.0
}

#[allow(clippy::missing_const_for_fn)]
fn default_health_check_interval() -> u64 {
    60
}

#[allow(clippy::missing_const_for_fn)]
fn default_timeout() -> u64 {
    60
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_failover_providers() -> usize {
    2
}

#[allow(clippy::missing_const_for_fn)]
fn default_pool_max_idle() -> usize {
    10
}
