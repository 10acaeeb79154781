//! Programmatic configuration builder for integration tests

use std::collections::BTreeMap;
use std::sync::Arc;

use alpharoute_config::{BenchmarkConfig, Config, ModelCapabilityConfig, ProviderConfig, ProviderKind};
use alpharoute_llm::{RecordingSleeper, RouterContext};
use alpharoute_routing::{InMemoryCapabilityStore, InMemoryTaskStore};
use secrecy::SecretString;

/// Model every mock provider serves
pub const MOCK_MODEL: &str = "mock-model";

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with fast, retry-friendly defaults
    pub fn new() -> Self {
        let mut config = Config::default();
        config.llm.max_retries = 2;
        config.llm.retry_delay = 0.0;
        config.llm.timeout = 5;
        config.benchmark = BenchmarkConfig {
            default_timeout_seconds: 5,
            max_retries: 1,
            max_concurrent: 2,
            pass_threshold: 0.6,
        };
        Self { config }
    }

    /// Add a self-hosted provider pointed at a mock backend's root
    pub fn with_local_provider(self, name: &str, base_url: &str) -> Self {
        self.with_provider(name, ProviderKind::GptOss, base_url, None)
    }

    /// Add a hosted OpenAI provider pointed at a mock backend's `/v1`
    pub fn with_hosted_provider(self, name: &str, api_base_url: &str) -> Self {
        self.with_provider(name, ProviderKind::Openai, api_base_url, Some("test-key"))
    }

    fn with_provider(mut self, name: &str, kind: ProviderKind, base_url: &str, api_key: Option<&str>) -> Self {
        let mut provider = ProviderConfig::new(kind);
        provider.base_url = Some(base_url.parse().expect("valid URL"));
        provider.api_key = api_key.map(|k| SecretString::from(k.to_owned()));
        provider.default_model = Some(MOCK_MODEL.to_owned());
        self.config.llm.providers.insert(name.to_owned(), provider);
        self
    }

    /// Seed a capability descriptor for `provider`'s mock model
    pub fn with_model(mut self, provider: &str, capability_score: f64, cost_per_1k: f64) -> Self {
        self.config.routing.models.push(ModelCapabilityConfig {
            provider: provider.to_owned(),
            model: MOCK_MODEL.to_owned(),
            privacy_tier: None,
            cost_per_1k_input: cost_per_1k,
            cost_per_1k_output: cost_per_1k,
            avg_latency_ms: 500.0,
            capability_score,
            is_available: true,
            category_scores: BTreeMap::new(),
        });
        self
    }

    /// Use static provider order instead of the task router
    pub fn legacy_routing(mut self) -> Self {
        self.config.llm.enable_intelligent_routing = false;
        self
    }

    /// Attempts per provider
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.llm.max_retries = max_retries;
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.config.llm.fallback_on_error = false;
        self
    }

    pub fn health_check_interval(mut self, seconds: u64) -> Self {
        self.config.llm.health_check_interval = seconds;
        self
    }

    /// Build the final config
    pub fn build(self) -> Config {
        self.config.validate().expect("valid test config");
        self.config
    }
}

/// Context over seeded in-memory stores that never sleeps between retries
pub fn context(config: Config) -> RouterContext {
    RouterContext::builder(config.clone())
        .capabilities(Arc::new(InMemoryCapabilityStore::from_config(&config)))
        .tasks(Arc::new(InMemoryTaskStore::from_config(&config)))
        .sleeper(Arc::new(RecordingSleeper::new()))
        .build()
        .expect("context builds")
}
