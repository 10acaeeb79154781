//! Process-wide dependency root

use std::sync::Arc;

use alpharoute_config::{Config, StrategyPreset};
use alpharoute_routing::{
    HealthCache, InMemoryCapabilityStore, InMemoryTaskStore, ModelCapabilityStore, PerformanceFeedback, RoutingError,
    TaskMetadataStore, TaskRouter, WeightAdjustment,
};

use crate::backoff::Sleeper;
use crate::client::LlmClient;
use crate::error::LlmError;

/// Everything an analysis or benchmark run needs, built once at startup
///
/// The client, router and feedback loop share one health cache and one
/// pair of stores.
#[derive(Clone)]
pub struct RouterContext {
    config: Arc<Config>,
    capabilities: Arc<dyn ModelCapabilityStore>,
    tasks: Arc<dyn TaskMetadataStore>,
    health: Arc<HealthCache>,
    router: Arc<TaskRouter>,
    feedback: Arc<PerformanceFeedback>,
    client: Arc<LlmClient>,
}

impl RouterContext {
    /// Build with in-memory stores seeded from the configuration
    ///
    /// # Errors
    ///
    /// `Configuration` if a provider's transport cannot be built
    pub fn from_config(config: Config) -> Result<Self, LlmError> {
        let capabilities = Arc::new(InMemoryCapabilityStore::from_config(&config));
        let tasks = Arc::new(InMemoryTaskStore::from_config(&config));
        Self::builder(config)
            .capabilities(capabilities)
            .tasks(tasks)
            .build()
    }

    pub fn builder(config: Config) -> RouterContextBuilder {
        RouterContextBuilder {
            config,
            capabilities: None,
            tasks: None,
            sleeper: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn capabilities(&self) -> &Arc<dyn ModelCapabilityStore> {
        &self.capabilities
    }

    pub fn tasks(&self) -> &Arc<dyn TaskMetadataStore> {
        &self.tasks
    }

    pub const fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    pub const fn router(&self) -> &Arc<TaskRouter> {
        &self.router
    }

    pub const fn feedback(&self) -> &Arc<PerformanceFeedback> {
        &self.feedback
    }

    pub const fn client(&self) -> &Arc<LlmClient> {
        &self.client
    }

    /// Suggest weights for a preset from recent feedback and apply them
    ///
    /// The live preset only changes when the suggestion differs from it.
    ///
    /// # Errors
    ///
    /// `InvalidWeights` if the suggested weights cannot be applied
    pub fn tune_strategy(&self, strategy: StrategyPreset) -> Result<WeightAdjustment, RoutingError> {
        let current = self.router.strategy_weights(strategy);
        let adjustment = self.feedback.suggest_weight_adjustments(current, strategy, None);

        if adjustment.weights == current {
            tracing::debug!(%strategy, reasons = ?adjustment.reasons, "routing weights unchanged");
        } else {
            self.router.apply_weight_adjustments(strategy, adjustment.weights)?;
        }
        Ok(adjustment)
    }

    /// Release provider connections
    pub async fn shutdown(&self) {
        self.client.close().await;
    }
}

impl std::fmt::Debug for RouterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterContext")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RouterContext`] with replaceable stores
pub struct RouterContextBuilder {
    config: Config,
    capabilities: Option<Arc<dyn ModelCapabilityStore>>,
    tasks: Option<Arc<dyn TaskMetadataStore>>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl RouterContextBuilder {
    #[must_use]
    pub fn capabilities(mut self, store: Arc<dyn ModelCapabilityStore>) -> Self {
        self.capabilities = Some(store);
        self
    }

    #[must_use]
    pub fn tasks(mut self, store: Arc<dyn TaskMetadataStore>) -> Self {
        self.tasks = Some(store);
        self
    }

    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Wire the stores, router, feedback loop and client together
    ///
    /// Missing stores start empty.
    ///
    /// # Errors
    ///
    /// `Configuration` if a provider's transport cannot be built
    pub fn build(self) -> Result<RouterContext, LlmError> {
        let config = Arc::new(self.config);
        let capabilities = self
            .capabilities
            .unwrap_or_else(|| Arc::new(InMemoryCapabilityStore::new()));
        let tasks = self.tasks.unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let health = Arc::new(HealthCache::new(config.llm.health_check_interval()));

        let router = Arc::new(TaskRouter::new(
            &config.routing,
            Arc::clone(&capabilities),
            Arc::clone(&tasks),
            Arc::clone(&health),
        ));
        let feedback = Arc::new(PerformanceFeedback::new(config.routing.feedback.clone()));

        let mut client = LlmClient::builder(config.llm.clone())
            .router(Arc::clone(&router))
            .feedback(Arc::clone(&feedback))
            .health(Arc::clone(&health));
        if let Some(sleeper) = self.sleeper {
            client = client.sleeper(sleeper);
        }

        Ok(RouterContext {
            client: Arc::new(client.build()?),
            config,
            capabilities,
            tasks,
            health,
            router,
            feedback,
        })
    }
}

#[cfg(test)]
mod tests {
    use alpharoute_config::{ProviderConfig, ProviderKind};
    use alpharoute_routing::{ExecutionFeedback, RoutingWeights};

    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config
            .llm
            .providers
            .insert("local".to_owned(), ProviderConfig::new(ProviderKind::GptOss));
        config
    }

    #[test]
    fn components_share_health_state() {
        let context = RouterContext::from_config(config()).unwrap();
        context.health().mark_unhealthy("local");

        assert!(!context.router().health().is_healthy("local"));
        assert!(!context.client().health().is_healthy("local"));
    }

    #[test]
    fn tuning_without_feedback_keeps_weights() {
        let context = RouterContext::from_config(config()).unwrap();
        let adjustment = context.tune_strategy(StrategyPreset::Balanced).unwrap();

        assert_eq!(adjustment.weights, RoutingWeights::balanced());
        assert!(adjustment.reasons[0].contains("insufficient data"));
    }

    #[test]
    fn tuning_applies_suggested_weights() {
        let mut config = config();
        config.routing.feedback.min_samples = 3;
        let context = RouterContext::from_config(config).unwrap();

        for _ in 0..3 {
            context.feedback().record_execution_feedback(ExecutionFeedback {
                decision_id: None,
                provider: "local".to_owned(),
                model_id: "gpt-oss-20b".to_owned(),
                task_type: "analysis".to_owned(),
                strategy: Some(StrategyPreset::Balanced),
                predicted_cost: 0.01,
                actual_cost: 0.05,
                predicted_latency_ms: 1000.0,
                actual_latency_ms: 1000.0,
                predicted_quality: 0.8,
                actual_quality: Some(0.8),
                execution_success: true,
                recorded_at: jiff::Timestamp::now(),
            });
        }

        let adjustment = context.tune_strategy(StrategyPreset::Balanced).unwrap();
        let live = context.router().strategy_weights(StrategyPreset::Balanced);

        assert!(adjustment.weights.cost < RoutingWeights::balanced().cost);
        assert!((live.cost - adjustment.weights.cost).abs() < 1e-9);
    }
}
