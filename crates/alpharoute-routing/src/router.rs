//! Weighted multi-criteria task router
//!
//! Ranks every available (provider, model) pair that survives the hard
//! constraints and returns the winner with ranked fallbacks.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use alpharoute_config::{PrivacyTier, RoutingConfig, StrategyPreset};
use strum::IntoEnumIterator;

use crate::descriptor::{CapabilityFilter, ModelCapabilityStore, ProviderDescriptor};
use crate::error::RoutingError;
use crate::health::HealthCache;
use crate::request::{Priority, RoutingRequest};
use crate::scoring::{ScoreBreakdown, ScoringContext, score_candidate};
use crate::task::{TaskMetadata, TaskMetadataStore};
use crate::weights::RoutingWeights;
use crate::RoutingDecision;

/// Capability score a model needs to count as high quality
pub const HIGH_QUALITY_THRESHOLD: f64 = 0.7;

/// Routes tasks to models using the capability and task stores
pub struct TaskRouter {
    capabilities: Arc<dyn ModelCapabilityStore>,
    tasks: Arc<dyn TaskMetadataStore>,
    health: Arc<HealthCache>,
    /// Live preset table, adjusted by the feedback loop
    strategies: RwLock<HashMap<StrategyPreset, RoutingWeights>>,
    default_strategy: StrategyPreset,
    max_fallbacks: usize,
    ambiguity_margin: f64,
    unhealthy_decay: Duration,
    output_ratio: f64,
}

/// Where the weights for one decision came from
#[derive(Debug, Clone, Copy)]
enum WeightSource {
    Custom,
    TaskWeights,
    Preset(StrategyPreset),
}

impl TaskRouter {
    /// Build a router over shared stores and health state
    pub fn new(
        config: &RoutingConfig,
        capabilities: Arc<dyn ModelCapabilityStore>,
        tasks: Arc<dyn TaskMetadataStore>,
        health: Arc<HealthCache>,
    ) -> Self {
        let strategies = StrategyPreset::iter()
            .map(|preset| (preset, RoutingWeights::preset(preset)))
            .collect();

        Self {
            capabilities,
            tasks,
            health,
            strategies: RwLock::new(strategies),
            default_strategy: config.default_strategy,
            max_fallbacks: config.max_fallbacks,
            ambiguity_margin: config.ambiguity_margin,
            unhealthy_decay: Duration::from_secs(config.unhealthy_decay_seconds),
            output_ratio: config.default_output_ratio,
        }
    }

    /// The capability store this router reads
    pub fn capabilities(&self) -> &Arc<dyn ModelCapabilityStore> {
        &self.capabilities
    }

    /// The task store this router reads
    pub fn tasks(&self) -> &Arc<dyn TaskMetadataStore> {
        &self.tasks
    }

    /// The health cache consulted for availability
    pub const fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    /// Current weights for a preset
    pub fn strategy_weights(&self, preset: StrategyPreset) -> RoutingWeights {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&preset)
            .copied()
            .unwrap_or_else(|| RoutingWeights::preset(preset))
    }

    /// Replace the live weights of a preset
    ///
    /// The only path by which preset weights change at runtime.
    pub fn apply_weight_adjustments(&self, preset: StrategyPreset, weights: RoutingWeights) -> Result<(), RoutingError> {
        weights.validate()?;
        let normalized = weights.normalized();
        tracing::info!(strategy = %preset, weights = ?normalized, "routing weights adjusted");
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(preset, normalized);
        Ok(())
    }

    /// Expected output tokens for a given input size
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn expected_output_tokens(&self, input_tokens: usize) -> usize {
        (input_tokens as f64 * self.output_ratio.max(0.0)).ceil() as usize
    }

    /// Pick a model for a request
    ///
    /// # Errors
    ///
    /// `NoProfiles` when the store is empty, `NoCandidates` when every model
    /// is excluded, `InvalidWeights` for unusable custom weights, and store
    /// errors as reported by the stores.
    pub async fn route(&self, request: &RoutingRequest) -> Result<RoutingDecision, RoutingError> {
        let known = self.capabilities.list_model_capabilities(&CapabilityFilter::all()).await?;
        if known.is_empty() {
            return Err(RoutingError::NoProfiles);
        }

        let task = self.tasks.get_task_metadata(&request.task_type).await?;
        let privacy = request
            .privacy_requirement
            .or_else(|| task.as_ref().and_then(|t| t.privacy_requirement));
        let high_quality = request.requires_high_quality || task.as_ref().is_some_and(|t| t.requires_high_quality);

        let input_tokens = request.estimated_tokens;
        let output_tokens = self.expected_output_tokens(input_tokens);

        let mut exclusions = Exclusions::default();
        let mut candidates: Vec<ProviderDescriptor> = known
            .into_iter()
            .filter(|d| exclusions.admit(d, request, privacy, input_tokens, output_tokens))
            .collect();

        if candidates.is_empty() {
            let reason = exclusions.describe();
            tracing::warn!(task_type = %request.task_type, %reason, "no routing candidates");
            return Err(RoutingError::NoCandidates {
                task_type: request.task_type.clone(),
                reason,
            });
        }

        if high_quality && candidates.iter().any(|d| d.capability_score >= HIGH_QUALITY_THRESHOLD) {
            candidates.retain(|d| d.capability_score >= HIGH_QUALITY_THRESHOLD);
        }

        let (mut weights, source) = self.resolve_weights(request, task.as_ref());
        if request.priority == Priority::High {
            weights = weights.with_high_priority();
        }
        weights.validate()?;

        let ctx = ScoringContext::new(
            &candidates,
            input_tokens,
            output_tokens,
            privacy,
            &request.preferred_providers,
        );

        let mut scored: Vec<(ProviderDescriptor, ScoreBreakdown)> = candidates
            .into_iter()
            .map(|d| {
                let availability = self.health.availability(&d.provider, self.unhealthy_decay);
                let breakdown = score_candidate(&d, &ctx, availability, &weights);
                (d, breakdown)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.composite
                .partial_cmp(&a.1.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut ranked = scored.into_iter();
        let (winner, scores) = ranked.next().ok_or(RoutingError::NoProfiles)?;
        let rest: Vec<(ProviderDescriptor, ScoreBreakdown)> = ranked.collect();

        let runner_up = rest.first();
        let margin = runner_up.map_or(scores.composite, |(_, s)| scores.composite - s.composite);
        let confidence = self.confidence(scores.composite, margin);

        let strategy = match source {
            WeightSource::Preset(preset) => Some(preset),
            WeightSource::Custom | WeightSource::TaskWeights => None,
        };

        let reasoning = explain(
            &winner,
            &scores,
            runner_up,
            &weights,
            source,
            margin < self.ambiguity_margin && runner_up.is_some(),
            exclusions.total(),
        );

        let decision = RoutingDecision {
            decision_id: uuid::Uuid::new_v4(),
            task_type: request.task_type.clone(),
            selected_provider: winner.provider.clone(),
            selected_model: winner.model_id.clone(),
            strategy,
            weights: weights.normalized(),
            reasoning,
            confidence_score: confidence,
            expected_cost: winner.estimate_cost(input_tokens, output_tokens),
            expected_latency_ms: winner.avg_latency_ms,
            expected_quality_score: winner.capability_score,
            scores,
            fallback_options: rest
                .into_iter()
                .take(self.max_fallbacks)
                .map(|(d, _)| d)
                .collect(),
        };

        tracing::info!(
            task_type = %decision.task_type,
            provider = %decision.selected_provider,
            model = %decision.selected_model,
            confidence = decision.confidence_score,
            fallbacks = decision.fallback_options.len(),
            "routing decision"
        );

        Ok(decision)
    }

    /// Custom weights, then request strategy, then task weights, then task
    /// strategy, then the configured default
    fn resolve_weights(&self, request: &RoutingRequest, task: Option<&TaskMetadata>) -> (RoutingWeights, WeightSource) {
        if let Some(custom) = request.custom_weights {
            return (custom, WeightSource::Custom);
        }
        if let Some(preset) = request.strategy {
            return (self.strategy_weights(preset), WeightSource::Preset(preset));
        }
        if let Some(weights) = task.and_then(|t| t.default_weights) {
            return (weights, WeightSource::TaskWeights);
        }
        let preset = task
            .and_then(|t| t.default_strategy)
            .unwrap_or(self.default_strategy);
        (self.strategy_weights(preset), WeightSource::Preset(preset))
    }

    /// Winner's composite, discounted when the runner-up is close
    fn confidence(&self, composite: f64, margin: f64) -> f64 {
        let composite = composite.clamp(0.0, 1.0);
        if self.ambiguity_margin > 0.0 && margin < self.ambiguity_margin {
            let factor = 0.5 + margin.max(0.0) / (2.0 * self.ambiguity_margin);
            composite * factor
        } else {
            composite
        }
    }
}

impl std::fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRouter")
            .field("default_strategy", &self.default_strategy)
            .field("max_fallbacks", &self.max_fallbacks)
            .field("ambiguity_margin", &self.ambiguity_margin)
            .finish_non_exhaustive()
    }
}

/// Counts of models dropped by each hard constraint
#[derive(Debug, Default)]
struct Exclusions {
    unavailable: usize,
    privacy: usize,
    cost: usize,
    latency: usize,
}

impl Exclusions {
    fn admit(
        &mut self,
        d: &ProviderDescriptor,
        request: &RoutingRequest,
        privacy: Option<PrivacyTier>,
        input_tokens: usize,
        output_tokens: usize,
    ) -> bool {
        if !d.is_available {
            self.unavailable += 1;
            return false;
        }
        if let Some(required) = privacy
            && !d.privacy_tier.satisfies(required)
        {
            self.privacy += 1;
            return false;
        }
        if let Some(max) = request.max_acceptable_cost
            && d.estimate_cost(input_tokens, output_tokens) > max
        {
            self.cost += 1;
            return false;
        }
        if let Some(max) = request.max_acceptable_latency_ms
            && d.avg_latency_ms > max
        {
            self.latency += 1;
            return false;
        }
        true
    }

    const fn total(&self) -> usize {
        self.unavailable + self.privacy + self.cost + self.latency
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = [
            ("unavailable", self.unavailable),
            ("privacy requirement", self.privacy),
            ("cost ceiling", self.cost),
            ("latency ceiling", self.latency),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| format!("{n} excluded by {label}"))
        .collect();

        if parts.is_empty() {
            "no models matched".to_owned()
        } else {
            parts.join(", ")
        }
    }
}

/// Human-readable trace of why the winner won
fn explain(
    winner: &ProviderDescriptor,
    scores: &ScoreBreakdown,
    runner_up: Option<&(ProviderDescriptor, ScoreBreakdown)>,
    weights: &RoutingWeights,
    source: WeightSource,
    close_call: bool,
    excluded: usize,
) -> String {
    let w = weights.normalized();
    let strategy = match source {
        WeightSource::Custom => "custom weights".to_owned(),
        WeightSource::TaskWeights => "task weights".to_owned(),
        WeightSource::Preset(preset) => format!("{preset} strategy"),
    };

    let mut out = format!(
        "selected {} with composite {:.3} under {strategy}",
        winner.id(),
        scores.composite
    );

    let factors = [
        ("cost", w.cost, scores.cost),
        ("latency", w.latency, scores.latency),
        ("quality", w.quality, scores.quality),
        ("availability", w.availability, scores.availability),
        ("privacy", w.privacy, scores.privacy),
        ("user preference", w.user_preference, scores.user_preference),
    ];

    if let Some((other, other_scores)) = runner_up {
        let theirs = [
            other_scores.cost,
            other_scores.latency,
            other_scores.quality,
            other_scores.availability,
            other_scores.privacy,
            other_scores.user_preference,
        ];
        let favored: Vec<String> = factors
            .iter()
            .zip(theirs)
            .filter(|((_, weight, ours), theirs)| *weight > 0.0 && ours > theirs)
            .map(|((name, weight, ours), theirs)| format!("{name} (+{:.3})", weight * (ours - theirs)))
            .collect();

        let _ = write!(out, "; beat {} ({:.3})", other.id(), other_scores.composite);
        if !favored.is_empty() {
            let _ = write!(out, " on {}", favored.join(", "));
        }
    } else {
        let _ = write!(out, "; only candidate");
    }

    if close_call {
        let _ = write!(out, "; close call, confidence discounted");
    }
    if excluded > 0 {
        let _ = write!(out, "; {excluded} model(s) excluded by hard constraints");
    }
    out
}

#[cfg(test)]
mod tests {
    use alpharoute_config::ProviderKind;

    use super::*;
    use crate::descriptor::InMemoryCapabilityStore;
    use crate::task::InMemoryTaskStore;

    fn descriptor(provider: &str, kind: ProviderKind, model: &str, cost: f64, latency: f64, quality: f64) -> ProviderDescriptor {
        let mut d = ProviderDescriptor::new(provider, kind, model);
        d.cost_per_1k_input = cost;
        d.cost_per_1k_output = cost;
        d.avg_latency_ms = latency;
        d.capability_score = quality;
        d
    }

    async fn router_with(descriptors: Vec<ProviderDescriptor>) -> TaskRouter {
        let store = InMemoryCapabilityStore::new();
        for d in descriptors {
            store.register(d).await.unwrap();
        }
        TaskRouter::new(
            &RoutingConfig::default(),
            Arc::new(store),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(HealthCache::new(Duration::from_secs(60))),
        )
    }

    fn cost_heavy() -> RoutingWeights {
        RoutingWeights {
            cost: 0.8,
            latency: 0.1,
            quality: 0.1,
            ..RoutingWeights::default()
        }
    }

    #[tokio::test]
    async fn lower_cost_dominates_under_cost_weights() {
        let router = router_with(vec![
            descriptor("x", ProviderKind::Openai, "model-x", 0.001, 500.0, 0.9),
            descriptor("y", ProviderKind::Openai, "model-y", 0.0001, 2000.0, 0.6),
        ])
        .await;

        let request = RoutingRequest::new("analysis", 1000).with_weights(cost_heavy());
        let decision = router.route(&request).await.unwrap();

        assert_eq!(decision.selected_provider, "y");
        assert_eq!(decision.fallback_options.len(), 1);
        assert_eq!(decision.fallback_options[0].provider, "x");
        assert!(decision.strategy.is_none());
    }

    #[tokio::test]
    async fn local_requirement_excludes_better_cloud_model() {
        let router = router_with(vec![
            descriptor("cloud", ProviderKind::Openai, "big", 0.0, 100.0, 0.99),
            descriptor("local", ProviderKind::GptOss, "small", 0.0, 4000.0, 0.3),
        ])
        .await;

        let request = RoutingRequest::new("analysis", 500).with_privacy(PrivacyTier::Local);
        let decision = router.route(&request).await.unwrap();

        assert_eq!(decision.selected_provider, "local");
        assert!(decision.fallback_options.iter().all(|d| d.privacy_tier == PrivacyTier::Local));
    }

    #[tokio::test]
    async fn all_excluded_is_an_error() {
        let router = router_with(vec![descriptor("cloud", ProviderKind::Openai, "big", 0.01, 100.0, 0.9)]).await;

        let request = RoutingRequest::new("analysis", 500).with_privacy(PrivacyTier::Local);
        let err = router.route(&request).await.unwrap_err();
        match err {
            RoutingError::NoCandidates { task_type, reason } => {
                assert_eq!(task_type, "analysis");
                assert!(reason.contains("privacy"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_store_has_no_profiles() {
        let router = router_with(vec![]).await;
        let err = router.route(&RoutingRequest::new("analysis", 10)).await.unwrap_err();
        assert!(matches!(err, RoutingError::NoProfiles));
    }

    #[tokio::test]
    async fn ceilings_exclude_models() {
        let router = router_with(vec![
            descriptor("slow", ProviderKind::Openai, "m", 0.0, 9000.0, 0.9),
            descriptor("pricey", ProviderKind::Anthropic, "m", 1.0, 100.0, 0.9),
            descriptor("ok", ProviderKind::GptOss, "m", 0.0, 500.0, 0.5),
        ])
        .await;

        let request = RoutingRequest::new("analysis", 1000)
            .with_max_latency_ms(1000.0)
            .with_max_cost(0.1);
        let decision = router.route(&request).await.unwrap();

        assert_eq!(decision.selected_provider, "ok");
        assert!(decision.fallback_options.is_empty());
        assert!(decision.reasoning.contains("excluded"));
    }

    #[tokio::test]
    async fn high_quality_filters_when_possible() {
        let router = router_with(vec![
            descriptor("cheap", ProviderKind::GptOss, "m", 0.0, 100.0, 0.4),
            descriptor("good", ProviderKind::Openai, "m", 0.05, 3000.0, 0.85),
        ])
        .await;

        let request = RoutingRequest::new("analysis", 1000)
            .with_strategy(StrategyPreset::CostOptimized)
            .with_high_quality();
        let decision = router.route(&request).await.unwrap();
        assert_eq!(decision.selected_provider, "good");
    }

    #[tokio::test]
    async fn unhealthy_provider_loses_availability() {
        let router = router_with(vec![
            descriptor("a", ProviderKind::Openai, "m", 0.0, 1000.0, 0.8),
            descriptor("b", ProviderKind::Anthropic, "m", 0.0, 1000.0, 0.8),
        ])
        .await;
        router.health().mark_unhealthy("a");

        let decision = router.route(&RoutingRequest::new("analysis", 100)).await.unwrap();
        assert_eq!(decision.selected_provider, "b");
        assert!(decision.scores.availability > 0.99);
    }

    #[tokio::test]
    async fn near_tie_discounts_confidence() {
        let router = router_with(vec![
            descriptor("a", ProviderKind::Openai, "m", 0.0, 1000.0, 0.80),
            descriptor("b", ProviderKind::Anthropic, "m", 0.0, 1000.0, 0.79),
        ])
        .await;

        let decision = router.route(&RoutingRequest::new("analysis", 100)).await.unwrap();
        assert!(decision.confidence_score < decision.scores.composite);
        assert!(decision.reasoning.contains("close call"));
    }

    #[tokio::test]
    async fn task_strategy_applies_when_request_is_silent() {
        let tasks = InMemoryTaskStore::new();
        let mut meta = TaskMetadata::new("summary");
        meta.default_strategy = Some(StrategyPreset::LatencyFirst);
        crate::task::TaskMetadataStore::upsert(&tasks, meta).await.unwrap();

        let store = InMemoryCapabilityStore::new();
        store
            .register(descriptor("fast", ProviderKind::Openai, "m", 0.01, 200.0, 0.6))
            .await
            .unwrap();
        store
            .register(descriptor("smart", ProviderKind::Anthropic, "m", 0.01, 5000.0, 0.9))
            .await
            .unwrap();

        let router = TaskRouter::new(
            &RoutingConfig::default(),
            Arc::new(store),
            Arc::new(tasks),
            Arc::new(HealthCache::new(Duration::from_secs(60))),
        );

        let decision = router.route(&RoutingRequest::new("summary", 100)).await.unwrap();
        assert_eq!(decision.strategy, Some(StrategyPreset::LatencyFirst));
        assert_eq!(decision.selected_provider, "fast");
    }

    #[tokio::test]
    async fn adjusted_presets_are_used() {
        let router = router_with(vec![descriptor("a", ProviderKind::Openai, "m", 0.0, 1000.0, 0.8)]).await;
        router
            .apply_weight_adjustments(StrategyPreset::Balanced, cost_heavy())
            .unwrap();
        let w = router.strategy_weights(StrategyPreset::Balanced);
        assert!((w.cost - 0.8).abs() < 1e-9);

        let bad = RoutingWeights {
            cost: -1.0,
            ..RoutingWeights::default()
        };
        assert!(router.apply_weight_adjustments(StrategyPreset::Balanced, bad).is_err());
    }
}
