//! Provider/model descriptors and the model capability store
//!
//! Descriptors are seeded from configuration and refreshed by benchmark
//! runs. They are never removed, only deactivated.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use alpharoute_config::{Config, PrivacyTier, ProviderKind};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;
use crate::weights::RoutingWeights;

/// A callable (provider, model) pair with the scores used for routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Provider name as configured under `[llm.providers]`
    pub provider: String,
    /// Wire protocol of the provider
    pub kind: ProviderKind,
    /// Model identifier sent to the provider
    pub model_id: String,
    pub privacy_tier: PrivacyTier,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub avg_latency_ms: f64,
    /// Aggregate quality between 0 and 1
    pub capability_score: f64,
    /// Benchmark sub-scores keyed by category
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,
    pub is_available: bool,
    /// When benchmark results last touched this descriptor
    #[serde(default)]
    pub updated_at: Option<jiff::Timestamp>,
}

impl ProviderDescriptor {
    /// Descriptor with neutral defaults for a provider kind
    pub fn new(provider: impl Into<String>, kind: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            model_id: model_id.into(),
            privacy_tier: kind.privacy_tier(),
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
            avg_latency_ms: 2000.0,
            capability_score: 0.5,
            category_scores: BTreeMap::new(),
            is_available: true,
            updated_at: None,
        }
    }

    /// Canonical identifier in "provider/model" format
    pub fn id(&self) -> String {
        descriptor_id(&self.provider, &self.model_id)
    }

    /// Estimate the cost of a request with the given token counts
    pub fn estimate_cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        let input_cost = (input_tokens as f64 / 1000.0) * self.cost_per_1k_input;
        let output_cost = (output_tokens as f64 / 1000.0) * self.cost_per_1k_output;
        input_cost + output_cost
    }

    fn apply(&mut self, update: CapabilityUpdate) {
        if let Some(score) = update.capability_score {
            self.capability_score = score.clamp(0.0, 1.0);
        }
        if let Some(latency) = update.avg_latency_ms {
            self.avg_latency_ms = latency.max(0.0);
        }
        if let Some(scores) = update.category_scores {
            self.category_scores = scores;
        }
        if let Some(cost) = update.cost_per_1k_input {
            self.cost_per_1k_input = cost;
        }
        if let Some(cost) = update.cost_per_1k_output {
            self.cost_per_1k_output = cost;
        }
        if let Some(tier) = update.privacy_tier {
            self.privacy_tier = tier;
        }
        if let Some(available) = update.is_available {
            self.is_available = available;
        }
        if update.touch {
            self.updated_at = Some(jiff::Timestamp::now());
        }
    }
}

/// Build a descriptor id from its parts
pub fn descriptor_id(provider: &str, model: &str) -> String {
    format!("{provider}/{model}")
}

/// Partial descriptor update; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct CapabilityUpdate {
    pub capability_score: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub category_scores: Option<BTreeMap<String, f64>>,
    pub cost_per_1k_input: Option<f64>,
    pub cost_per_1k_output: Option<f64>,
    pub privacy_tier: Option<PrivacyTier>,
    pub is_available: Option<bool>,
    /// Stamp `updated_at` with the current time
    pub touch: bool,
}

/// Query filter for [`ModelCapabilityStore::list_model_capabilities`]
#[derive(Debug, Clone)]
pub struct CapabilityFilter {
    pub provider: Option<String>,
    pub privacy_tier: Option<PrivacyTier>,
    pub min_capability_score: Option<f64>,
    /// Only return descriptors with `is_available` set
    pub available_only: bool,
}

impl Default for CapabilityFilter {
    fn default() -> Self {
        Self {
            provider: None,
            privacy_tier: None,
            min_capability_score: None,
            available_only: true,
        }
    }
}

impl CapabilityFilter {
    /// Every descriptor, available or not
    pub fn all() -> Self {
        Self {
            available_only: false,
            ..Self::default()
        }
    }

    fn matches(&self, d: &ProviderDescriptor) -> bool {
        (!self.available_only || d.is_available)
            && self.provider.as_ref().is_none_or(|p| *p == d.provider)
            && self.privacy_tier.is_none_or(|t| t == d.privacy_tier)
            && self.min_capability_score.is_none_or(|min| d.capability_score >= min)
    }
}

/// Requirements used to rank models for a task
#[derive(Debug, Clone, Default)]
pub struct TaskRequirements {
    pub privacy_requirement: Option<PrivacyTier>,
    pub min_capability_score: Option<f64>,
    pub max_latency_ms: Option<f64>,
    /// Ceiling on combined per-1K input and output cost
    pub max_cost_per_1k: Option<f64>,
    /// Benchmark category whose sub-score stands in for quality
    pub category: Option<String>,
}

/// Source of per-model routing inputs
#[async_trait]
pub trait ModelCapabilityStore: Send + Sync {
    /// List descriptors matching a filter
    async fn list_model_capabilities(&self, filter: &CapabilityFilter) -> Result<Vec<ProviderDescriptor>, RoutingError>;

    /// Fetch one descriptor by "provider/model" id
    async fn get(&self, id: &str) -> Result<Option<ProviderDescriptor>, RoutingError>;

    /// Insert or replace a descriptor
    async fn register(&self, descriptor: ProviderDescriptor) -> Result<(), RoutingError>;

    /// Apply a partial update and return the result
    async fn update_model_capability(&self, id: &str, update: CapabilityUpdate) -> Result<ProviderDescriptor, RoutingError>;

    /// Mark a descriptor unavailable
    async fn deactivate(&self, id: &str) -> Result<(), RoutingError> {
        self.update_model_capability(
            id,
            CapabilityUpdate {
                is_available: Some(false),
                ..CapabilityUpdate::default()
            },
        )
        .await
        .map(|_| ())
    }

    /// Rank available models against task requirements, best first
    async fn recommend_models(
        &self,
        requirements: &TaskRequirements,
        limit: usize,
    ) -> Result<Vec<(ProviderDescriptor, f64)>, RoutingError> {
        let filter = CapabilityFilter {
            min_capability_score: requirements.min_capability_score,
            ..CapabilityFilter::default()
        };
        let candidates: Vec<ProviderDescriptor> = self
            .list_model_capabilities(&filter)
            .await?
            .into_iter()
            .filter(|d| requirements.privacy_requirement.is_none_or(|r| d.privacy_tier.satisfies(r)))
            .filter(|d| requirements.max_latency_ms.is_none_or(|max| d.avg_latency_ms <= max))
            .filter(|d| {
                requirements
                    .max_cost_per_1k
                    .is_none_or(|max| d.cost_per_1k_input + d.cost_per_1k_output <= max)
            })
            .collect();

        Ok(rank_for_requirements(candidates, requirements, limit))
    }
}

/// Score candidates with the balanced preset and keep the best `limit`
fn rank_for_requirements(
    candidates: Vec<ProviderDescriptor>,
    requirements: &TaskRequirements,
    limit: usize,
) -> Vec<(ProviderDescriptor, f64)> {
    let weights = RoutingWeights::balanced();
    let max_cost = candidates
        .iter()
        .map(|d| d.cost_per_1k_input + d.cost_per_1k_output)
        .fold(0.0, f64::max);
    let max_latency = candidates.iter().map(|d| d.avg_latency_ms).fold(0.0, f64::max);

    let mut scored: Vec<(ProviderDescriptor, f64)> = candidates
        .into_iter()
        .map(|d| {
            let quality = requirements
                .category
                .as_ref()
                .and_then(|c| d.category_scores.get(c).copied())
                .unwrap_or(d.capability_score);
            let cost = crate::scoring::relative_score(d.cost_per_1k_input + d.cost_per_1k_output, max_cost);
            let latency = crate::scoring::relative_score(d.avg_latency_ms, max_latency);
            let total = weights.quality + weights.cost + weights.latency;
            let score = weights
                .quality
                .mul_add(quality, weights.cost.mul_add(cost, weights.latency * latency))
                / total;
            (d, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// In-process capability store, insertion ordered
#[derive(Debug, Default)]
pub struct InMemoryCapabilityStore {
    descriptors: RwLock<IndexMap<String, ProviderDescriptor>>,
}

impl InMemoryCapabilityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from `[[routing.models]]`, filling gaps from provider config
    ///
    /// Costs left at zero fall back to the provider's pricing table.
    pub fn from_config(config: &Config) -> Self {
        let mut descriptors = IndexMap::new();

        for seed in &config.routing.models {
            let Some(provider) = config.llm.providers.get(&seed.provider) else {
                continue;
            };
            let pricing = provider.pricing.get(&seed.model);

            let mut descriptor = ProviderDescriptor::new(&seed.provider, provider.kind, &seed.model);
            descriptor.privacy_tier = seed.privacy_tier.unwrap_or_else(|| provider.kind.privacy_tier());
            descriptor.cost_per_1k_input = nonzero_or(seed.cost_per_1k_input, pricing.map(|p| p.input_per_1k));
            descriptor.cost_per_1k_output = nonzero_or(seed.cost_per_1k_output, pricing.map(|p| p.output_per_1k));
            descriptor.avg_latency_ms = seed.avg_latency_ms;
            descriptor.capability_score = seed.capability_score;
            descriptor.category_scores.clone_from(&seed.category_scores);
            descriptor.is_available = seed.is_available;

            descriptors.insert(descriptor.id(), descriptor);
        }

        Self {
            descriptors: RwLock::new(descriptors),
        }
    }

    /// Number of descriptors, including deactivated ones
    pub fn len(&self) -> usize {
        self.descriptors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn nonzero_or(value: f64, fallback: Option<f64>) -> f64 {
    if value > 0.0 { value } else { fallback.unwrap_or(value) }
}

#[async_trait]
impl ModelCapabilityStore for InMemoryCapabilityStore {
    async fn list_model_capabilities(&self, filter: &CapabilityFilter) -> Result<Vec<ProviderDescriptor>, RoutingError> {
        let descriptors = self.descriptors.read().unwrap_or_else(PoisonError::into_inner);
        Ok(descriptors.values().filter(|d| filter.matches(d)).cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderDescriptor>, RoutingError> {
        let descriptors = self.descriptors.read().unwrap_or_else(PoisonError::into_inner);
        Ok(descriptors.get(id).cloned())
    }

    async fn register(&self, descriptor: ProviderDescriptor) -> Result<(), RoutingError> {
        let id = descriptor.id();
        tracing::debug!(model = %id, "registering model capability");
        self.descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, descriptor);
        Ok(())
    }

    async fn update_model_capability(&self, id: &str, update: CapabilityUpdate) -> Result<ProviderDescriptor, RoutingError> {
        let mut descriptors = self.descriptors.write().unwrap_or_else(PoisonError::into_inner);
        let descriptor = descriptors
            .get_mut(id)
            .ok_or_else(|| RoutingError::ModelNotFound { id: id.to_owned() })?;
        descriptor.apply(update);
        Ok(descriptor.clone())
    }
}
