//! Per-call routing input

use alpharoute_config::{PrivacyTier, StrategyPreset};
use serde::{Deserialize, Serialize};

use crate::weights::RoutingWeights;

/// Request urgency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    #[default]
    Standard,
    High,
}

/// One routing ask, built per call and never persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRequest {
    /// Key into the task metadata store
    pub task_type: String,
    /// Expected input tokens
    pub estimated_tokens: usize,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub requires_high_quality: bool,
    #[serde(default)]
    pub max_acceptable_latency_ms: Option<f64>,
    /// Ceiling on the expected cost of this one request, in USD
    #[serde(default)]
    pub max_acceptable_cost: Option<f64>,
    #[serde(default)]
    pub privacy_requirement: Option<PrivacyTier>,
    /// Overrides every other weight source
    #[serde(default)]
    pub custom_weights: Option<RoutingWeights>,
    /// Preset override, below `custom_weights`
    #[serde(default)]
    pub strategy: Option<StrategyPreset>,
    /// Providers earning the user preference bonus
    #[serde(default)]
    pub preferred_providers: Vec<String>,
}

impl RoutingRequest {
    /// Request for a task type with default constraints
    pub fn new(task_type: impl Into<String>, estimated_tokens: usize) -> Self {
        Self {
            task_type: task_type.into(),
            estimated_tokens,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_high_quality(mut self) -> Self {
        self.requires_high_quality = true;
        self
    }

    #[must_use]
    pub const fn with_privacy(mut self, tier: PrivacyTier) -> Self {
        self.privacy_requirement = Some(tier);
        self
    }

    #[must_use]
    pub const fn with_max_cost(mut self, max: f64) -> Self {
        self.max_acceptable_cost = Some(max);
        self
    }

    #[must_use]
    pub const fn with_max_latency_ms(mut self, max: f64) -> Self {
        self.max_acceptable_latency_ms = Some(max);
        self
    }

    #[must_use]
    pub const fn with_weights(mut self, weights: RoutingWeights) -> Self {
        self.custom_weights = Some(weights);
        self
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: StrategyPreset) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_providers.push(provider.into());
        self
    }
}
