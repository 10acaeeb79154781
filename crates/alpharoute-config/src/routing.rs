use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Task router configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Preset used when neither the request nor the task names one
    #[serde(default)]
    pub default_strategy: StrategyPreset,
    /// Number of ranked alternates returned with each decision
    #[serde(default = "default_max_fallbacks")]
    pub max_fallbacks: usize,
    /// Winner margin below which confidence is discounted
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,
    /// Seconds for a provider marked unhealthy to regain full availability
    #[serde(default = "default_unhealthy_decay_seconds")]
    pub unhealthy_decay_seconds: u64,
    /// Expected output tokens as a fraction of input tokens
    #[serde(default = "default_output_ratio")]
    pub default_output_ratio: f64,
    /// Seed model capability descriptors
    #[serde(default)]
    pub models: Vec<ModelCapabilityConfig>,
    /// Seed task metadata keyed by task type
    #[serde(default)]
    pub tasks: IndexMap<String, TaskConfig>,
    /// Performance feedback loop
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyPreset::default(),
            max_fallbacks: default_max_fallbacks(),
            ambiguity_margin: default_ambiguity_margin(),
            unhealthy_decay_seconds: default_unhealthy_decay_seconds(),
            default_output_ratio: default_output_ratio(),
            models: Vec::new(),
            tasks: IndexMap::new(),
            feedback: FeedbackConfig::default(),
        }
    }
}

/// Named weight presets
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StrategyPreset {
    CostOptimized,
    QualityFirst,
    LatencyFirst,
    PrivacyFirst,
    #[default]
    Balanced,
}

/// Where a model processes prompt data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrivacyTier {
    /// Data stays on infrastructure we operate
    Local,
    /// Data is sent to a third-party cloud
    Cloud,
}

impl PrivacyTier {
    /// Whether this tier is at least as private as `requirement`
    pub const fn satisfies(self, requirement: Self) -> bool {
        matches!((self, requirement), (Self::Local, _) | (Self::Cloud, Self::Cloud))
    }
}

/// Raw routing weights as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WeightsConfig {
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub latency: f64,
    #[serde(default)]
    pub quality: f64,
    #[serde(default)]
    pub availability: f64,
    #[serde(default)]
    pub privacy: f64,
    #[serde(default)]
    pub user_preference: f64,
}

impl WeightsConfig {
    /// Whether every component is finite and non-negative
    pub fn is_valid(&self) -> bool {
        [
            self.cost,
            self.latency,
            self.quality,
            self.availability,
            self.privacy,
            self.user_preference,
        ]
        .iter()
        .all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// Seed descriptor for the model capability store
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelCapabilityConfig {
    /// Provider name (key under `[llm.providers]`)
    pub provider: String,
    /// Model identifier sent to the provider
    pub model: String,
    /// Privacy tier override; defaults to the provider kind's tier
    #[serde(default)]
    pub privacy_tier: Option<PrivacyTier>,
    /// USD per 1K input tokens
    #[serde(default)]
    pub cost_per_1k_input: f64,
    /// USD per 1K output tokens
    #[serde(default)]
    pub cost_per_1k_output: f64,
    /// Typical request latency in milliseconds
    #[serde(default = "default_avg_latency_ms")]
    pub avg_latency_ms: f64,
    /// Aggregate quality between 0 and 1
    #[serde(default = "default_capability_score")]
    pub capability_score: f64,
    /// Whether the model may be routed to
    #[serde(default = "default_true")]
    pub is_available: bool,
    /// Per-category sub-scores (reasoning, creativity, ...)
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,
}

/// Seed metadata for a task type
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Preset applied to this task type
    #[serde(default)]
    pub strategy: Option<StrategyPreset>,
    /// Explicit weights, taking precedence over `strategy`
    #[serde(default)]
    pub weights: Option<WeightsConfig>,
    /// Prefer models with a high capability score
    #[serde(default)]
    pub requires_high_quality: bool,
    /// Required privacy tier
    #[serde(default)]
    pub privacy_requirement: Option<PrivacyTier>,
}

/// Performance feedback loop tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackConfig {
    /// Samples required before any weight change is suggested
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Trailing window analysed, in hours
    #[serde(default = "default_analysis_hours")]
    pub analysis_hours: u32,
    /// Weight moved per suggested adjustment
    #[serde(default = "default_adjustment_step")]
    pub adjustment_step: f64,
    /// Mean relative prediction error tolerated before adjusting
    #[serde(default = "default_error_tolerance")]
    pub error_tolerance: f64,
    /// Records retained before the oldest are evicted
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            analysis_hours: default_analysis_hours(),
            adjustment_step: default_adjustment_step(),
            error_tolerance: default_error_tolerance(),
            max_records: default_max_records(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_fallbacks() -> usize {
    3
}

#[allow(clippy::missing_const_for_fn)]
fn default_ambiguity_margin() -> f64 {
    0.05
}

#[allow(clippy::missing_const_for_fn)]
fn default_unhealthy_decay_seconds() -> u64 {
    300
}

#[allow(clippy::missing_const_for_fn)]
fn default_output_ratio() -> f64 {
    0.5
}

#[allow(clippy::missing_const_for_fn)]
fn default_avg_latency_ms() -> f64 {
    2000.0
}

#[allow(clippy::missing_const_for_fn)]
fn default_capability_score() -> f64 {
    0.5
}

#[allow(clippy::missing_const_for_fn)]
fn default_min_samples() -> usize {
    20
}

#[allow(clippy::missing_const_for_fn)]
fn default_analysis_hours() -> u32 {
    24
}

#[allow(clippy::missing_const_for_fn)]
fn default_adjustment_step() -> f64 {
    0.05
}

#[allow(clippy::missing_const_for_fn)]
fn default_error_tolerance() -> f64 {
    0.2
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_records() -> usize {
    10_000
}
