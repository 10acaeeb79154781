//! Task routing for alpharoute
//!
//! Scores every known (provider, model) pair against a request:
//! - **Stores**: model capabilities and task metadata, behind traits
//! - **Router**: weighted cost, latency, quality, availability and privacy
//! - **Feedback**: predicted vs. actual outcomes drive weight suggestions

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod descriptor;
pub mod error;
pub mod feedback;
pub mod health;
pub mod request;
pub mod router;
pub mod scoring;
pub mod task;
pub mod weights;

use alpharoute_config::StrategyPreset;
use serde::Serialize;
use uuid::Uuid;

pub use descriptor::{
    CapabilityFilter, CapabilityUpdate, InMemoryCapabilityStore, ModelCapabilityStore, ProviderDescriptor,
    TaskRequirements, descriptor_id,
};
pub use error::RoutingError;
pub use feedback::{AccuracyReport, ExecutionFeedback, ModelSnapshot, PerformanceFeedback, WeightAdjustment};
pub use health::HealthCache;
pub use request::{Priority, RoutingRequest};
pub use router::TaskRouter;
pub use scoring::ScoreBreakdown;
pub use task::{InMemoryTaskStore, ModelTaskStats, TaskMetadata, TaskMetadataStore, TaskPerformance};
pub use weights::RoutingWeights;

/// Result of a routing decision
///
/// Freezes the descriptor values used at decision time.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub decision_id: Uuid,
    pub task_type: String,
    pub selected_provider: String,
    pub selected_model: String,
    /// Preset used, `None` for custom or task-specific weights
    pub strategy: Option<StrategyPreset>,
    /// Normalized weights the candidates were scored with
    pub weights: RoutingWeights,
    /// Why the winner won
    pub reasoning: String,
    /// Winner's composite, discounted on a near tie
    pub confidence_score: f64,
    pub expected_cost: f64,
    pub expected_latency_ms: f64,
    pub expected_quality_score: f64,
    /// Sub-scores of the winner
    pub scores: ScoreBreakdown,
    /// Alternates by descending composite, winner excluded
    pub fallback_options: Vec<ProviderDescriptor>,
}

impl RoutingDecision {
    /// Model to use for `provider`: the winner's or the best fallback's
    pub fn model_for(&self, provider: &str) -> Option<&str> {
        if self.selected_provider == provider {
            return Some(&self.selected_model);
        }
        self.fallback_options
            .iter()
            .find(|d| d.provider == provider)
            .map(|d| d.model_id.as_str())
    }

    /// Providers in decision order, each listed once
    pub fn provider_order(&self) -> Vec<String> {
        let mut order = vec![self.selected_provider.clone()];
        for d in &self.fallback_options {
            if !order.contains(&d.provider) {
                order.push(d.provider.clone());
            }
        }
        order
    }
}
