//! Pure multi-criteria scoring of routing candidates
//!
//! Every sub-score lies in [0, 1]; the composite is the weighted sum
//! under normalized weights.

use alpharoute_config::PrivacyTier;
use serde::{Deserialize, Serialize};

use crate::descriptor::ProviderDescriptor;
use crate::weights::RoutingWeights;

/// Privacy score of a cloud model when the request states no requirement
const UNCONSTRAINED_CLOUD_PRIVACY: f64 = 0.5;

/// Sub-scores of one candidate plus the weighted composite
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub cost: f64,
    pub latency: f64,
    pub quality: f64,
    pub availability: f64,
    pub privacy: f64,
    pub user_preference: f64,
    pub composite: f64,
}

/// Inputs shared by every candidate in one routing pass
#[derive(Debug, Clone)]
pub struct ScoringContext<'a> {
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Largest expected cost among candidates
    pub max_cost: f64,
    /// Largest average latency among candidates
    pub max_latency: f64,
    pub privacy_requirement: Option<PrivacyTier>,
    pub preferred_providers: &'a [String],
}

impl<'a> ScoringContext<'a> {
    /// Compute normalization bounds over a candidate set
    pub fn new(
        candidates: &[ProviderDescriptor],
        input_tokens: usize,
        output_tokens: usize,
        privacy_requirement: Option<PrivacyTier>,
        preferred_providers: &'a [String],
    ) -> Self {
        let max_cost = candidates
            .iter()
            .map(|d| d.estimate_cost(input_tokens, output_tokens))
            .fold(0.0, f64::max);
        let max_latency = candidates.iter().map(|d| d.avg_latency_ms).fold(0.0, f64::max);

        Self {
            input_tokens,
            output_tokens,
            max_cost,
            max_latency,
            privacy_requirement,
            preferred_providers,
        }
    }
}

/// `1 - value / max`, with a unit denominator when `max` is not positive
pub fn relative_score(value: f64, max: f64) -> f64 {
    let max = if max <= 0.0 { 1.0 } else { max };
    (1.0 - value / max).clamp(0.0, 1.0)
}

/// How well a privacy tier serves a requirement
///
/// Without a requirement local models score full marks and cloud models
/// half. With one, a satisfying tier scores 1 and anything else 0.
pub fn privacy_score(tier: PrivacyTier, requirement: Option<PrivacyTier>) -> f64 {
    match requirement {
        Some(required) if tier.satisfies(required) => 1.0,
        Some(_) => 0.0,
        None => match tier {
            PrivacyTier::Local => 1.0,
            PrivacyTier::Cloud => UNCONSTRAINED_CLOUD_PRIVACY,
        },
    }
}

/// Score one candidate
///
/// `availability` comes from the health cache and is taken as given.
pub fn score_candidate(
    descriptor: &ProviderDescriptor,
    ctx: &ScoringContext<'_>,
    availability: f64,
    weights: &RoutingWeights,
) -> ScoreBreakdown {
    let w = weights.normalized();

    let expected_cost = descriptor.estimate_cost(ctx.input_tokens, ctx.output_tokens);
    let cost = relative_score(expected_cost, ctx.max_cost);
    let latency = relative_score(descriptor.avg_latency_ms, ctx.max_latency);
    let quality = descriptor.capability_score.clamp(0.0, 1.0);
    let availability = availability.clamp(0.0, 1.0);
    let privacy = privacy_score(descriptor.privacy_tier, ctx.privacy_requirement);
    let user_preference = if ctx.preferred_providers.contains(&descriptor.provider) {
        1.0
    } else {
        0.0
    };

    let composite = w.cost * cost
        + w.latency * latency
        + w.quality * quality
        + w.availability * availability
        + w.privacy * privacy
        + w.user_preference * user_preference;

    ScoreBreakdown {
        cost,
        latency,
        quality,
        availability,
        privacy,
        user_preference,
        composite,
    }
}
