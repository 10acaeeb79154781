//! Routing weights and the named strategy presets

use alpharoute_config::{StrategyPreset, WeightsConfig};
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

/// Weight moved from cost to latency for high-priority requests
const HIGH_PRIORITY_SHIFT: f64 = 0.1;

/// Relative importance of each scoring criterion
///
/// Components should sum to 1.0. Scoring normalizes before use, so
/// unnormalized weights still rank consistently.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RoutingWeights {
    pub cost: f64,
    pub latency: f64,
    pub quality: f64,
    pub availability: f64,
    pub privacy: f64,
    #[serde(default)]
    pub user_preference: f64,
}

impl RoutingWeights {
    /// Weights for a named preset
    pub const fn preset(preset: StrategyPreset) -> Self {
        let (cost, latency, quality, availability, privacy) = match preset {
            StrategyPreset::CostOptimized => (0.5, 0.15, 0.2, 0.1, 0.05),
            StrategyPreset::QualityFirst => (0.1, 0.1, 0.6, 0.15, 0.05),
            StrategyPreset::LatencyFirst => (0.1, 0.55, 0.2, 0.1, 0.05),
            StrategyPreset::PrivacyFirst => (0.1, 0.1, 0.2, 0.1, 0.5),
            StrategyPreset::Balanced => (0.2, 0.2, 0.3, 0.2, 0.1),
        };
        Self {
            cost,
            latency,
            quality,
            availability,
            privacy,
            user_preference: 0.0,
        }
    }

    /// The balanced preset
    pub const fn balanced() -> Self {
        Self::preset(StrategyPreset::Balanced)
    }

    /// Sum of all components
    pub fn sum(&self) -> f64 {
        self.cost + self.latency + self.quality + self.availability + self.privacy + self.user_preference
    }

    /// Reject negative, non-finite, or all-zero weights
    pub fn validate(&self) -> Result<(), RoutingError> {
        let components = [
            ("cost", self.cost),
            ("latency", self.latency),
            ("quality", self.quality),
            ("availability", self.availability),
            ("privacy", self.privacy),
            ("user_preference", self.user_preference),
        ];
        for (name, value) in components {
            if !value.is_finite() || value < 0.0 {
                return Err(RoutingError::InvalidWeights(format!("{name} weight is {value}")));
            }
        }
        if self.sum() <= 0.0 {
            return Err(RoutingError::InvalidWeights("weights sum to zero".to_owned()));
        }
        Ok(())
    }

    /// Scale every component so the sum is 1.0
    ///
    /// All-zero weights come back unchanged.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total <= 0.0 {
            return *self;
        }
        Self {
            cost: self.cost / total,
            latency: self.latency / total,
            quality: self.quality / total,
            availability: self.availability / total,
            privacy: self.privacy / total,
            user_preference: self.user_preference / total,
        }
    }

    /// Move weight from cost to latency for urgent requests
    #[must_use]
    pub fn with_high_priority(&self) -> Self {
        let shift = HIGH_PRIORITY_SHIFT.min(self.cost);
        Self {
            cost: self.cost - shift,
            latency: self.latency + shift,
            ..*self
        }
    }
}

impl From<WeightsConfig> for RoutingWeights {
    fn from(w: WeightsConfig) -> Self {
        Self {
            cost: w.cost,
            latency: w.latency,
            quality: w.quality,
            availability: w.availability,
            privacy: w.privacy,
            user_preference: w.user_preference,
        }
    }
}
