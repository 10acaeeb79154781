//! Performance feedback loop
//!
//! Records predicted vs. actual outcomes of real executions and suggests
//! routing weight adjustments from the trailing window. Records are
//! append-only; the oldest are evicted once the log is full.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use alpharoute_config::{FeedbackConfig, StrategyPreset};
use dashmap::DashMap;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::weights::RoutingWeights;

/// Values below this count as zero when computing relative error
const EPSILON: f64 = 1e-12;

/// One completed call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFeedback {
    /// Decision that chose this model, if routing was used
    pub decision_id: Option<Uuid>,
    pub provider: String,
    pub model_id: String,
    pub task_type: String,
    /// Preset the decision was scored under
    pub strategy: Option<StrategyPreset>,
    pub predicted_cost: f64,
    pub actual_cost: f64,
    pub predicted_latency_ms: f64,
    pub actual_latency_ms: f64,
    pub predicted_quality: f64,
    /// Observed quality when known at write time
    pub actual_quality: Option<f64>,
    pub execution_success: bool,
    pub recorded_at: Timestamp,
}

/// Suggested weights plus one reason per change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightAdjustment {
    pub weights: RoutingWeights,
    pub reasons: Vec<String>,
    /// Records the suggestion was based on
    pub samples: usize,
}

/// Aggregate prediction accuracy over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub samples: usize,
    /// Mean relative error of cost predictions
    pub cost_error: f64,
    /// Mean of `(actual - predicted) / predicted` for cost
    pub cost_bias: f64,
    pub latency_error: f64,
    pub latency_bias: f64,
    pub quality_error: f64,
    /// Fraction of failed executions
    pub failure_rate: f64,
}

/// Observed performance of one model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelSnapshot {
    /// Median latency of successful calls in milliseconds
    pub latency_p50_ms: Option<f64>,
    /// Fraction of calls that failed
    pub error_rate: Option<f64>,
    pub sample_count: usize,
}

/// Append-only feedback log with weight suggestions
#[derive(Debug)]
pub struct PerformanceFeedback {
    records: RwLock<VecDeque<ExecutionFeedback>>,
    /// Quality scores reported after the fact, keyed by decision
    late_quality: DashMap<Uuid, f64>,
    config: FeedbackConfig,
}

impl PerformanceFeedback {
    pub fn new(config: FeedbackConfig) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            late_quality: DashMap::new(),
            config,
        }
    }

    pub const fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Append one record, evicting the oldest when full
    pub fn record_execution_feedback(&self, feedback: ExecutionFeedback) {
        tracing::debug!(
            provider = %feedback.provider,
            model = %feedback.model_id,
            task_type = %feedback.task_type,
            success = feedback.execution_success,
            "execution feedback recorded"
        );

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        while records.len() >= self.config.max_records.max(1) {
            records.pop_front();
        }
        records.push_back(feedback);
    }

    /// Attach a quality score to an earlier decision
    pub fn record_quality(&self, decision_id: Uuid, quality: f64) {
        self.late_quality.insert(decision_id, quality.clamp(0.0, 1.0));
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records inside the trailing window, optionally for one strategy
    fn window(&self, strategy: Option<StrategyPreset>, analysis_hours: u32) -> Vec<ExecutionFeedback> {
        let cutoff = Timestamp::now()
            .checked_sub(SignedDuration::from_hours(i64::from(analysis_hours)))
            .unwrap_or(Timestamp::MIN);

        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .filter(|r| r.recorded_at >= cutoff)
            .filter(|r| strategy.is_none_or(|s| r.strategy == Some(s)))
            .cloned()
            .collect()
    }

    fn actual_quality(&self, record: &ExecutionFeedback) -> f64 {
        record
            .decision_id
            .and_then(|id| self.late_quality.get(&id).map(|q| *q))
            .or(record.actual_quality)
            .unwrap_or(record.predicted_quality)
    }

    /// Prediction accuracy over the trailing window
    pub fn accuracy_report(&self, strategy: Option<StrategyPreset>, analysis_hours: u32) -> AccuracyReport {
        let window = self.window(strategy, analysis_hours);
        self.accuracy_of(&window)
    }

    fn accuracy_of(&self, window: &[ExecutionFeedback]) -> AccuracyReport {
        if window.is_empty() {
            return AccuracyReport::default();
        }

        let failures = window.iter().filter(|r| !r.execution_success).count();
        let succeeded: Vec<&ExecutionFeedback> = window.iter().filter(|r| r.execution_success).collect();

        let mean = |f: &dyn Fn(&ExecutionFeedback) -> f64| -> f64 {
            if succeeded.is_empty() {
                0.0
            } else {
                succeeded.iter().map(|r| f(r)).sum::<f64>() / succeeded.len() as f64
            }
        };

        AccuracyReport {
            samples: window.len(),
            cost_error: mean(&|r| relative_error(r.predicted_cost, r.actual_cost).abs()),
            cost_bias: mean(&|r| relative_error(r.predicted_cost, r.actual_cost)),
            latency_error: mean(&|r| relative_error(r.predicted_latency_ms, r.actual_latency_ms).abs()),
            latency_bias: mean(&|r| relative_error(r.predicted_latency_ms, r.actual_latency_ms)),
            quality_error: mean(&|r| relative_error(r.predicted_quality, self.actual_quality(r)).abs()),
            failure_rate: failures as f64 / window.len() as f64,
        }
    }

    /// Suggest weights for a strategy from the trailing window
    ///
    /// With fewer than `min_samples` records the input weights come back
    /// untouched. Otherwise each criterion whose mean relative error
    /// exceeds the tolerance loses `adjustment_step` of weight.
    pub fn suggest_weight_adjustments(
        &self,
        current: RoutingWeights,
        strategy: StrategyPreset,
        analysis_hours: Option<u32>,
    ) -> WeightAdjustment {
        let hours = analysis_hours.unwrap_or(self.config.analysis_hours);
        let window = self.window(Some(strategy), hours);

        if window.len() < self.config.min_samples {
            return WeightAdjustment {
                weights: current,
                reasons: vec![format!(
                    "insufficient data: {} of {} samples in the last {hours}h",
                    window.len(),
                    self.config.min_samples
                )],
                samples: window.len(),
            };
        }

        let report = self.accuracy_of(&window);
        let tolerance = self.config.error_tolerance;
        let step = self.config.adjustment_step;

        let mut weights = current;
        let mut reasons = Vec::new();

        if report.cost_error > tolerance {
            let moved = step.min(weights.cost);
            weights.cost -= moved;
            weights.quality += moved;
            let direction = if report.cost_bias > 0.0 { "above" } else { "below" };
            reasons.push(format!(
                "actual cost ran {direction} prediction by {:.0}% on average; cost weight reduced by {moved:.3}",
                report.cost_error * 100.0
            ));
        }

        if report.latency_error > tolerance {
            let moved = step.min(weights.latency);
            weights.latency -= moved;
            weights.quality += moved;
            let direction = if report.latency_bias > 0.0 { "above" } else { "below" };
            reasons.push(format!(
                "actual latency ran {direction} prediction by {:.0}% on average; latency weight reduced by {moved:.3}",
                report.latency_error * 100.0
            ));
        }

        if report.quality_error > tolerance {
            let moved = step.min(weights.quality);
            weights.quality -= moved;
            weights.availability += moved;
            reasons.push(format!(
                "quality predictions off by {:.0}% on average; quality weight reduced by {moved:.3}",
                report.quality_error * 100.0
            ));
        }

        if report.failure_rate > tolerance {
            let moved = step.min(weights.cost);
            weights.cost -= moved;
            weights.availability += moved;
            reasons.push(format!(
                "failure rate {:.0}% exceeds tolerance; availability weight raised by {moved:.3}",
                report.failure_rate * 100.0
            ));
        }

        if reasons.is_empty() {
            return WeightAdjustment {
                weights: current,
                reasons: vec!["predictions within tolerance".to_owned()],
                samples: report.samples,
            };
        }

        tracing::info!(strategy = %strategy, samples = report.samples, changes = reasons.len(), "weight adjustment suggested");

        WeightAdjustment {
            weights: weights.normalized(),
            reasons,
            samples: report.samples,
        }
    }

    /// Observed latency and error rate for one model across the whole log
    pub fn model_snapshot(&self, provider: &str, model: &str) -> ModelSnapshot {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<&ExecutionFeedback> = records
            .iter()
            .filter(|r| r.provider == provider && r.model_id == model)
            .collect();

        if matching.is_empty() {
            return ModelSnapshot::default();
        }

        let errors = matching.iter().filter(|r| !r.execution_success).count();
        let mut latencies: Vec<f64> = matching
            .iter()
            .filter(|r| r.execution_success)
            .map(|r| r.actual_latency_ms)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        ModelSnapshot {
            latency_p50_ms: (!latencies.is_empty()).then(|| percentile(&latencies, 0.50)),
            error_rate: Some(errors as f64 / matching.len() as f64),
            sample_count: matching.len(),
        }
    }
}

/// Signed relative error of `actual` against `predicted`
fn relative_error(predicted: f64, actual: f64) -> f64 {
    if predicted.abs() < EPSILON {
        if actual.abs() < EPSILON { 0.0 } else { 1.0 }
    } else {
        (actual - predicted) / predicted
    }
}

/// Percentile of sorted values
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
