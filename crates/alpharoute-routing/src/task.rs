//! Task metadata store: per-task routing hints and outcome aggregates

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use alpharoute_config::{Config, PrivacyTier, StrategyPreset};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::descriptor::descriptor_id;
use crate::error::RoutingError;
use crate::weights::RoutingWeights;

/// Outcome of one call, reported back to the task store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPerformance {
    pub task_type: String,
    pub provider: String,
    pub model: String,
    pub latency_ms: f64,
    pub success: bool,
    pub quality_score: Option<f64>,
    pub cost: f64,
    /// Free-form caller context
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Running aggregate for one model on one task type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTaskStats {
    pub count: u64,
    pub successes: u64,
    pub mean_latency_ms: f64,
    /// Mean over the calls that reported a quality score
    pub mean_quality: Option<f64>,
    #[serde(default)]
    quality_samples: u64,
    pub total_cost: f64,
}

impl ModelTaskStats {
    fn observe(&mut self, perf: &TaskPerformance) {
        self.count += 1;
        if perf.success {
            self.successes += 1;
        }
        self.mean_latency_ms += (perf.latency_ms - self.mean_latency_ms) / self.count as f64;
        self.total_cost += perf.cost;

        if let Some(quality) = perf.quality_score {
            self.quality_samples += 1;
            let prev = self.mean_quality.unwrap_or(0.0);
            self.mean_quality = Some(prev + (quality - prev) / self.quality_samples as f64);
        }
    }

    /// Fraction of successful calls
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.successes as f64 / self.count as f64
    }
}

/// Routing hints and history for one task type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_type: String,
    pub default_strategy: Option<StrategyPreset>,
    pub default_weights: Option<RoutingWeights>,
    pub requires_high_quality: bool,
    pub privacy_requirement: Option<PrivacyTier>,
    /// Keyed by "provider/model"
    #[serde(default)]
    pub stats: BTreeMap<String, ModelTaskStats>,
}

impl TaskMetadata {
    /// Empty metadata for a task type
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Self::default()
        }
    }
}

/// Source of per-task routing hints
#[async_trait]
pub trait TaskMetadataStore: Send + Sync {
    /// Look up a task type; `None` when nothing is known about it
    async fn get_task_metadata(&self, task_type: &str) -> Result<Option<TaskMetadata>, RoutingError>;

    /// Record a call outcome; failures are logged by callers, not retried
    async fn record_task_performance(&self, perf: TaskPerformance) -> Result<(), RoutingError>;

    /// Insert or replace the hints for a task type, keeping its stats
    async fn upsert(&self, metadata: TaskMetadata) -> Result<(), RoutingError>;
}

/// In-process task store
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<IndexMap<String, TaskMetadata>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from `[routing.tasks]`
    pub fn from_config(config: &Config) -> Self {
        let tasks = config
            .routing
            .tasks
            .iter()
            .map(|(name, task)| {
                let metadata = TaskMetadata {
                    task_type: name.clone(),
                    default_strategy: task.strategy,
                    default_weights: task.weights.map(RoutingWeights::from),
                    requires_high_quality: task.requires_high_quality,
                    privacy_requirement: task.privacy_requirement,
                    stats: BTreeMap::new(),
                };
                (name.clone(), metadata)
            })
            .collect();

        Self {
            tasks: RwLock::new(tasks),
        }
    }
}

#[async_trait]
impl TaskMetadataStore for InMemoryTaskStore {
    async fn get_task_metadata(&self, task_type: &str) -> Result<Option<TaskMetadata>, RoutingError> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks.get(task_type).cloned())
    }

    async fn record_task_performance(&self, perf: TaskPerformance) -> Result<(), RoutingError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let metadata = tasks
            .entry(perf.task_type.clone())
            .or_insert_with(|| TaskMetadata::new(&perf.task_type));
        metadata
            .stats
            .entry(descriptor_id(&perf.provider, &perf.model))
            .or_default()
            .observe(&perf);
        Ok(())
    }

    async fn upsert(&self, mut metadata: TaskMetadata) -> Result<(), RoutingError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = tasks.get_mut(&metadata.task_type) {
            metadata.stats = std::mem::take(&mut existing.stats);
        }
        tasks.insert(metadata.task_type.clone(), metadata);
        Ok(())
    }
}
