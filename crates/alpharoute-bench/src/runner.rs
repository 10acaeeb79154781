//! Suite execution and capability write-back

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alpharoute_config::BenchmarkConfig;
use alpharoute_llm::{ChatRequest, LlmClient, LlmError, RouterContext};
use alpharoute_routing::{CapabilityFilter, CapabilityUpdate, ModelCapabilityStore, RoutingError, descriptor_id};
use async_trait::async_trait;
use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::case::{BenchmarkCategory, BenchmarkTestCase};
use crate::error::BenchmarkError;
use crate::evaluate::evaluate_response;
use crate::execution::{BenchmarkExecution, ExecutionHistory};
use crate::suite::{BenchmarkSuite, SuiteRegistry};

/// Speed cases answered within this keep their full score
const SPEED_TARGET: Duration = Duration::from_secs(2);

/// Floor of the latency factor for slow speed cases
const MIN_SPEED_FACTOR: f64 = 0.5;

/// Something that can answer a benchmark prompt
#[async_trait]
pub trait BenchmarkTarget: Send + Sync {
    /// Send `request` to `provider` once, without failover
    async fn complete(&self, provider: &str, request: &ChatRequest) -> Result<String, LlmError>;
}

#[async_trait]
impl BenchmarkTarget for LlmClient {
    async fn complete(&self, provider: &str, request: &ChatRequest) -> Result<String, LlmError> {
        self.complete_with(provider, request)
            .await
            .map(|completion| completion.response.content)
    }
}

/// Aggregated result of one suite run against one model
#[derive(Debug, Clone, Serialize)]
pub struct SuiteResult {
    pub suite_name: String,
    pub suite_version: String,
    pub provider: String,
    pub model_id: String,
    /// Case scores averaged by case weight
    pub overall_score: f64,
    pub category_scores: BTreeMap<String, f64>,
    pub passed_cases: usize,
    pub total_cases: usize,
    /// Mean latency of completed cases
    pub avg_latency_ms: Option<f64>,
    pub executions: Vec<BenchmarkExecution>,
    pub started_at: Timestamp,
    pub completed_at: Timestamp,
}

/// Roll-up across every benchmarked model
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub suite_name: String,
    pub models_tested: usize,
    pub best_model: Option<String>,
    pub best_score: Option<f64>,
    pub mean_score: Option<f64>,
    /// Models whose run could not complete, with the reason
    pub failures: BTreeMap<String, String>,
}

/// Result of [`BenchmarkRunner::run_all_model_benchmarks`]
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub summary: BenchmarkSummary,
    /// Keyed by descriptor id (`provider/model`)
    pub per_model_results: BTreeMap<String, SuiteResult>,
}

/// Per-run settings shared by every case task
#[derive(Debug)]
struct RunSettings {
    suite_name: String,
    suite_version: String,
    provider: String,
    model_id: String,
    default_timeout: Duration,
    max_retries: u32,
    pass_threshold: f64,
}

/// Runs suites against models and feeds scores back to the capability store
pub struct BenchmarkRunner {
    target: Arc<dyn BenchmarkTarget>,
    capabilities: Arc<dyn ModelCapabilityStore>,
    registry: Arc<SuiteRegistry>,
    history: Arc<ExecutionHistory>,
    config: BenchmarkConfig,
}

impl BenchmarkRunner {
    /// Runner with the built-in suites and an empty history
    pub fn new(
        target: Arc<dyn BenchmarkTarget>,
        capabilities: Arc<dyn ModelCapabilityStore>,
        config: BenchmarkConfig,
    ) -> Self {
        Self {
            target,
            capabilities,
            registry: Arc::new(SuiteRegistry::builtin()),
            history: Arc::new(ExecutionHistory::new()),
            config,
        }
    }

    /// Runner over a context's client and capability store
    pub fn from_context(context: &RouterContext) -> Self {
        let target: Arc<dyn BenchmarkTarget> = context.client().clone();
        Self::new(
            target,
            Arc::clone(context.capabilities()),
            context.config().benchmark.clone(),
        )
    }

    #[must_use]
    pub fn with_registry(mut self, registry: SuiteRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<ExecutionHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn registry(&self) -> &SuiteRegistry {
        &self.registry
    }

    pub const fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    /// Run the latest version of a suite against one model
    ///
    /// Failed or timed-out cases score zero without stopping the run. The
    /// model's `capability_score`, `category_scores` and `avg_latency_ms`
    /// are overwritten with the new result.
    ///
    /// # Errors
    ///
    /// `SuiteNotFound` for an unknown suite, `Store` when the model is not
    /// registered or the update is rejected
    pub async fn run_benchmark_suite(
        &self,
        suite_name: &str,
        provider: &str,
        model_id: &str,
        max_concurrent: Option<usize>,
    ) -> Result<SuiteResult, BenchmarkError> {
        let suite = self.registry.get(suite_name, None)?;
        let id = descriptor_id(provider, model_id);
        if self.capabilities.get(&id).await?.is_none() {
            return Err(RoutingError::ModelNotFound { id }.into());
        }

        let concurrency = max_concurrent.unwrap_or(self.config.max_concurrent).max(1);
        let settings = Arc::new(RunSettings {
            suite_name: suite.name().to_owned(),
            suite_version: suite.version().to_owned(),
            provider: provider.to_owned(),
            model_id: model_id.to_owned(),
            default_timeout: self.config.default_timeout(),
            max_retries: self.config.max_retries,
            pass_threshold: self.config.pass_threshold,
        });

        tracing::info!(
            suite = %suite.name(),
            version = %suite.version(),
            model = %id,
            cases = suite.cases().len(),
            concurrency,
            "benchmark started"
        );
        let started_at = Timestamp::now();

        let mut by_case = if concurrency == 1 {
            let mut results = HashMap::new();
            for case in suite.cases() {
                let execution = run_case(Arc::clone(&self.target), Arc::clone(&settings), case.clone()).await;
                results.insert(execution.case_id.clone(), execution);
            }
            results
        } else {
            self.run_concurrently(&suite, &settings, concurrency).await
        };

        // keep suite order; a case whose task died counts as failed
        let executions: Vec<BenchmarkExecution> = suite
            .cases()
            .iter()
            .map(|case| {
                by_case.remove(&case.id).unwrap_or_else(|| {
                    let mut execution = BenchmarkExecution::pending(
                        &settings.suite_name,
                        &settings.suite_version,
                        case,
                        provider,
                        model_id,
                    );
                    execution.begin_attempt();
                    execution.fail("benchmark task aborted".to_owned());
                    execution
                })
            })
            .collect();

        self.history.extend(executions.iter().cloned());
        let result = aggregate(&suite, &settings, executions, started_at);

        self.capabilities
            .update_model_capability(
                &id,
                CapabilityUpdate {
                    capability_score: Some(result.overall_score),
                    avg_latency_ms: result.avg_latency_ms,
                    category_scores: Some(result.category_scores.clone()),
                    touch: true,
                    ..CapabilityUpdate::default()
                },
            )
            .await?;

        tracing::info!(
            suite = %result.suite_name,
            model = %id,
            score = result.overall_score,
            passed = result.passed_cases,
            total = result.total_cases,
            "benchmark finished"
        );
        Ok(result)
    }

    async fn run_concurrently(
        &self,
        suite: &BenchmarkSuite,
        settings: &Arc<RunSettings>,
        concurrency: usize,
    ) -> HashMap<String, BenchmarkExecution> {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        for case in suite.cases() {
            let semaphore = Arc::clone(&semaphore);
            let target = Arc::clone(&self.target);
            let settings = Arc::clone(settings);
            let case = case.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                run_case(target, settings, case).await
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(execution) => {
                    results.insert(execution.case_id.clone(), execution);
                }
                Err(e) => tracing::error!(error = %e, "benchmark task failed"),
            }
        }
        results
    }

    /// Run a suite against every available model, one model at a time
    ///
    /// A model whose run errors is listed in the summary's failures and
    /// the rest still run.
    ///
    /// # Errors
    ///
    /// `SuiteNotFound` for an unknown suite, `NoModels` when nothing is
    /// available
    pub async fn run_all_model_benchmarks(&self, suite_name: &str) -> Result<BenchmarkReport, BenchmarkError> {
        let suite = self.registry.get(suite_name, None)?;
        let models = self
            .capabilities
            .list_model_capabilities(&CapabilityFilter::default())
            .await?;
        if models.is_empty() {
            return Err(BenchmarkError::NoModels);
        }

        let mut per_model_results = BTreeMap::new();
        let mut failures = BTreeMap::new();

        for descriptor in &models {
            match self
                .run_benchmark_suite(suite.name(), &descriptor.provider, &descriptor.model_id, None)
                .await
            {
                Ok(result) => {
                    per_model_results.insert(descriptor.id(), result);
                }
                Err(e) => {
                    tracing::warn!(model = %descriptor.id(), error = %e, "benchmark run failed");
                    failures.insert(descriptor.id(), e.to_string());
                }
            }
        }

        let best = per_model_results
            .iter()
            .max_by(|(_, a), (_, b)| a.overall_score.total_cmp(&b.overall_score));
        let mean_score = (!per_model_results.is_empty()).then(|| {
            per_model_results.values().map(|r| r.overall_score).sum::<f64>() / per_model_results.len() as f64
        });

        let summary = BenchmarkSummary {
            suite_name: suite.name().to_owned(),
            models_tested: per_model_results.len(),
            best_model: best.map(|(id, _)| id.clone()),
            best_score: best.map(|(_, r)| r.overall_score),
            mean_score,
            failures,
        };

        Ok(BenchmarkReport {
            summary,
            per_model_results,
        })
    }
}

impl std::fmt::Debug for BenchmarkRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkRunner")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Run one case with its timeout and retries
async fn run_case(
    target: Arc<dyn BenchmarkTarget>,
    settings: Arc<RunSettings>,
    case: BenchmarkTestCase,
) -> BenchmarkExecution {
    let mut execution = BenchmarkExecution::pending(
        &settings.suite_name,
        &settings.suite_version,
        &case,
        &settings.provider,
        &settings.model_id,
    );
    let request = case.request(&settings.model_id);
    let timeout = case.timeout.unwrap_or(settings.default_timeout);
    let mut last_error = None;

    for attempt in 0..=settings.max_retries {
        execution.begin_attempt();
        let started = Instant::now();

        match tokio::time::timeout(timeout, target.complete(&settings.provider, &request)).await {
            Ok(Ok(content)) => {
                let latency = started.elapsed();
                let evaluation = evaluate_response(&content, &case);
                let score = if case.category == BenchmarkCategory::Speed {
                    evaluation.score * speed_factor(latency)
                } else {
                    evaluation.score
                };
                execution.complete(
                    content,
                    latency.as_secs_f64() * 1000.0,
                    evaluation,
                    score,
                    settings.pass_threshold,
                );
                return execution;
            }
            Ok(Err(e)) => {
                tracing::warn!(case = %case.id, attempt, error = %e, "benchmark case failed");
                let retryable = e.is_retryable();
                last_error = Some(BenchmarkError::Provider(e));
                if !retryable {
                    break;
                }
            }
            Err(_) => {
                tracing::warn!(case = %case.id, attempt, timeout_ms = timeout.as_millis(), "benchmark case timed out");
                last_error = Some(BenchmarkError::Timeout(timeout));
            }
        }
    }

    match last_error {
        Some(e @ BenchmarkError::Timeout(_)) => execution.time_out(e.to_string()),
        Some(e) => execution.fail(e.to_string()),
        None => execution.fail("no attempt made".to_owned()),
    }
    execution
}

/// Score multiplier for speed cases slower than the target
fn speed_factor(latency: Duration) -> f64 {
    if latency <= SPEED_TARGET {
        1.0
    } else {
        (SPEED_TARGET.as_secs_f64() / latency.as_secs_f64()).max(MIN_SPEED_FACTOR)
    }
}

fn aggregate(
    suite: &BenchmarkSuite,
    settings: &RunSettings,
    executions: Vec<BenchmarkExecution>,
    started_at: Timestamp,
) -> SuiteResult {
    let weight_of = |case_id: &str| suite.case(case_id).map_or(1.0, |c| c.weight);

    let total_weight: f64 = executions.iter().map(|e| weight_of(&e.case_id)).sum();
    let overall_score = if total_weight > 0.0 {
        executions
            .iter()
            .map(|e| e.score * weight_of(&e.case_id))
            .sum::<f64>()
            / total_weight
    } else if executions.is_empty() {
        0.0
    } else {
        executions.iter().map(|e| e.score).sum::<f64>() / executions.len() as f64
    };

    let mut per_category: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for execution in &executions {
        let entry = per_category.entry(execution.category.to_string()).or_default();
        entry.0 += execution.score;
        entry.1 += 1;
    }
    let category_scores = per_category
        .into_iter()
        .map(|(category, (sum, count))| (category, sum / count as f64))
        .collect();

    let latencies: Vec<f64> = executions.iter().filter_map(|e| e.latency_ms).collect();
    let avg_latency_ms =
        (!latencies.is_empty()).then(|| latencies.iter().sum::<f64>() / latencies.len() as f64);

    SuiteResult {
        suite_name: settings.suite_name.clone(),
        suite_version: settings.suite_version.clone(),
        provider: settings.provider.clone(),
        model_id: settings.model_id.clone(),
        overall_score,
        category_scores,
        passed_cases: executions.iter().filter(|e| e.passed).count(),
        total_cases: executions.len(),
        avg_latency_ms,
        executions,
        started_at,
        completed_at: Timestamp::now(),
    }
}
