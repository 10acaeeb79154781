//! Benchmark executions and their history

use std::sync::{PoisonError, RwLock};

use jiff::Timestamp;
use serde::Serialize;
use uuid::Uuid;

use crate::case::{BenchmarkCategory, BenchmarkTestCase};
use crate::evaluate::EvaluationResult;

/// Lifecycle of one execution
///
/// `Pending -> Running -> Completed | Failed | TimedOut`. A retry keeps
/// the execution in `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Whether the state machine allows moving to `next`
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Running, Self::Running)
                | (Self::Running, Self::Completed | Self::Failed | Self::TimedOut)
        )
    }
}

/// Outcome of running one test case against one model
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkExecution {
    pub id: Uuid,
    pub suite_name: String,
    pub suite_version: String,
    pub case_id: String,
    pub category: BenchmarkCategory,
    pub provider: String,
    pub model_id: String,
    pub status: ExecutionStatus,
    /// Calls made, retries included
    pub attempts: u32,
    /// Final score, zero unless completed
    pub score: f64,
    pub passed: bool,
    /// Latency of the successful call
    pub latency_ms: Option<f64>,
    pub response: Option<String>,
    pub evaluation: Option<EvaluationResult>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl BenchmarkExecution {
    /// A pending execution of `case`
    pub fn pending(
        suite_name: &str,
        suite_version: &str,
        case: &BenchmarkTestCase,
        provider: &str,
        model_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            suite_name: suite_name.to_owned(),
            suite_version: suite_version.to_owned(),
            case_id: case.id.clone(),
            category: case.category,
            provider: provider.to_owned(),
            model_id: model_id.to_owned(),
            status: ExecutionStatus::Pending,
            attempts: 0,
            score: 0.0,
            passed: false,
            latency_ms: None,
            response: None,
            evaluation: None,
            error_message: None,
            created_at: Timestamp::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub const fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Enter `Running` for a new attempt
    pub(crate) fn begin_attempt(&mut self) {
        self.transition(ExecutionStatus::Running);
        self.attempts += 1;
        if self.started_at.is_none() {
            self.started_at = Some(Timestamp::now());
        }
    }

    pub(crate) fn complete(
        &mut self,
        response: String,
        latency_ms: f64,
        evaluation: EvaluationResult,
        score: f64,
        pass_threshold: f64,
    ) {
        self.transition(ExecutionStatus::Completed);
        self.score = score;
        self.passed = score >= pass_threshold;
        self.latency_ms = Some(latency_ms);
        self.response = Some(response);
        self.evaluation = Some(evaluation);
        self.error_message = None;
        self.finished_at = Some(Timestamp::now());
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.finish_unsuccessfully(ExecutionStatus::Failed, error);
    }

    pub(crate) fn time_out(&mut self, error: String) {
        self.finish_unsuccessfully(ExecutionStatus::TimedOut, error);
    }

    fn finish_unsuccessfully(&mut self, status: ExecutionStatus, error: String) {
        self.transition(status);
        self.score = 0.0;
        self.passed = false;
        self.error_message = Some(error);
        self.finished_at = Some(Timestamp::now());
    }

    fn transition(&mut self, next: ExecutionStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal execution transition {} -> {next}",
            self.status
        );
        self.status = next;
    }
}

/// Append-only record of every execution
#[derive(Debug, Default)]
pub struct ExecutionHistory {
    executions: RwLock<Vec<BenchmarkExecution>>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, execution: BenchmarkExecution) {
        self.executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(execution);
    }

    pub fn extend(&self, executions: impl IntoIterator<Item = BenchmarkExecution>) {
        self.executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(executions);
    }

    /// Executions for one model, oldest first
    pub fn for_model(&self, provider: &str, model_id: &str) -> Vec<BenchmarkExecution> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.provider == provider && e.model_id == model_id)
            .cloned()
            .collect()
    }

    /// Executions of one suite, any version, oldest first
    pub fn for_suite(&self, suite_name: &str) -> Vec<BenchmarkExecution> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.suite_name == suite_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
