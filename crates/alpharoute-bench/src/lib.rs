//! Benchmark suites for alpharoute
//!
//! Runs versioned prompt suites against (provider, model) pairs, scores
//! the answers with pure heuristics and writes the results back to the
//! model capability store the router reads from.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod case;
pub mod error;
pub mod evaluate;
pub mod execution;
pub mod runner;
pub mod suite;

pub use case::{BenchmarkCategory, BenchmarkTestCase};
pub use error::BenchmarkError;
pub use evaluate::{EvaluationResult, evaluate_response};
pub use execution::{BenchmarkExecution, ExecutionHistory, ExecutionStatus};
pub use runner::{BenchmarkReport, BenchmarkRunner, BenchmarkSummary, BenchmarkTarget, SuiteResult};
pub use suite::{BenchmarkSuite, STANDARD_SUITE, SuiteRegistry};
