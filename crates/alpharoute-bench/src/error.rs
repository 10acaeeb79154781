//! Benchmark error types

use std::time::Duration;

use alpharoute_llm::LlmError;
use alpharoute_routing::RoutingError;
use thiserror::Error;

/// Errors raised while defining or running benchmark suites
#[derive(Debug, Error)]
pub enum BenchmarkError {
    /// No suite registered under the name (and version, if given)
    #[error("benchmark suite not found: {0}")]
    SuiteNotFound(String),

    /// A suite with this name and version already exists
    #[error("benchmark suite {name} v{version} is already defined")]
    DuplicateSuite { name: String, version: String },

    /// A suite was defined with an unusable case list
    #[error("invalid benchmark suite: {0}")]
    InvalidSuite(String),

    /// A test case exceeded its wall-clock limit
    #[error("test case timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The target provider failed
    #[error(transparent)]
    Provider(#[from] LlmError),

    /// The capability store rejected a read or write
    #[error(transparent)]
    Store(#[from] RoutingError),

    /// The capability store holds no available models
    #[error("no available models to benchmark")]
    NoModels,
}
