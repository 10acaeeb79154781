//! Configuration for the alpharoute analysis router
//!
//! Loaded from a TOML file whose values may reference the environment via
//! `{{ env.VAR }}` placeholders.

#![allow(clippy::must_use_candidate)]

pub mod benchmark;
mod env;
pub mod llm;
mod loader;
pub mod routing;
pub mod telemetry;

use serde::Deserialize;

pub use benchmark::*;
pub use llm::*;
pub use routing::*;
pub use telemetry::*;

/// Top-level alpharoute configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Provider transports and unified client behaviour
    #[serde(default)]
    pub llm: LlmConfig,
    /// Task router, capability seeds and feedback loop
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Benchmark harness defaults
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    /// Logging and metrics export
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
