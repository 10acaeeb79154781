use std::time::Duration;

use serde::Deserialize;

/// Benchmark harness defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    /// Wall-clock limit per test case when the case does not set one
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// Additional attempts for a failed or timed-out case
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cases in flight at once; 1 runs sequentially
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum score for a case to pass
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            max_concurrent: default_max_concurrent(),
            pass_threshold: default_pass_threshold(),
        }
    }
}

impl BenchmarkConfig {
    /// Default per-case timeout
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_timeout_seconds() -> u64 {
    45
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_retries() -> u32 {
    1
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_concurrent() -> usize {
    2
}

#[allow(clippy::missing_const_for_fn)]
fn default_pass_threshold() -> f64 {
    0.6
}
