//! Metric names and the instrument bundle used by the LLM client

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};

pub const LLM_REQUEST_COUNT: &str = "llm.request.count";
pub const LLM_REQUEST_DURATION: &str = "llm.request.duration";
pub const LLM_TOKEN_USAGE: &str = "llm.token.usage";
pub const LLM_COST: &str = "llm.cost";
pub const LLM_FAILOVER_COUNT: &str = "llm.failover.count";

/// Instruments recorded around provider calls
///
/// Backed by the global meter; recording is a no-op until a meter provider
/// is installed by [`crate::init`].
#[derive(Clone)]
pub struct LlmMetrics {
    requests: Counter<u64>,
    duration: Histogram<f64>,
    tokens: Counter<u64>,
    cost: Counter<f64>,
    failovers: Counter<u64>,
}

impl LlmMetrics {
    /// Create instruments on the global `alpharoute` meter
    pub fn new() -> Self {
        let meter = global::meter("alpharoute");
        Self {
            requests: meter.u64_counter(LLM_REQUEST_COUNT).build(),
            duration: meter
                .f64_histogram(LLM_REQUEST_DURATION)
                .with_unit("s")
                .build(),
            tokens: meter.u64_counter(LLM_TOKEN_USAGE).build(),
            cost: meter.f64_counter(LLM_COST).with_unit("USD").build(),
            failovers: meter.u64_counter(LLM_FAILOVER_COUNT).build(),
        }
    }

    /// Record one provider call
    pub fn record_call(&self, provider: &str, model: &str, success: bool, elapsed: Duration) {
        let attrs = [
            KeyValue::new("provider", provider.to_owned()),
            KeyValue::new("model", model.to_owned()),
            KeyValue::new("success", success),
        ];
        self.requests.add(1, &attrs);
        self.duration.record(elapsed.as_secs_f64(), &attrs);
    }

    /// Record token usage and cost of a successful call
    pub fn record_usage(&self, provider: &str, model: &str, tokens: u64, cost: f64) {
        let attrs = [
            KeyValue::new("provider", provider.to_owned()),
            KeyValue::new("model", model.to_owned()),
        ];
        self.tokens.add(tokens, &attrs);
        self.cost.add(cost, &attrs);
    }

    /// Record a move from one provider to another
    pub fn record_failover(&self, from: &str, to: &str) {
        self.failovers.add(
            1,
            &[
                KeyValue::new("from", from.to_owned()),
                KeyValue::new("to", to.to_owned()),
            ],
        );
    }
}

impl Default for LlmMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LlmMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmMetrics").finish_non_exhaustive()
    }
}
