//! Provider transports and the unified LLM client for alpharoute
//!
//! Wraps a self-hosted OpenAI-compatible server and the hosted `OpenAI` and
//! Anthropic APIs behind one `analyze` call with routing, retries,
//! cross-provider failover and running statistics.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod backoff;
pub mod client;
pub mod context;
pub mod error;
pub mod pricing;
pub mod protocol;
pub mod transport;
pub mod types;

pub use backoff::{RecordingSleeper, RetryKind, Sleeper, TokioSleeper};
pub use client::{
    AnalysisRequest, AnalysisResponse, ClientStats, Completion, Execution, LlmClient, LlmClientBuilder,
    PerformanceReport, ProviderAttempt, ProviderStats, RoutingConstraints, estimate_tokens,
};
pub use context::{RouterContext, RouterContextBuilder};
pub use error::LlmError;
pub use pricing::PricingTable;
pub use transport::{ProviderTransport, TransportOptions, build_transport};
pub use types::{ChatMessage, ChatRequest, HealthStatus, ModelInfo, RawResponse, Role, Usage, UsageStats};
