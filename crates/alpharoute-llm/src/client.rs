//! Unified LLM client
//!
//! One `analyze` entry point over every configured provider transport. A
//! call is routed (or falls back to static selection), retried on the
//! chosen provider, failed over to distinct providers in turn, and its
//! outcome fed back into the stores and running statistics.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};

use alpharoute_config::{LlmConfig, PrivacyTier, StrategyPreset};
use alpharoute_routing::{
    ExecutionFeedback, HealthCache, PerformanceFeedback, Priority, RoutingDecision, RoutingRequest, RoutingWeights,
    ScoreBreakdown, TaskPerformance, TaskRouter,
};
use alpharoute_telemetry::LlmMetrics;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use uuid::Uuid;

use crate::backoff::{self, Sleeper, TokioSleeper};
use crate::error::LlmError;
use crate::pricing::PricingTable;
use crate::transport::{ProviderTransport, TransportOptions, build_transport};
use crate::types::{ChatMessage, ChatRequest, HealthStatus, RawResponse, Usage, UsageStats};

static BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| tiktoken_rs::o200k_base().ok());

/// Estimate token count using tiktoken
pub fn estimate_tokens(text: &str) -> usize {
    BPE.as_ref()
        .map_or_else(|| text.len() / 4, |bpe| bpe.encode_with_special_tokens(text).len())
}

/// Optional routing inputs supplied by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConstraints {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub requires_high_quality: bool,
    #[serde(default)]
    pub max_latency_ms: Option<f64>,
    /// Ceiling on the expected cost of the call, in USD
    #[serde(default)]
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub privacy_requirement: Option<PrivacyTier>,
    #[serde(default)]
    pub custom_weights: Option<RoutingWeights>,
    #[serde(default)]
    pub strategy: Option<StrategyPreset>,
    #[serde(default)]
    pub preferred_providers: Vec<String>,
}

impl RoutingConstraints {
    /// Routing request for a task of `estimated_tokens` input tokens
    pub fn to_request(&self, task_type: &str, estimated_tokens: usize) -> RoutingRequest {
        RoutingRequest {
            task_type: task_type.to_owned(),
            estimated_tokens,
            priority: self.priority,
            requires_high_quality: self.requires_high_quality,
            max_acceptable_latency_ms: self.max_latency_ms,
            max_acceptable_cost: self.max_cost,
            privacy_requirement: self.privacy_requirement,
            custom_weights: self.custom_weights,
            strategy: self.strategy,
            preferred_providers: self.preferred_providers.clone(),
        }
    }
}

/// One analysis ask
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub prompt: String,
    /// Key into the task metadata store
    pub task_type: String,
    /// Rendered into a system message ahead of the prompt
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub constraints: RoutingConstraints,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            task_type: task_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_constraints(mut self, constraints: RoutingConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Messages sent to the provider: system prompt, context, then the prompt
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(3);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        if !self.context.is_empty() {
            let context = serde_json::Value::Object(self.context.clone());
            messages.push(ChatMessage::system(format!("Context:\n{context}")));
        }
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }

    fn chat_request(&self) -> ChatRequest {
        ChatRequest {
            messages: self.messages(),
            model: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Measurements of a successful call
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub provider: String,
    pub model: String,
    /// Latency of the call that succeeded
    pub latency_ms: f64,
    /// Wall time of the whole `analyze` call
    pub total_latency_ms: f64,
    /// Input size the routing decision was based on
    pub estimated_input_tokens: usize,
    pub usage: Usage,
    pub cost: f64,
    /// Distinct providers tried
    pub provider_attempts: usize,
    /// Provider calls made, retries included
    pub calls: u32,
}

/// Structured outcome of `analyze`
///
/// Provider failures are reported here with `success == false`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub content: String,
    /// Always present on success
    pub routing_decision: Option<RoutingDecision>,
    /// Always present on success
    pub performance: Option<PerformanceReport>,
    pub error: Option<String>,
    /// Providers in the order they were tried
    pub attempted_providers: Vec<String>,
}

impl AnalysisResponse {
    fn failure(error: impl Into<String>, routing_decision: Option<RoutingDecision>, attempted: Vec<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            routing_decision,
            performance: None,
            error: Some(error.into()),
            attempted_providers: attempted,
        }
    }
}

/// A successful provider call
#[derive(Debug, Clone)]
pub struct Completion {
    pub provider: String,
    /// Model requested from the provider
    pub model: String,
    pub response: RawResponse,
    pub latency: Duration,
    pub cost: f64,
}

/// Calls made to one provider within a request
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub model: String,
    /// Calls made, retries included
    pub calls: u32,
    /// Latency of the last call
    pub latency_ms: f64,
    /// Last error, `None` when the provider served the request
    pub error: Option<String>,
}

/// Result of running one request through selection, retry and failover
#[derive(Debug, Clone)]
pub struct Execution {
    pub completion: Option<Completion>,
    pub attempts: Vec<ProviderAttempt>,
    /// Aggregated failure message when nothing succeeded
    pub error: Option<String>,
}

impl Execution {
    /// Providers in the order they were tried
    pub fn attempted_providers(&self) -> Vec<String> {
        self.attempts.iter().map(|a| a.provider.clone()).collect()
    }

    fn calls(&self) -> u32 {
        self.attempts.iter().map(|a| a.calls).sum()
    }
}

/// Running totals for one provider
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProviderStats {
    /// Successful calls
    pub requests: u64,
    /// Failed calls
    pub failures: u64,
    pub tokens: u64,
    pub cost: f64,
    /// Counters of the transport itself
    pub transport: UsageStats,
}

/// Running totals across every successful call
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientStats {
    pub request_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_latency_ms: f64,
    pub per_provider: BTreeMap<String, ProviderStats>,
}

#[derive(Debug, Default)]
struct Totals {
    request_count: u64,
    total_tokens: u64,
    total_cost: f64,
    total_latency_ms: f64,
    per_provider: BTreeMap<String, ProviderStats>,
}

/// What the router expected of a (provider, model)
#[derive(Debug, Clone, Copy)]
struct Prediction {
    cost: f64,
    latency_ms: f64,
    quality: f64,
}

/// Builder for [`LlmClient`]
pub struct LlmClientBuilder {
    config: LlmConfig,
    router: Option<Arc<TaskRouter>>,
    feedback: Option<Arc<PerformanceFeedback>>,
    health: Option<Arc<HealthCache>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    transports: Vec<Arc<dyn ProviderTransport>>,
}

impl LlmClientBuilder {
    /// Route calls through `router`; its health cache is shared
    #[must_use]
    pub fn router(mut self, router: Arc<TaskRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Record predicted vs. actual outcomes into `feedback`
    #[must_use]
    pub fn feedback(mut self, feedback: Arc<PerformanceFeedback>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    #[must_use]
    pub fn health(mut self, health: Arc<HealthCache>) -> Self {
        self.health = Some(health);
        self
    }

    /// Sleep implementation used between attempts
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Use `transport` instead of building one for its provider name
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn ProviderTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Build transports for every configured provider not supplied directly
    ///
    /// # Errors
    ///
    /// `Configuration` if a provider's transport cannot be built
    pub fn build(self) -> Result<LlmClient, LlmError> {
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let options = TransportOptions::from_config(&self.config)
            .with_sleeper(Arc::clone(&sleeper))
            .with_caller_retries();

        let mut transports: IndexMap<String, Arc<dyn ProviderTransport>> = self
            .transports
            .into_iter()
            .map(|t| (t.name().to_owned(), t))
            .collect();

        for (name, provider) in &self.config.providers {
            if !transports.contains_key(name) {
                transports.insert(name.clone(), build_transport(name, provider, &options)?);
            }
        }

        let health = self
            .health
            .or_else(|| self.router.as_ref().map(|r| Arc::clone(r.health())))
            .unwrap_or_else(|| Arc::new(HealthCache::new(self.config.health_check_interval())));

        tracing::debug!(
            providers = ?transports.keys().collect::<Vec<_>>(),
            intelligent_routing = self.config.enable_intelligent_routing,
            "LLM client initialized"
        );

        Ok(LlmClient {
            pricing: PricingTable::from_config(&self.config),
            config: self.config,
            transports,
            router: self.router,
            feedback: self.feedback,
            health,
            sleeper,
            metrics: LlmMetrics::new(),
            totals: Mutex::new(Totals::default()),
        })
    }
}

/// Single entry point over every provider transport
pub struct LlmClient {
    config: LlmConfig,
    transports: IndexMap<String, Arc<dyn ProviderTransport>>,
    router: Option<Arc<TaskRouter>>,
    feedback: Option<Arc<PerformanceFeedback>>,
    health: Arc<HealthCache>,
    pricing: PricingTable,
    sleeper: Arc<dyn Sleeper>,
    metrics: LlmMetrics,
    totals: Mutex<Totals>,
}

impl LlmClient {
    pub fn builder(config: LlmConfig) -> LlmClientBuilder {
        LlmClientBuilder {
            config,
            router: None,
            feedback: None,
            health: None,
            sleeper: None,
            transports: Vec::new(),
        }
    }

    /// Client over the configured providers without routing or feedback
    ///
    /// # Errors
    ///
    /// `Configuration` if a provider's transport cannot be built
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        Self::builder(config).build()
    }

    pub const fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Configured provider names
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.transports.keys().map(String::as_str)
    }

    pub fn transport(&self, provider: &str) -> Option<&Arc<dyn ProviderTransport>> {
        self.transports.get(provider)
    }

    pub const fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    /// Analyze a prompt on the best available provider
    ///
    /// Provider and network failures never surface as `Err`; they come back
    /// as a response with `success == false`.
    ///
    /// # Errors
    ///
    /// `Configuration` when no provider transport exists at all
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, LlmError> {
        let started = Instant::now();

        if request.prompt.trim().is_empty() {
            return Ok(AnalysisResponse::failure(
                LlmError::InvalidRequest("prompt must not be empty".to_owned()).to_string(),
                None,
                Vec::new(),
            ));
        }

        let chat = request.chat_request();
        let text = chat
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let input_tokens = estimate_tokens(&text);

        let plan = self.plan(request, input_tokens).await;
        let decision = plan.as_ref().ok();
        let execution = self
            .execute_request(&chat, decision, request.constraints.privacy_requirement)
            .await?;

        let attempted = execution.attempted_providers();
        let calls = execution.calls();
        self.record_failed_attempts(request, decision, &execution.attempts, input_tokens)
            .await;

        let Some(completion) = execution.completion else {
            let error = execution.error.unwrap_or_else(|| "no provider was attempted".to_owned());
            tracing::error!(task_type = %request.task_type, attempted = ?attempted, %error, "analysis failed");
            return Ok(AnalysisResponse::failure(error, plan.ok(), attempted));
        };

        let prediction = decision.and_then(|d| self.prediction_for(d, &completion.provider, &completion.model, input_tokens));
        let routing_decision = match plan {
            Ok(decision) => with_failover(decision, &completion, &execution.attempts, prediction),
            Err(reason) => legacy_decision(&request.task_type, &completion, &reason),
        };

        if let Some(prediction) = prediction {
            self.record_feedback(
                &routing_decision,
                &completion.provider,
                &completion.model,
                prediction,
                completion.cost,
                completion.latency.as_secs_f64() * 1000.0,
                true,
            );
        }
        self.record_task_performance(
            request,
            &completion.provider,
            &completion.model,
            completion.latency.as_secs_f64() * 1000.0,
            true,
            completion.cost,
        )
        .await;

        tracing::info!(
            task_type = %request.task_type,
            provider = %completion.provider,
            model = %completion.model,
            tokens = completion.response.usage.total(),
            cost = completion.cost,
            latency_ms = completion.latency.as_millis(),
            "analysis completed"
        );

        let performance = PerformanceReport {
            provider: completion.provider,
            model: completion.model,
            latency_ms: completion.latency.as_secs_f64() * 1000.0,
            total_latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            estimated_input_tokens: input_tokens,
            usage: completion.response.usage,
            cost: completion.cost,
            provider_attempts: attempted.len(),
            calls,
        };

        Ok(AnalysisResponse {
            success: true,
            content: completion.response.content,
            routing_decision: Some(routing_decision),
            performance: Some(performance),
            error: None,
            attempted_providers: attempted,
        })
    }

    /// Route the request, or say why legacy selection applies
    async fn plan(&self, request: &AnalysisRequest, input_tokens: usize) -> Result<RoutingDecision, String> {
        if !self.config.enable_intelligent_routing {
            return Err("intelligent routing disabled".to_owned());
        }
        let Some(router) = &self.router else {
            return Err("no task router configured".to_owned());
        };

        self.refresh_health().await;
        let routing_request = request.constraints.to_request(&request.task_type, input_tokens);
        router.route(&routing_request).await.map_err(|e| {
            tracing::warn!(task_type = %request.task_type, error = %e, "routing failed; using legacy provider selection");
            format!("routing failed: {e}")
        })
    }

    /// Provider for the next call
    ///
    /// With intelligent routing on, the first healthy provider in priority
    /// order wins, falling back to any provider when none is healthy. With
    /// it off, the configured default provider is used, else the first in
    /// fixed preference order.
    ///
    /// # Errors
    ///
    /// `Configuration` when no provider transport exists
    pub async fn select_provider(&self) -> Result<String, LlmError> {
        self.select_excluding(&[], None)
            .await?
            .ok_or_else(|| LlmError::Configuration("no provider transports initialized".to_owned()))
    }

    async fn select_excluding(&self, exclude: &[String], privacy: Option<PrivacyTier>) -> Result<Option<String>, LlmError> {
        if self.transports.is_empty() {
            return Err(LlmError::Configuration("no provider transports initialized".to_owned()));
        }

        if !self.config.enable_intelligent_routing {
            if let Some(default) = &self.config.provider
                && self.is_eligible(default, exclude, privacy)
            {
                return Ok(Some(default.clone()));
            }
            return Ok(self
                .preference_order()
                .into_iter()
                .find(|name| self.is_eligible(name, exclude, privacy)));
        }

        self.refresh_health().await;
        let order = self.priority_order();
        if let Some(name) = order
            .iter()
            .find(|name| self.is_eligible(name, exclude, privacy) && self.health.is_healthy(name))
        {
            return Ok(Some(name.clone()));
        }

        let fallback = order.into_iter().find(|name| self.is_eligible(name, exclude, privacy));
        if let Some(name) = &fallback {
            tracing::warn!(provider = %name, "no healthy provider available, using an unhealthy one");
        }
        Ok(fallback)
    }

    fn is_eligible(&self, name: &str, exclude: &[String], privacy: Option<PrivacyTier>) -> bool {
        let Some(transport) = self.transports.get(name) else {
            return false;
        };
        !exclude.iter().any(|e| e == name) && privacy.is_none_or(|req| transport.kind().privacy_tier().satisfies(req))
    }

    /// Transports in fixed kind order: self-hosted, hosted-A, hosted-B
    fn preference_order(&self) -> Vec<String> {
        let mut names: Vec<(&String, u8)> = self
            .transports
            .iter()
            .map(|(name, t)| (name, t.kind().preference_rank()))
            .collect();
        names.sort_by_key(|(_, rank)| *rank);
        names.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Configured priority, then any remaining transports by preference
    fn priority_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self
            .config
            .effective_priority()
            .into_iter()
            .filter(|name| self.transports.contains_key(name))
            .collect();
        for name in self.preference_order() {
            if !order.contains(&name) {
                order.push(name);
            }
        }
        order
    }

    /// Probe every transport when the shared health cache is stale
    async fn refresh_health(&self) {
        let names: Vec<String> = self.transports.keys().cloned().collect();
        let transports = &self.transports;
        self.health
            .refresh_if_stale(&names, |name| {
                let transport = transports.get(&name).cloned();
                async move {
                    match transport {
                        Some(transport) => transport.health_check(false).await.healthy,
                        None => false,
                    }
                }
            })
            .await;
    }

    /// Run a request with per-provider retries and cross-provider failover
    ///
    /// Providers from `decision` are tried first, in decision order, then
    /// whatever selection yields. No provider is tried twice and attempts
    /// are strictly sequential.
    ///
    /// # Errors
    ///
    /// `Configuration` when no provider transport exists
    pub async fn execute_request(
        &self,
        request: &ChatRequest,
        decision: Option<&RoutingDecision>,
        privacy: Option<PrivacyTier>,
    ) -> Result<Execution, LlmError> {
        if self.transports.is_empty() {
            return Err(LlmError::Configuration("no provider transports initialized".to_owned()));
        }
        if let Err(e) = request.validated() {
            return Ok(Execution {
                completion: None,
                attempts: Vec::new(),
                error: Some(e.to_string()),
            });
        }

        let max_providers = if self.config.fallback_on_error {
            self.config.max_failover_providers.max(1)
        } else {
            1
        };
        let mut planned: VecDeque<String> = decision.map(RoutingDecision::provider_order).unwrap_or_default().into();
        let mut tried: Vec<String> = Vec::new();
        let mut attempts: Vec<ProviderAttempt> = Vec::new();

        while tried.len() < max_providers {
            let next = match self.next_planned(&mut planned, &tried, privacy) {
                Some(name) => Some(name),
                None => self.select_excluding(&tried, privacy).await?,
            };
            let Some(provider) = next else {
                break;
            };
            let Some(transport) = self.transports.get(&provider).cloned() else {
                break;
            };

            let model = decision
                .and_then(|d| d.model_for(&provider))
                .map_or_else(|| transport.default_model().to_owned(), str::to_owned);

            if let Some(previous) = tried.last() {
                tracing::warn!(
                    from_provider = %previous,
                    to_provider = %provider,
                    to_model = %model,
                    "failing over to next provider"
                );
                self.metrics.record_failover(previous, &provider);
            }
            tried.push(provider.clone());

            let (attempt, completion) = self.call_provider(&provider, &transport, &model, request).await;
            attempts.push(attempt);
            if let Some(completion) = completion {
                return Ok(Execution {
                    completion: Some(completion),
                    attempts,
                    error: None,
                });
            }

            if self.config.enable_intelligent_routing {
                self.health.mark_unhealthy(&provider);
            }
        }

        let error = if attempts.is_empty() {
            privacy.map_or_else(
                || "no provider available".to_owned(),
                |tier| format!("no configured provider satisfies privacy requirement '{tier}'"),
            )
        } else {
            let failures = attempts
                .iter()
                .map(|a| {
                    format!(
                        "{} ({}): {}",
                        a.provider,
                        a.model,
                        a.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            format!("all providers failed: {failures}")
        };

        Ok(Execution {
            completion: None,
            attempts,
            error: Some(error),
        })
    }

    fn next_planned(&self, planned: &mut VecDeque<String>, tried: &[String], privacy: Option<PrivacyTier>) -> Option<String> {
        while let Some(name) = planned.pop_front() {
            if self.is_eligible(&name, tried, privacy) {
                return Some(name);
            }
        }
        None
    }

    /// Call one provider up to `max_retries` times
    async fn call_provider(
        &self,
        provider: &str,
        transport: &Arc<dyn ProviderTransport>,
        model: &str,
        request: &ChatRequest,
    ) -> (ProviderAttempt, Option<Completion>) {
        let request = request.clone().with_model(model);
        let max_attempts = self.config.max_retries.max(1);
        let mut calls = 0;
        let mut latency = Duration::ZERO;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            calls += 1;
            let started = Instant::now();
            let result = transport.chat_completion(&request).await;
            latency = started.elapsed();
            self.metrics.record_call(provider, model, result.is_ok(), latency);

            let error = match result {
                Ok(response) => {
                    let cost = self.pricing.cost(provider, model, &response.usage);
                    let completion = Completion {
                        provider: provider.to_owned(),
                        model: model.to_owned(),
                        response,
                        latency,
                        cost,
                    };
                    self.record_success(&completion);
                    let attempt = ProviderAttempt {
                        provider: provider.to_owned(),
                        model: model.to_owned(),
                        calls,
                        latency_ms: latency.as_secs_f64() * 1000.0,
                        error: None,
                    };
                    return (attempt, Some(completion));
                }
                Err(e) => e,
            };
            self.record_failure(provider);

            let Some(kind) = error.retry_kind() else {
                tracing::warn!(provider, model, error = %error, "provider failed with a non-retryable error");
                last_error = Some(error);
                break;
            };

            if attempt + 1 < max_attempts {
                let wait = backoff::delay_with_hint(self.config.retry_delay(), attempt, kind, error.retry_after());
                tracing::warn!(
                    provider,
                    model,
                    attempt = attempt + 1,
                    delay_ms = wait.as_millis(),
                    error = %error,
                    "provider call failed, retrying"
                );
                self.sleeper.sleep(wait).await;
            } else {
                tracing::warn!(provider, model, attempts = calls, error = %error, "provider retries exhausted");
            }
            last_error = Some(error);
        }

        let attempt = ProviderAttempt {
            provider: provider.to_owned(),
            model: model.to_owned(),
            calls,
            latency_ms: latency.as_secs_f64() * 1000.0,
            error: Some(last_error.map_or_else(|| "no attempt made".to_owned(), |e| e.to_string())),
        };
        (attempt, None)
    }

    /// Call a provider directly, without routing, retries or failover
    ///
    /// # Errors
    ///
    /// `ProviderNotFound` for an unknown provider, otherwise whatever the
    /// transport reports
    pub async fn complete_with(&self, provider: &str, request: &ChatRequest) -> Result<Completion, LlmError> {
        let transport = self.transports.get(provider).ok_or_else(|| LlmError::ProviderNotFound {
            provider: provider.to_owned(),
        })?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| transport.default_model().to_owned());

        let started = Instant::now();
        let result = transport.chat_completion(request).await;
        let latency = started.elapsed();
        self.metrics.record_call(provider, &model, result.is_ok(), latency);

        match result {
            Ok(response) => {
                let cost = self.pricing.cost(provider, &model, &response.usage);
                let completion = Completion {
                    provider: provider.to_owned(),
                    model,
                    response,
                    latency,
                    cost,
                };
                self.record_success(&completion);
                Ok(completion)
            }
            Err(e) => {
                self.record_failure(provider);
                Err(e)
            }
        }
    }

    fn record_success(&self, completion: &Completion) {
        let tokens = completion.response.usage.total();
        self.metrics
            .record_usage(&completion.provider, &completion.model, tokens, completion.cost);

        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.request_count += 1;
        totals.total_tokens += tokens;
        totals.total_cost += completion.cost;
        totals.total_latency_ms += completion.latency.as_secs_f64() * 1000.0;

        let provider = totals.per_provider.entry(completion.provider.clone()).or_default();
        provider.requests += 1;
        provider.tokens += tokens;
        provider.cost += completion.cost;
    }

    fn record_failure(&self, provider: &str) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.per_provider.entry(provider.to_owned()).or_default().failures += 1;
    }

    /// What the decision expected of a (provider, model) it ranked
    fn prediction_for(&self, decision: &RoutingDecision, provider: &str, model: &str, input_tokens: usize) -> Option<Prediction> {
        if decision.selected_provider == provider && decision.selected_model == model {
            return Some(Prediction {
                cost: decision.expected_cost,
                latency_ms: decision.expected_latency_ms,
                quality: decision.expected_quality_score,
            });
        }

        let router = self.router.as_ref()?;
        let descriptor = decision
            .fallback_options
            .iter()
            .find(|d| d.provider == provider && d.model_id == model)?;
        Some(Prediction {
            cost: descriptor.estimate_cost(input_tokens, router.expected_output_tokens(input_tokens)),
            latency_ms: descriptor.avg_latency_ms,
            quality: descriptor.capability_score,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn record_feedback(
        &self,
        decision: &RoutingDecision,
        provider: &str,
        model: &str,
        prediction: Prediction,
        actual_cost: f64,
        actual_latency_ms: f64,
        success: bool,
    ) {
        let Some(feedback) = &self.feedback else {
            return;
        };
        feedback.record_execution_feedback(ExecutionFeedback {
            decision_id: Some(decision.decision_id),
            provider: provider.to_owned(),
            model_id: model.to_owned(),
            task_type: decision.task_type.clone(),
            strategy: decision.strategy,
            predicted_cost: prediction.cost,
            actual_cost,
            predicted_latency_ms: prediction.latency_ms,
            actual_latency_ms,
            predicted_quality: prediction.quality,
            actual_quality: None,
            execution_success: success,
            recorded_at: jiff::Timestamp::now(),
        });
    }

    async fn record_task_performance(
        &self,
        request: &AnalysisRequest,
        provider: &str,
        model: &str,
        latency_ms: f64,
        success: bool,
        cost: f64,
    ) {
        let Some(router) = &self.router else {
            return;
        };
        let performance = TaskPerformance {
            task_type: request.task_type.clone(),
            provider: provider.to_owned(),
            model: model.to_owned(),
            latency_ms,
            success,
            quality_score: None,
            cost,
            metadata: serde_json::Value::Object(request.context.clone()),
        };
        if let Err(e) = router.tasks().record_task_performance(performance).await {
            tracing::warn!(task_type = %request.task_type, error = %e, "failed to record task performance");
        }
    }

    async fn record_failed_attempts(
        &self,
        request: &AnalysisRequest,
        decision: Option<&RoutingDecision>,
        attempts: &[ProviderAttempt],
        input_tokens: usize,
    ) {
        for attempt in attempts.iter().filter(|a| a.error.is_some()) {
            if let Some(decision) = decision
                && let Some(prediction) = self.prediction_for(decision, &attempt.provider, &attempt.model, input_tokens)
            {
                self.record_feedback(
                    decision,
                    &attempt.provider,
                    &attempt.model,
                    prediction,
                    0.0,
                    attempt.latency_ms,
                    false,
                );
            }
            self.record_task_performance(request, &attempt.provider, &attempt.model, attempt.latency_ms, false, 0.0)
                .await;
        }
    }

    /// Running totals plus each transport's counters
    pub fn stats(&self) -> ClientStats {
        let totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        let per_provider = self
            .transports
            .iter()
            .map(|(name, transport)| {
                let mut stats = totals.per_provider.get(name).copied().unwrap_or_default();
                stats.transport = transport.get_stats();
                (name.clone(), stats)
            })
            .collect();

        ClientStats {
            request_count: totals.request_count,
            total_tokens: totals.total_tokens,
            total_cost: totals.total_cost,
            average_latency_ms: if totals.request_count == 0 {
                0.0
            } else {
                totals.total_latency_ms / totals.request_count as f64
            },
            per_provider,
        }
    }

    /// Health of every provider, recorded into the shared cache
    pub async fn health_report(&self, force: bool) -> Vec<HealthStatus> {
        let mut report = Vec::with_capacity(self.transports.len());
        for (name, transport) in &self.transports {
            let status = transport.health_check(force).await;
            self.health.record(name, status.healthy);
            report.push(status);
        }
        report
    }

    /// Close every transport; idempotent
    pub async fn close(&self) {
        for transport in self.transports.values() {
            transport.close().await;
        }
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("providers", &self.transports.keys().collect::<Vec<_>>())
            .field("intelligent_routing", &self.config.enable_intelligent_routing)
            .field("routed", &self.router.is_some())
            .finish_non_exhaustive()
    }
}

/// Point the decision at the provider that actually served the request
fn with_failover(
    mut decision: RoutingDecision,
    completion: &Completion,
    attempts: &[ProviderAttempt],
    prediction: Option<Prediction>,
) -> RoutingDecision {
    if decision.selected_provider == completion.provider && decision.selected_model == completion.model {
        return decision;
    }

    let failed = attempts
        .iter()
        .filter(|a| a.error.is_some())
        .map(|a| a.provider.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let _ = write!(
        decision.reasoning,
        "; failed over to {}/{} after {failed} failed",
        completion.provider, completion.model
    );

    if let Some(prediction) = prediction {
        decision.expected_cost = prediction.cost;
        decision.expected_latency_ms = prediction.latency_ms;
        decision.expected_quality_score = prediction.quality;
    }
    decision
        .fallback_options
        .retain(|d| !(d.provider == completion.provider && d.model_id == completion.model));
    decision.selected_provider.clone_from(&completion.provider);
    decision.selected_model.clone_from(&completion.model);
    decision
}

/// Decision record for a call served without the task router
fn legacy_decision(task_type: &str, completion: &Completion, reason: &str) -> RoutingDecision {
    RoutingDecision {
        decision_id: Uuid::new_v4(),
        task_type: task_type.to_owned(),
        selected_provider: completion.provider.clone(),
        selected_model: completion.model.clone(),
        strategy: None,
        weights: RoutingWeights::default(),
        reasoning: format!(
            "legacy provider selection ({reason}): served by {}/{}",
            completion.provider, completion.model
        ),
        confidence_score: 0.0,
        expected_cost: completion.cost,
        expected_latency_ms: completion.latency.as_secs_f64() * 1000.0,
        expected_quality_score: 0.0,
        scores: ScoreBreakdown::default(),
        fallback_options: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use alpharoute_config::{FeedbackConfig, ProviderConfig, ProviderKind, RoutingConfig};
    use alpharoute_routing::{
        InMemoryCapabilityStore, InMemoryTaskStore, ModelCapabilityStore, ProviderDescriptor, TaskMetadataStore,
    };
    use async_trait::async_trait;

    use super::*;
    use crate::backoff::RecordingSleeper;
    use crate::types::ModelInfo;

    #[derive(Debug)]
    struct ScriptedTransport {
        name: String,
        kind: ProviderKind,
        model: String,
        /// Returned from every call
        outcome: Result<RawResponse, LlmError>,
        calls: AtomicU32,
        last_request: Mutex<Option<ChatRequest>>,
    }

    impl ScriptedTransport {
        fn new(name: &str, kind: ProviderKind, outcome: Result<RawResponse, LlmError>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                kind,
                model: format!("{name}-default"),
                outcome,
                calls: AtomicU32::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn ok(name: &str, kind: ProviderKind) -> Arc<Self> {
            Self::new(name, kind, Ok(reply(&format!("from {name}"))))
        }

        fn failing(name: &str, kind: ProviderKind, error: LlmError) -> Arc<Self> {
            Self::new(name, kind, Err(error))
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderTransport for ScriptedTransport {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn default_model(&self) -> &str {
            &self.model
        }

        async fn chat_completion(&self, request: &ChatRequest) -> Result<RawResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            self.outcome.clone()
        }

        async fn health_check(&self, _force: bool) -> HealthStatus {
            HealthStatus::healthy(&self.name)
        }

        async fn get_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
            Ok(Vec::new())
        }

        fn get_stats(&self) -> UsageStats {
            UsageStats::default()
        }

        async fn close(&self) {}
    }

    fn reply(content: &str) -> RawResponse {
        RawResponse {
            content: content.to_owned(),
            model: "reported".to_owned(),
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
            finish_reason: Some("stop".to_owned()),
        }
    }

    fn server_error() -> LlmError {
        LlmError::ProviderApi {
            status: 500,
            message: "boom".to_owned(),
        }
    }

    fn legacy_config(transports: &[&Arc<ScriptedTransport>]) -> LlmConfig {
        let mut config = LlmConfig {
            enable_intelligent_routing: false,
            retry_delay: 0.5,
            ..LlmConfig::default()
        };
        for t in transports {
            config.providers.insert(t.name.clone(), ProviderConfig::new(t.kind));
        }
        config
    }

    fn client(config: LlmConfig, transports: &[&Arc<ScriptedTransport>], sleeper: Arc<RecordingSleeper>) -> LlmClient {
        let mut builder = LlmClient::builder(config).sleeper(sleeper);
        for t in transports {
            builder = builder.transport(Arc::clone(t) as Arc<dyn ProviderTransport>);
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn fails_over_after_exhausting_retries() {
        let a = ScriptedTransport::failing("a", ProviderKind::GptOss, server_error());
        let b = ScriptedTransport::ok("b", ProviderKind::Openai);
        let client = client(legacy_config(&[&a, &b]), &[&a, &b], Arc::new(RecordingSleeper::new()));

        let response = client.analyze(&AnalysisRequest::new("BTC outlook?", "analysis")).await.unwrap();

        assert!(response.success);
        assert_eq!(response.content, "from b");
        assert_eq!(response.attempted_providers, vec!["a", "b"]);
        let decision = response.routing_decision.unwrap();
        assert_eq!(decision.selected_provider, "b");
        assert!(decision.reasoning.contains("legacy"));
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 1);

        let performance = response.performance.unwrap();
        assert_eq!(performance.calls, 4);
        assert_eq!(performance.provider_attempts, 2);
    }

    #[tokio::test]
    async fn never_attempts_a_provider_twice() {
        let a = ScriptedTransport::failing("a", ProviderKind::GptOss, server_error());
        let b = ScriptedTransport::failing("b", ProviderKind::Openai, server_error());
        let c = ScriptedTransport::failing("c", ProviderKind::Anthropic, server_error());
        let mut config = legacy_config(&[&a, &b, &c]);
        config.max_failover_providers = 10;
        config.max_retries = 1;
        let client = client(config, &[&a, &b, &c], Arc::new(RecordingSleeper::new()));

        let response = client.analyze(&AnalysisRequest::new("hi", "analysis")).await.unwrap();

        assert!(!response.success);
        assert_eq!(response.attempted_providers, vec!["a", "b", "c"]);
        let error = response.error.unwrap();
        assert!(error.contains("a (a-default)"));
        assert!(error.contains("c (c-default)"));
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn client_errors_fail_over_without_retry() {
        let a = ScriptedTransport::failing(
            "a",
            ProviderKind::GptOss,
            LlmError::ProviderApi {
                status: 404,
                message: "model not found".to_owned(),
            },
        );
        let b = ScriptedTransport::ok("b", ProviderKind::Openai);
        let client = client(legacy_config(&[&a, &b]), &[&a, &b], Arc::new(RecordingSleeper::new()));

        let response = client.analyze(&AnalysisRequest::new("hi", "analysis")).await.unwrap();

        assert!(response.success);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_delays_grow() {
        let a = ScriptedTransport::failing("a", ProviderKind::GptOss, LlmError::RateLimited { retry_after: None });
        let b = ScriptedTransport::ok("b", ProviderKind::Openai);
        let mut config = legacy_config(&[&a, &b]);
        config.max_retries = 4;
        let sleeper = Arc::new(RecordingSleeper::new());
        let client = client(config, &[&a, &b], Arc::clone(&sleeper));

        let response = client.analyze(&AnalysisRequest::new("hi", "analysis")).await.unwrap();

        assert!(response.success);
        assert_eq!(a.calls(), 4);
        let delays = sleeper.delays();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[0], Duration::from_millis(500));
    }

    #[tokio::test]
    async fn failover_can_be_disabled() {
        let a = ScriptedTransport::failing("a", ProviderKind::GptOss, server_error());
        let b = ScriptedTransport::ok("b", ProviderKind::Openai);
        let mut config = legacy_config(&[&a, &b]);
        config.fallback_on_error = false;
        let client = client(config, &[&a, &b], Arc::new(RecordingSleeper::new()));

        let response = client.analyze(&AnalysisRequest::new("hi", "analysis")).await.unwrap();

        assert!(!response.success);
        assert_eq!(response.attempted_providers, vec!["a"]);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn default_provider_wins_in_legacy_mode() {
        let a = ScriptedTransport::ok("a", ProviderKind::GptOss);
        let b = ScriptedTransport::ok("b", ProviderKind::Openai);
        let mut config = legacy_config(&[&a, &b]);
        config.provider = Some("b".to_owned());
        let client = client(config, &[&a, &b], Arc::new(RecordingSleeper::new()));

        assert_eq!(client.select_provider().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn no_transports_is_a_configuration_error() {
        let client = LlmClient::from_config(LlmConfig::default()).unwrap();

        let err = client.analyze(&AnalysisRequest::new("hi", "analysis")).await.unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));
        assert!(client.select_provider().await.is_err());
    }

    #[tokio::test]
    async fn empty_prompt_is_a_failed_response() {
        let a = ScriptedTransport::ok("a", ProviderKind::GptOss);
        let client = client(legacy_config(&[&a]), &[&a], Arc::new(RecordingSleeper::new()));

        let response = client.analyze(&AnalysisRequest::new("  ", "analysis")).await.unwrap();

        assert!(!response.success);
        assert!(response.error.unwrap().contains("prompt"));
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn context_is_rendered_before_the_prompt() {
        let a = ScriptedTransport::ok("a", ProviderKind::GptOss);
        let client = client(legacy_config(&[&a]), &[&a], Arc::new(RecordingSleeper::new()));

        let request = AnalysisRequest::new("Summarize", "analysis")
            .with_system_prompt("You are an analyst")
            .with_context("symbol", serde_json::json!("BTC"));
        client.analyze(&request).await.unwrap();

        let sent = a.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(sent.messages.len(), 3);
        assert_eq!(sent.messages[1].content, "Context:\n{\"symbol\":\"BTC\"}");
        assert_eq!(sent.messages[2], ChatMessage::user("Summarize"));
        assert_eq!(sent.model.as_deref(), Some("a-default"));
    }

    #[tokio::test]
    async fn successful_calls_update_stats() {
        let b = Arc::new(ScriptedTransport {
            model: "gpt-4o-mini".to_owned(),
            ..Arc::into_inner(ScriptedTransport::ok("b", ProviderKind::Openai)).unwrap()
        });
        let client = client(legacy_config(&[&b]), &[&b], Arc::new(RecordingSleeper::new()));

        client.analyze(&AnalysisRequest::new("hi", "analysis")).await.unwrap();
        client.analyze(&AnalysisRequest::new("hi", "analysis")).await.unwrap();

        let stats = client.stats();
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.total_tokens, 300);
        assert!((stats.total_cost - 0.000_09).abs() < 1e-12);
        assert_eq!(stats.per_provider["b"].requests, 2);
    }

    async fn routed_client(
        a: &Arc<ScriptedTransport>,
        b: &Arc<ScriptedTransport>,
        descriptors: Vec<ProviderDescriptor>,
    ) -> (LlmClient, Arc<PerformanceFeedback>, Arc<InMemoryTaskStore>) {
        let store = InMemoryCapabilityStore::new();
        for d in descriptors {
            store.register(d).await.unwrap();
        }
        let tasks = Arc::new(InMemoryTaskStore::new());
        let router = Arc::new(TaskRouter::new(
            &RoutingConfig::default(),
            Arc::new(store),
            Arc::clone(&tasks) as Arc<dyn TaskMetadataStore>,
            Arc::new(HealthCache::new(Duration::from_secs(60))),
        ));
        let feedback = Arc::new(PerformanceFeedback::new(FeedbackConfig::default()));

        let mut config = legacy_config(&[a, b]);
        config.enable_intelligent_routing = true;
        let client = LlmClient::builder(config)
            .router(router)
            .feedback(Arc::clone(&feedback))
            .sleeper(Arc::new(RecordingSleeper::new()))
            .transport(Arc::clone(a) as Arc<dyn ProviderTransport>)
            .transport(Arc::clone(b) as Arc<dyn ProviderTransport>)
            .build()
            .unwrap();
        (client, feedback, tasks)
    }

    fn strong_local() -> ProviderDescriptor {
        let mut d = ProviderDescriptor::new("a", ProviderKind::GptOss, "a-model");
        d.capability_score = 0.95;
        d.avg_latency_ms = 100.0;
        d
    }

    fn weak_cloud() -> ProviderDescriptor {
        let mut d = ProviderDescriptor::new("b", ProviderKind::Openai, "b-model");
        d.capability_score = 0.5;
        d.avg_latency_ms = 3000.0;
        d.cost_per_1k_input = 0.01;
        d.cost_per_1k_output = 0.03;
        d
    }

    #[tokio::test]
    async fn routed_failover_rewrites_the_decision() {
        let a = ScriptedTransport::failing("a", ProviderKind::GptOss, server_error());
        let b = ScriptedTransport::ok("b", ProviderKind::Openai);
        let (client, feedback, tasks) = routed_client(&a, &b, vec![strong_local(), weak_cloud()]).await;

        let response = client.analyze(&AnalysisRequest::new("hi", "analysis")).await.unwrap();

        assert!(response.success);
        let decision = response.routing_decision.unwrap();
        assert_eq!(decision.selected_provider, "b");
        assert_eq!(decision.selected_model, "b-model");
        assert!(decision.reasoning.contains("failed over to b/b-model"));
        assert!(decision.fallback_options.iter().all(|d| d.provider != "b"));
        assert_eq!(a.calls(), 3);

        // one failed and one successful execution
        assert_eq!(feedback.len(), 2);
        assert!(!client.health().is_healthy("a"));

        let metadata = tasks.get_task_metadata("analysis").await.unwrap().unwrap();
        assert_eq!(metadata.stats.len(), 2);
    }

    #[tokio::test]
    async fn routing_failure_downgrades_to_legacy_selection() {
        let a = ScriptedTransport::ok("a", ProviderKind::GptOss);
        let b = ScriptedTransport::ok("b", ProviderKind::Openai);
        // only a cloud model is known, so a local requirement cannot be routed
        let (client, feedback, _) = routed_client(&a, &b, vec![weak_cloud()]).await;

        let request = AnalysisRequest::new("hi", "analysis").with_constraints(RoutingConstraints {
            privacy_requirement: Some(PrivacyTier::Local),
            ..RoutingConstraints::default()
        });
        let response = client.analyze(&request).await.unwrap();

        assert!(response.success);
        let decision = response.routing_decision.unwrap();
        assert_eq!(decision.selected_provider, "a");
        assert!(decision.reasoning.contains("routing failed"));
        assert_eq!(b.calls(), 0);
        assert!(feedback.is_empty());
    }

    #[tokio::test]
    async fn health_is_probed_once_per_interval() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut provider = ProviderConfig::new(ProviderKind::GptOss);
        provider.base_url = Some(server.uri().parse().unwrap());
        let mut config = LlmConfig::default();
        config.providers.insert("local".to_owned(), provider);
        let client = LlmClient::from_config(config).unwrap();

        assert_eq!(client.select_provider().await.unwrap(), "local");
        assert_eq!(client.select_provider().await.unwrap(), "local");
    }
}
