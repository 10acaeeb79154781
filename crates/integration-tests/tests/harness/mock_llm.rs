//! Mock LLM backend server for integration tests
//!
//! Implements a minimal OpenAI-compatible API with a health endpoint,
//! canned responses and scripted failures

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONTENT: &str = "Hello from mock LLM";

/// Mock LLM backend that returns predictable responses
pub struct MockLlm {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockLlmState>,
}

struct MockLlmState {
    completion_count: AtomicU32,
    health_count: AtomicU32,
    /// Completions still to fail before succeeding
    fail_count: AtomicU32,
    fail_status: StatusCode,
    healthy: AtomicBool,
    response_content: String,
}

impl MockLlm {
    /// Start a mock server that always succeeds
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(0, StatusCode::INTERNAL_SERVER_ERROR, DEFAULT_CONTENT).await
    }

    /// Start a mock server that fails the first `n` completions with 500
    pub async fn start_failing(n: u32) -> anyhow::Result<Self> {
        Self::start_inner(n, StatusCode::INTERNAL_SERVER_ERROR, DEFAULT_CONTENT).await
    }

    /// Start a mock server that fails the first `n` completions with `status`
    pub async fn start_with_status(n: u32, status: StatusCode) -> anyhow::Result<Self> {
        Self::start_inner(n, status, DEFAULT_CONTENT).await
    }

    /// Start a mock server with a custom response content
    pub async fn start_with_response(content: &str) -> anyhow::Result<Self> {
        Self::start_inner(0, StatusCode::INTERNAL_SERVER_ERROR, content).await
    }

    async fn start_inner(fail_count: u32, fail_status: StatusCode, content: &str) -> anyhow::Result<Self> {
        let state = Arc::new(MockLlmState {
            completion_count: AtomicU32::new(0),
            health_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(fail_count),
            fail_status,
            healthy: AtomicBool::new(true),
            response_content: content.to_owned(),
        });

        let app = Router::new()
            .route("/health", routing::get(handle_health))
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .route("/v1/models", routing::get(handle_models))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Server root, as a self-hosted provider expects it
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base URL including `/v1`, as hosted providers expect it
    pub fn api_base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Number of completion requests received
    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }

    /// Number of `/health` probes received
    pub fn health_count(&self) -> u32 {
        self.state.health_count.load(Ordering::Relaxed)
    }

    /// Make health endpoints answer 503 (or 200 again)
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::Relaxed);
    }
}

impl Drop for MockLlm {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    #[allow(dead_code)]
    messages: Vec<serde_json::Value>,
}

async fn handle_health(State(state): State<Arc<MockLlmState>>) -> impl IntoResponse {
    state.health_count.fetch_add(1, Ordering::Relaxed);
    if state.healthy.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"status": "down"})))
    }
}

async fn handle_chat_completions(
    State(state): State<Arc<MockLlmState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> impl IntoResponse {
    state.completion_count.fetch_add(1, Ordering::Relaxed);

    // If fail_count > 0, decrement and fail
    let remaining = state.fail_count.load(Ordering::Relaxed);
    if remaining > 0 {
        state.fail_count.fetch_sub(1, Ordering::Relaxed);
        return (
            state.fail_status,
            Json(serde_json::json!({
                "error": {
                    "message": "mock server intentional failure",
                    "type": "server_error"
                }
            })),
        )
            .into_response();
    }

    Json(serde_json::json!({
        "id": "chatcmpl-test-123",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": req.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": state.response_content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

async fn handle_models(State(state): State<Arc<MockLlmState>>) -> impl IntoResponse {
    if !state.healthy.load(Ordering::Relaxed) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    Json(serde_json::json!({
        "object": "list",
        "data": [{
            "id": "mock-model",
            "object": "model",
            "created": 1_700_000_000,
            "owned_by": "mock"
        }]
    }))
    .into_response()
}
