//! Retry and cross-provider failover through `analyze`

mod harness;

use alpharoute_llm::AnalysisRequest;
use axum::http::StatusCode;
use harness::config::{ConfigBuilder, context};
use harness::mock_llm::MockLlm;

fn request() -> AnalysisRequest {
    AnalysisRequest::new("Summarize today's BTC order flow", "market_analysis")
}

#[tokio::test]
async fn primary_succeeds_no_failover() {
    let primary = MockLlm::start().await.unwrap();
    let backup = MockLlm::start_with_response("backup response").await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("primary", &primary.base_url())
        .with_local_provider("backup", &backup.base_url())
        .legacy_routing()
        .build();
    let ctx = context(config);

    let response = ctx.client().analyze(&request()).await.unwrap();

    assert!(response.success);
    assert_eq!(response.content, "Hello from mock LLM");
    assert_eq!(primary.completion_count(), 1);
    assert_eq!(backup.completion_count(), 0);
}

#[tokio::test]
async fn exhausted_retries_fail_over_to_backup() {
    let primary = MockLlm::start_failing(1000).await.unwrap();
    let backup = MockLlm::start_with_response("backup response").await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("primary", &primary.base_url())
        .with_local_provider("backup", &backup.base_url())
        .legacy_routing()
        .max_retries(2)
        .build();
    let ctx = context(config);

    let response = ctx.client().analyze(&request()).await.unwrap();

    assert!(response.success);
    assert_eq!(response.content, "backup response");
    assert_eq!(response.routing_decision.unwrap().selected_provider, "backup");
    assert_eq!(response.attempted_providers, vec!["primary", "backup"]);

    // primary is exhausted before backup is touched
    assert_eq!(primary.completion_count(), 2);
    assert_eq!(backup.completion_count(), 1);
}

#[tokio::test]
async fn default_provider_config_makes_one_call_per_retry() {
    let primary = MockLlm::start_failing(1000).await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("primary", &primary.base_url())
        .legacy_routing()
        .max_retries(3)
        .build();
    assert_eq!(config.llm.providers["primary"].max_retries, None);
    let ctx = context(config);

    let response = ctx.client().analyze(&request()).await.unwrap();

    assert!(!response.success);
    assert_eq!(response.attempted_providers, vec!["primary"]);
    assert_eq!(primary.completion_count(), 3);
}

#[tokio::test]
async fn transient_failure_recovers_on_same_provider() {
    let primary = MockLlm::start_failing(1).await.unwrap();
    let backup = MockLlm::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("primary", &primary.base_url())
        .with_local_provider("backup", &backup.base_url())
        .legacy_routing()
        .max_retries(3)
        .build();
    let ctx = context(config);

    let response = ctx.client().analyze(&request()).await.unwrap();

    assert!(response.success);
    assert_eq!(response.performance.unwrap().calls, 2);
    assert_eq!(primary.completion_count(), 2);
    assert_eq!(backup.completion_count(), 0);
}

#[tokio::test]
async fn client_errors_fail_over_without_retry() {
    let primary = MockLlm::start_with_status(1000, StatusCode::BAD_REQUEST).await.unwrap();
    let backup = MockLlm::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("primary", &primary.base_url())
        .with_local_provider("backup", &backup.base_url())
        .legacy_routing()
        .max_retries(3)
        .build();
    let ctx = context(config);

    let response = ctx.client().analyze(&request()).await.unwrap();

    assert!(response.success);
    assert_eq!(primary.completion_count(), 1);
    assert_eq!(backup.completion_count(), 1);
}

#[tokio::test]
async fn disabled_fallback_reports_failure() {
    let primary = MockLlm::start_failing(1000).await.unwrap();
    let backup = MockLlm::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("primary", &primary.base_url())
        .with_local_provider("backup", &backup.base_url())
        .legacy_routing()
        .without_fallback()
        .build();
    let ctx = context(config);

    let response = ctx.client().analyze(&request()).await.unwrap();

    assert!(!response.success);
    assert!(response.error.unwrap().contains("primary"));
    assert_eq!(response.attempted_providers, vec!["primary"]);
    assert_eq!(backup.completion_count(), 0);
}

#[tokio::test]
async fn routed_decision_is_rewritten_after_failover() {
    let strong = MockLlm::start_failing(1000).await.unwrap();
    let weak = MockLlm::start_with_response("weak but alive").await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("strong", &strong.base_url())
        .with_local_provider("weak", &weak.base_url())
        .with_model("strong", 0.95, 0.0)
        .with_model("weak", 0.4, 0.0)
        .build();
    let ctx = context(config);

    let response = ctx.client().analyze(&request()).await.unwrap();
    let decision = response.routing_decision.unwrap();

    assert!(response.success);
    assert_eq!(decision.selected_provider, "weak");
    assert!(decision.reasoning.contains("failed over to weak/mock-model"));
    assert!(decision.fallback_options.iter().all(|d| d.provider != "weak"));
    assert_eq!(strong.completion_count(), 2);
}
