//! Task routing against live mock providers

mod harness;

use alpharoute_config::{PrivacyTier, StrategyPreset};
use alpharoute_llm::{AnalysisRequest, RoutingConstraints};
use harness::config::{ConfigBuilder, context};
use harness::mock_llm::MockLlm;

#[tokio::test]
async fn local_privacy_never_reaches_the_cloud() {
    let cloud = MockLlm::start_with_response("from the cloud").await.unwrap();
    let local = MockLlm::start_with_response("from the basement").await.unwrap();

    let config = ConfigBuilder::new()
        .with_hosted_provider("cloud", &cloud.api_base_url())
        .with_local_provider("local", &local.base_url())
        .with_model("cloud", 0.99, 0.0)
        .with_model("local", 0.3, 0.0)
        .build();
    let ctx = context(config);

    let request = AnalysisRequest::new("Review my portfolio", "portfolio_review").with_constraints(RoutingConstraints {
        privacy_requirement: Some(PrivacyTier::Local),
        strategy: Some(StrategyPreset::QualityFirst),
        ..RoutingConstraints::default()
    });
    let response = ctx.client().analyze(&request).await.unwrap();

    assert!(response.success);
    assert_eq!(response.content, "from the basement");
    assert_eq!(response.routing_decision.unwrap().selected_provider, "local");
    assert_eq!(cloud.completion_count(), 0);
}

#[tokio::test]
async fn local_privacy_failure_does_not_fail_over_to_the_cloud() {
    let cloud = MockLlm::start().await.unwrap();
    let local = MockLlm::start_failing(1000).await.unwrap();

    let config = ConfigBuilder::new()
        .with_hosted_provider("cloud", &cloud.api_base_url())
        .with_local_provider("local", &local.base_url())
        .with_model("cloud", 0.9, 0.0)
        .with_model("local", 0.5, 0.0)
        .build();
    let ctx = context(config);

    let request = AnalysisRequest::new("Review my portfolio", "portfolio_review").with_constraints(RoutingConstraints {
        privacy_requirement: Some(PrivacyTier::Local),
        ..RoutingConstraints::default()
    });
    let response = ctx.client().analyze(&request).await.unwrap();

    assert!(!response.success);
    assert_eq!(cloud.completion_count(), 0);
}

#[tokio::test]
async fn cost_strategy_picks_the_cheaper_model() {
    let pricey = MockLlm::start_with_response("pricey").await.unwrap();
    let cheap = MockLlm::start_with_response("cheap").await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("pricey", &pricey.base_url())
        .with_local_provider("cheap", &cheap.base_url())
        .with_model("pricey", 0.7, 0.01)
        .with_model("cheap", 0.7, 0.0001)
        .build();
    let ctx = context(config);

    let request = AnalysisRequest::new("Classify this headline", "classification").with_constraints(RoutingConstraints {
        strategy: Some(StrategyPreset::CostOptimized),
        ..RoutingConstraints::default()
    });
    let response = ctx.client().analyze(&request).await.unwrap();

    assert_eq!(response.content, "cheap");
    assert_eq!(pricey.completion_count(), 0);
}

#[tokio::test]
async fn completed_calls_feed_task_statistics() {
    let local = MockLlm::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("local", &local.base_url())
        .with_model("local", 0.8, 0.0)
        .build();
    let ctx = context(config);

    for _ in 0..2 {
        let response = ctx
            .client()
            .analyze(&AnalysisRequest::new("Score this setup", "signal_scoring"))
            .await
            .unwrap();
        assert!(response.success);
    }

    let metadata = ctx.tasks().get_task_metadata("signal_scoring").await.unwrap().unwrap();
    assert_eq!(metadata.stats["local/mock-model"].count, 2);
    assert_eq!(ctx.client().stats().request_count, 2);
    assert_eq!(ctx.feedback().len(), 2);
}
