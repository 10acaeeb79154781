//! Provider health caching and unhealthy-provider avoidance

mod harness;

use alpharoute_llm::AnalysisRequest;
use harness::config::{ConfigBuilder, context};
use harness::mock_llm::MockLlm;

#[tokio::test]
async fn health_is_probed_once_per_interval() {
    let local = MockLlm::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("local", &local.base_url())
        .health_check_interval(60)
        .build();
    let ctx = context(config);

    assert_eq!(ctx.client().select_provider().await.unwrap(), "local");
    assert_eq!(ctx.client().select_provider().await.unwrap(), "local");

    assert_eq!(local.health_count(), 1);
}

#[tokio::test]
async fn unhealthy_provider_is_skipped() {
    let sick = MockLlm::start().await.unwrap();
    sick.set_healthy(false);
    let well = MockLlm::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("sick", &sick.base_url())
        .with_local_provider("well", &well.base_url())
        .build();
    let ctx = context(config);

    // no capability seeds, so selection falls back to health-aware priority
    let response = ctx
        .client()
        .analyze(&AnalysisRequest::new("ETH funding rates?", "market_analysis"))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.attempted_providers, vec!["well"]);
    assert_eq!(sick.completion_count(), 0);
    assert!(!ctx.health().is_healthy("sick"));
}

#[tokio::test]
async fn forced_report_probes_live_and_updates_cache() {
    let local = MockLlm::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_local_provider("local", &local.base_url())
        .build();
    let ctx = context(config);

    let first = ctx.client().health_report(true).await;
    local.set_healthy(false);
    let second = ctx.client().health_report(true).await;

    assert!(first[0].healthy);
    assert!(first[0].endpoint.as_deref().unwrap().ends_with("/health"));
    assert!(!second[0].healthy);
    assert!(second[0].error.is_some());
    assert!(!ctx.health().is_healthy("local"));
    assert_eq!(local.health_count(), 2);
}
