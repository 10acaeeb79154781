#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use alpharoute_bench::BenchmarkRunner;
use alpharoute_config::{Config, TelemetryConfig};
use alpharoute_llm::{AnalysisRequest, RouterContext, RoutingConstraints};
use alpharoute_routing::CapabilityFilter;
use args::{Args, Command};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(filter) = args.log_filter {
        config.telemetry.get_or_insert_with(TelemetryConfig::default).log_filter = Some(filter);
    }

    // Initialize telemetry
    let _telemetry_guard = alpharoute_telemetry::init(config.telemetry.as_ref(), "info")?;

    tracing::info!(
        config_path = %args.config.display(),
        providers = config.llm.providers.len(),
        "starting alpharoute"
    );

    let context = RouterContext::from_config(config)?;

    let outcome = tokio::select! {
        result = run(&context, args.command) => result,
        () = shutdown_signal() => Err(anyhow::anyhow!("interrupted")),
    };

    context.shutdown().await;
    tracing::info!("alpharoute stopped");
    outcome
}

async fn run(context: &RouterContext, command: Command) -> anyhow::Result<()> {
    let output = match command {
        Command::Analyze {
            task_type,
            privacy,
            max_cost,
            max_latency_ms,
            strategy,
            system_prompt,
            prompt,
        } => {
            let constraints = RoutingConstraints {
                max_latency_ms,
                max_cost,
                privacy_requirement: privacy,
                strategy,
                ..RoutingConstraints::default()
            };
            let mut request = AnalysisRequest::new(prompt, task_type).with_constraints(constraints);
            if let Some(system_prompt) = system_prompt {
                request = request.with_system_prompt(system_prompt);
            }

            let response = context.client().analyze(&request).await?;
            if !response.success {
                tracing::warn!(error = ?response.error, attempted = ?response.attempted_providers, "analysis failed");
            }
            serde_json::to_value(&response)?
        }
        Command::Bench {
            suite,
            provider,
            model,
            max_concurrent,
        } => {
            let runner = BenchmarkRunner::from_context(context);
            if let (Some(provider), Some(model)) = (provider, model) {
                let result = runner
                    .run_benchmark_suite(&suite, &provider, &model, max_concurrent)
                    .await?;
                serde_json::to_value(&result)?
            } else {
                serde_json::to_value(runner.run_all_model_benchmarks(&suite).await?)?
            }
        }
        Command::Models => {
            let models = context
                .capabilities()
                .list_model_capabilities(&CapabilityFilter::all())
                .await?;
            serde_json::to_value(&models)?
        }
        Command::Health => serde_json::to_value(context.client().health_report(true).await)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
