use std::path::PathBuf;

use alpharoute_config::{PrivacyTier, StrategyPreset};
use clap::{Parser, Subcommand};

/// Alpharoute model router
#[derive(Debug, Parser)]
#[command(name = "alpharoute", about = "Task-aware routing and benchmarking across LLM providers")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "alpharoute.toml", env = "ALPHAROUTE_CONFIG")]
    pub config: PathBuf,

    /// Override the configured log filter
    #[arg(long, env = "ALPHAROUTE_LOG")]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Route a prompt to the best model and print the analysis as JSON
    Analyze {
        /// Task type used to look up routing metadata
        #[arg(long)]
        task_type: String,

        /// Only consider models at least this private
        #[arg(long)]
        privacy: Option<PrivacyTier>,

        /// Highest acceptable expected cost in USD
        #[arg(long)]
        max_cost: Option<f64>,

        /// Highest acceptable expected latency
        #[arg(long)]
        max_latency_ms: Option<f64>,

        /// Weight preset overriding the task's default
        #[arg(long)]
        strategy: Option<StrategyPreset>,

        #[arg(long)]
        system_prompt: Option<String>,

        prompt: String,
    },

    /// Run a benchmark suite and print the result as JSON
    ///
    /// Benchmarks every registered model unless `--provider` and `--model`
    /// name one.
    Bench {
        #[arg(long, default_value = alpharoute_bench::STANDARD_SUITE)]
        suite: String,

        #[arg(long, requires = "model")]
        provider: Option<String>,

        #[arg(long, requires = "provider")]
        model: Option<String>,

        /// Cases run in parallel per model
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// List registered model descriptors
    Models,

    /// Probe every provider and print its health
    Health,
}
