use std::collections::HashMap;

use serde::Deserialize;
use url::Url;

/// Logging and metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name attached to exported metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// `EnvFilter` directive, e.g. `info,alpharoute_llm=debug`
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
    /// Additional resource attributes
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    /// OTLP metrics exporter; metrics are not exported when absent
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_filter: None,
            json_logs: false,
            resource_attributes: HashMap::new(),
            exporter: None,
        }
    }
}

/// OTLP exporter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    /// OTLP endpoint URL
    pub endpoint: Url,
    /// Export protocol
    #[serde(default)]
    pub protocol: ExportProtocol,
    /// Export interval in seconds
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

/// OTLP export protocol
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportProtocol {
    /// gRPC (default)
    #[default]
    Grpc,
    /// HTTP/protobuf
    HttpProto,
}

fn default_service_name() -> String {
    "alpharoute".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_interval_seconds() -> u64 {
    30
}
