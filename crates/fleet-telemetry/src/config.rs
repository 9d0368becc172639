//! Telemetry configuration from environment variables.

use std::env;

const DEFAULT_SERVICE_NAME: &str = "fleetops";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_METRICS_PORT: u16 = 9100;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive
    pub log_level: String,

    /// Whether to write logs to stdout at all
    pub console_output: bool,

    /// JSON formatted logs instead of the human format
    pub json_logs: bool,

    /// Port the Prometheus exposition is served on
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            console_output: true,
            json_logs: false,
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: fleetops)
    /// - `FLEET_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `FLEET_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `FLEET_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `FLEET_METRICS_PORT`: Prometheus metrics port (default: 9100)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`TelemetryConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();

        Self {
            service_name: lookup("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),

            log_level: lookup("FLEET_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),

            console_output: lookup("FLEET_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: lookup("FLEET_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            metrics_port: lookup("FLEET_METRICS_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_METRICS_PORT),
        }
    }

    /// Configuration for one named service, reading the rest from the
    /// environment.
    pub fn for_service(name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = format!("fleetops-{name}");
        config
    }
}
