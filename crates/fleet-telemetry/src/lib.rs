//! # Fleet Telemetry
//!
//! Logging and metrics for the fleetops services.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `fleetops` | Service name in logs |
//! | `FLEET_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` also honoured) |
//! | `FLEET_JSON_LOGS` | `false` | JSON log lines (default `true` in containers) |
//! | `FLEET_METRICS_PORT` | `9100` | Prometheus exposition port |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};
pub use metrics::{
    gather_text, register_metrics, HistogramTimer, ALERTS_FIRED, BUS_DELIVERIES,
    BUS_MESSAGES_PUBLISHED, MACHINES_BUFFERED, RPC_CALLS, RPC_DURATION, SAMPLES_INGESTED,
    STREAM_RECORDS_CONSUMED, STREAM_RECORDS_FAILED, STREAM_RECORDS_PUBLISHED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register metrics, then install logging.
///
/// Returns a guard to hold for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    init_logging(config)?;
    Ok(TelemetryGuard {
        service_name: config.service_name.clone(),
    })
}

/// Guard that keeps telemetry active. Logs the shutdown when dropped.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}
