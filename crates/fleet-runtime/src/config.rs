//! # Runtime Configuration
//!
//! Everything the process needs, read once from the environment at startup.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `RABBITMQ_URL` | `memory://localhost` |
//! | `KAFKA_BROKER` | `memory` (comma-separated) |
//! | `MONITOR_CONSUMER_GROUP` | `monitor-service-group` |
//! | `METRICS_TOPIC` | `vm-metrics` |
//! | `ALERTS_EXCHANGE` / `ALERTS_ROUTING_KEY` | `alerts` / `alert.critical` |
//! | `ALERT_CPU_WARNING` / `ALERT_CPU_CRITICAL` | `70` / `90` |
//! | `ALERT_MEMORY_WARNING` / `ALERT_MEMORY_CRITICAL` | `75` / `90` |
//! | `ALERT_DISK_WARNING` / `ALERT_DISK_CRITICAL` | `85` / `95` |
//! | `ALERT_LOAD_1MIN` | `4.0` |
//! | `METRICS_AGGREGATION_WINDOW` (ms) | `3600000` |
//! | `METRICS_BUFFER_CAPACITY` | `1000` |
//! | `RPC_TIMEOUT_MS` | `5000` |
//!
//! Logging variables are read by [`TelemetryConfig`].

use fleet_monitor::domain::config::{DEFAULT_AGGREGATION_WINDOW, DEFAULT_BUFFER_CAPACITY};
use fleet_monitor::{AlertThresholds, MonitorConfig};
use fleet_telemetry::TelemetryConfig;
use shared_bus::DEFAULT_RPC_TIMEOUT;
use shared_types::topology::{consumer_groups, exchanges, routing, topics};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BUS_URL: &str = "memory://localhost";

/// Broker list value selecting the in-process stream broker.
pub const MEMORY_STREAM_BROKER: &str = "memory";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value} is not a valid {expected}")]
    Unparsable {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Topic bus URL (`amqp://`, `amqps://` or `memory://`).
    pub bus_url: String,
    /// Stream bootstrap brokers. `["memory"]` runs the in-process broker.
    pub stream_brokers: Vec<String>,
    pub consumer_group: String,
    pub metrics_topic: String,
    pub alerts_exchange: String,
    pub alerts_routing_key: String,
    pub thresholds: AlertThresholds,
    pub aggregation_window: Duration,
    pub buffer_capacity: usize,
    pub rpc_timeout: Duration,
    pub telemetry: TelemetryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus_url: DEFAULT_BUS_URL.to_string(),
            stream_brokers: vec![MEMORY_STREAM_BROKER.to_string()],
            consumer_group: consumer_groups::MONITOR_SERVICE.to_string(),
            metrics_topic: topics::VM_METRICS.to_string(),
            alerts_exchange: exchanges::ALERTS.to_string(),
            alerts_routing_key: routing::ALERT_CRITICAL.to_string(),
            thresholds: AlertThresholds::default(),
            aggregation_window: DEFAULT_AGGREGATION_WINDOW,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            telemetry: TelemetryConfig {
                service_name: "fleetops-runtime".to_string(),
                ..TelemetryConfig::default()
            },
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Unparsable {
            var,
            value,
            expected,
        }),
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] with an arbitrary variable source.
    ///
    /// Unset variables take their defaults; set but unparsable ones are an
    /// error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let t = defaults.thresholds;

        let stream_brokers = match lookup("KAFKA_BROKER") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.stream_brokers,
        };

        let config = Self {
            bus_url: lookup("RABBITMQ_URL").unwrap_or(defaults.bus_url),
            stream_brokers,
            consumer_group: lookup("MONITOR_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            metrics_topic: lookup("METRICS_TOPIC").unwrap_or(defaults.metrics_topic),
            alerts_exchange: lookup("ALERTS_EXCHANGE").unwrap_or(defaults.alerts_exchange),
            alerts_routing_key: lookup("ALERTS_ROUTING_KEY")
                .unwrap_or(defaults.alerts_routing_key),
            thresholds: AlertThresholds {
                cpu_warning: parse(&lookup, "ALERT_CPU_WARNING", "number", t.cpu_warning)?,
                cpu_critical: parse(&lookup, "ALERT_CPU_CRITICAL", "number", t.cpu_critical)?,
                memory_warning: parse(&lookup, "ALERT_MEMORY_WARNING", "number", t.memory_warning)?,
                memory_critical: parse(
                    &lookup,
                    "ALERT_MEMORY_CRITICAL",
                    "number",
                    t.memory_critical,
                )?,
                disk_warning: parse(&lookup, "ALERT_DISK_WARNING", "number", t.disk_warning)?,
                disk_critical: parse(&lookup, "ALERT_DISK_CRITICAL", "number", t.disk_critical)?,
                load_1min: parse(&lookup, "ALERT_LOAD_1MIN", "number", t.load_1min)?,
                overload_per_core: t.overload_per_core,
            },
            aggregation_window: Duration::from_millis(parse(
                &lookup,
                "METRICS_AGGREGATION_WINDOW",
                "duration in milliseconds",
                defaults.aggregation_window.as_millis() as u64,
            )?),
            buffer_capacity: parse(
                &lookup,
                "METRICS_BUFFER_CAPACITY",
                "count",
                defaults.buffer_capacity,
            )?,
            rpc_timeout: Duration::from_millis(parse(
                &lookup,
                "RPC_TIMEOUT_MS",
                "duration in milliseconds",
                defaults.rpc_timeout.as_millis() as u64,
            )?),
            telemetry: TelemetryConfig::from_lookup(&lookup),
        };
        Ok(config)
    }

    /// Reject settings the process cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_brokers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one stream broker is required".to_string(),
            ));
        }
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::Invalid("RPC timeout must be non-zero".to_string()));
        }
        self.monitor_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// True when the stream runs on the in-process broker.
    pub fn uses_memory_stream(&self) -> bool {
        self.stream_brokers
            .iter()
            .all(|b| b.eq_ignore_ascii_case(MEMORY_STREAM_BROKER))
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            thresholds: self.thresholds,
            buffer_capacity: self.buffer_capacity,
            aggregation_window: self.aggregation_window,
            alerts_exchange: self.alerts_exchange.clone(),
            alerts_routing_key: self.alerts_routing_key.clone(),
            ..MonitorConfig::default()
        }
    }
}
