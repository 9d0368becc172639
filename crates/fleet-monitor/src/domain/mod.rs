//! # Domain Layer - Monitor
//!
//! Pure logic over metric samples; no I/O.
//!
//! - `buffer`: bounded per-machine FIFO of samples
//! - `alerts`: threshold rules, event severity, machine health
//! - `stats`: mean/std-dev, trend, aggregates
//! - `dashboard`: per-machine dashboard view
//! - `config`: thresholds and buffer settings
//! - `errors`: `MonitorError`

pub mod alerts;
pub mod buffer;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod stats;

pub use alerts::{evaluate, event_severity, machine_health, MachineHealth};
pub use buffer::MetricsBuffer;
pub use config::{AlertThresholds, MonitorConfig};
pub use dashboard::{format_uptime, Dashboard};
pub use errors::MonitorError;
pub use stats::{trend, Aggregates, SeriesStats, Trend};
