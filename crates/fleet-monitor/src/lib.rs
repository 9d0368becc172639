//! # Fleet Monitor
//!
//! Ingests machine metric samples from the stream, keeps the most recent
//! readings per machine in memory, raises threshold alerts on the topic bus
//! and answers dashboard, aggregation and alert queries.
//!
//! ## Alert Rules
//!
//! | Rule | Warning | Critical |
//! |------|---------|----------|
//! | CPU usage | > 70% | > 90% |
//! | Memory usage | > 75% | > 90% |
//! | Disk usage (per filesystem) | > 85% | > 95% |
//! | 1-minute load | > 4 | |
//! | 1-minute load vs cores | > 2 x cores | |
//! | Status `offline` | | always |
//!
//! The severity of a published event is `critical` when the machine is
//! offline, `warning` when it is overloaded and `info` otherwise.
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  adapters/ - bus alert publisher, stream subscriber, exposition │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ports/outbound.rs - AlertPublisher, TimeSource                 │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  domain/ - buffer, alert rules, statistics, dashboard           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`MonitorService`] ties the layers together.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{attach_to_stream, BusAlertPublisher};
pub use domain::{
    AlertThresholds, Aggregates, Dashboard, MachineHealth, MetricsBuffer, MonitorConfig,
    MonitorError, SeriesStats, Trend,
};
pub use ports::{AlertPublisher, SystemTimeSource, TimeSource};
pub use service::{
    AggregationReport, AlertFilter, AlertsReport, HealthReport, HealthStatus, IngestOutcome,
    MachineAlert, MachineSummary, MachinesOverview, MonitorService, VmMetricsPage, VmMetricsQuery,
    DEFAULT_PAGE_LIMIT,
};
