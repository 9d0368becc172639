//! # Monitor Service
//!
//! Ingests samples into the per-machine buffers, raises alert events and
//! answers queries over what is buffered.
//!
//! ```text
//! sample ──► validate ──► buffer (FIFO, N per machine)
//!                │
//!                └──► evaluate rules ──► any fired? ──► AlertEvent ──► publisher
//! ```

use crate::adapters::exposition;
use crate::domain::{
    dashboard, evaluate, event_severity, Aggregates, Dashboard, MetricsBuffer, MonitorConfig,
    MonitorError,
};
use crate::ports::{AlertPublisher, SystemTimeSource, TimeSource};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_telemetry::{ALERTS_FIRED, MACHINES_BUFFERED, SAMPLES_INGESTED};
use serde::{Deserialize, Serialize};
use shared_types::{Alert, AlertEvent, MetricSample, Severity};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default page size of [`MonitorService::vm_metrics`].
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Result of ingesting one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// Samples evicted from the machine's buffer.
    pub evicted: usize,
    /// The alert event published for this sample, if any rule fired.
    pub event: Option<AlertEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationReport {
    pub vm_id: String,
    pub window_ms: u64,
    #[serde(flatten)]
    pub aggregates: Aggregates,
}

/// Page request for [`MonitorService::vm_metrics`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VmMetricsQuery {
    #[serde(alias = "vmId")]
    pub vm_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmMetricsPage {
    pub vm_id: String,
    pub metrics: Vec<MetricSample>,
    /// Aggregates over this page, with standard deviation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<Aggregates>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Filter of the current-alerts query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AlertFilter {
    #[serde(default, alias = "vmId")]
    pub vm_id: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineAlert {
    pub vm_id: String,
    #[serde(flatten)]
    pub alert: Alert,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertsReport {
    pub total_alerts: usize,
    pub alerts: Vec<MachineAlert>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSummary {
    pub vm_id: String,
    pub latest_metric: MetricSample,
    pub total_readings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachinesOverview {
    pub total_vms: usize,
    pub vms: Vec<MachineSummary>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub metrics_buffered: usize,
}

/// Aggregates of every machine that reported within the aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub total_vms: usize,
    pub vms: Vec<AggregationReport>,
}

/// Metrics ingestion and alerting.
pub struct MonitorService {
    config: MonitorConfig,
    buffer: MetricsBuffer,
    publisher: Arc<dyn AlertPublisher>,
    clock: Arc<dyn TimeSource>,
}

impl MonitorService {
    /// # Errors
    ///
    /// [`MonitorError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: MonitorConfig,
        publisher: Arc<dyn AlertPublisher>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        Ok(Self {
            buffer: MetricsBuffer::new(config.buffer_capacity),
            config,
            publisher,
            clock: Arc::new(SystemTimeSource),
        })
    }

    #[must_use]
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn buffer(&self) -> &MetricsBuffer {
        &self.buffer
    }

    /// Buffer a sample and publish an alert event if any rule fires.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::InvalidSample`]: rejected, nothing buffered
    /// - [`MonitorError::Publish`]: the sample is buffered but the event
    ///   was not delivered
    pub async fn ingest(&self, sample: MetricSample) -> Result<IngestOutcome, MonitorError> {
        sample.validate()?;

        let alerts = evaluate(&sample, &self.config.thresholds);
        let vm_id = sample.vm_id.clone();
        let timestamp = sample.timestamp;
        let evicted = self.buffer.push(sample);
        SAMPLES_INGESTED.inc();
        MACHINES_BUFFERED.set(self.buffer.machine_count() as i64);
        debug!(vm_id = %vm_id, evicted, "Sample buffered");

        if alerts.is_empty() {
            return Ok(IngestOutcome {
                evicted,
                event: None,
            });
        }

        let event = AlertEvent {
            severity: event_severity(&alerts),
            vm_id,
            timestamp,
            alerts,
        };
        ALERTS_FIRED
            .with_label_values(&[event.severity.as_str()])
            .inc();
        warn!(
            vm_id = %event.vm_id,
            severity = %event.severity,
            alerts = event.alerts.len(),
            "Alerts generated"
        );

        self.publisher.publish(&event).await?;
        Ok(IngestOutcome {
            evicted,
            event: Some(event),
        })
    }

    /// Decode, validate and ingest a raw JSON payload.
    pub async fn ingest_payload(&self, payload: &[u8]) -> Result<IngestOutcome, MonitorError> {
        let sample = MetricSample::decode(payload)?;
        self.ingest(sample).await
    }

    /// Statistics over the samples of `vm_id` within the trailing `window`
    /// (the configured window when `None`). `None` when no sample falls in
    /// the window.
    pub fn aggregate(&self, vm_id: &str, window: Option<Duration>) -> Option<AggregationReport> {
        let window = window.unwrap_or(self.config.aggregation_window);
        let now = self.clock.now();
        let cutoff = ChronoDuration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let samples = self.buffer.since(vm_id, cutoff);
        Aggregates::compute(&samples).map(|aggregates| AggregationReport {
            vm_id: vm_id.to_string(),
            window_ms: window.as_millis() as u64,
            aggregates,
        })
    }

    /// A page of buffered samples, oldest first.
    pub fn vm_metrics(&self, query: &VmMetricsQuery) -> VmMetricsPage {
        let (metrics, total) = self.buffer.page(&query.vm_id, query.offset, query.limit);
        VmMetricsPage {
            vm_id: query.vm_id.clone(),
            aggregates: Aggregates::compute(&metrics),
            metrics,
            total,
            limit: query.limit,
            offset: query.offset,
        }
    }

    pub fn dashboard(&self, vm_id: &str) -> Option<Dashboard> {
        dashboard::build(
            vm_id,
            &self.buffer.samples(vm_id),
            self.clock.now(),
            &self.config.thresholds,
            self.config.trend_points,
        )
    }

    /// Alerts of the latest sample of one machine, or of every machine.
    pub fn current_alerts(&self, filter: &AlertFilter) -> AlertsReport {
        let latest = match &filter.vm_id {
            Some(vm_id) => self.buffer.latest(vm_id).into_iter().collect(),
            None => self.buffer.latest_per_machine(),
        };

        let alerts: Vec<MachineAlert> = latest
            .iter()
            .flat_map(|sample| {
                evaluate(sample, &self.config.thresholds)
                    .into_iter()
                    .map(|alert| MachineAlert {
                        vm_id: sample.vm_id.clone(),
                        alert,
                    })
            })
            .filter(|a| filter.severity.map_or(true, |s| a.alert.severity == s))
            .collect();

        AlertsReport {
            total_alerts: alerts.len(),
            alerts,
            timestamp: self.clock.now(),
        }
    }

    pub fn machines(&self) -> MachinesOverview {
        let vms: Vec<MachineSummary> = self
            .buffer
            .latest_per_machine()
            .into_iter()
            .map(|latest| MachineSummary {
                total_readings: self.buffer.len(&latest.vm_id),
                vm_id: latest.vm_id.clone(),
                latest_metric: latest,
            })
            .collect();
        MachinesOverview {
            total_vms: vms.len(),
            vms,
            timestamp: self.clock.now(),
        }
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            timestamp: self.clock.now(),
            metrics_buffered: self.buffer.machine_count(),
        }
    }

    pub fn health_report(&self) -> HealthReport {
        let vms: Vec<AggregationReport> = self
            .buffer
            .machine_ids()
            .iter()
            .filter_map(|vm_id| self.aggregate(vm_id, None))
            .collect();
        HealthReport {
            timestamp: self.clock.now(),
            total_vms: vms.len(),
            vms,
        }
    }

    /// Prometheus text exposition of the latest sample of every machine.
    pub fn prometheus_text(&self) -> Result<String, MonitorError> {
        exposition::render(&self.buffer.latest_per_machine())
    }
}
