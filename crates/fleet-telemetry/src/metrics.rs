//! Prometheus metrics for the fleetops services.
//!
//! All metrics follow the naming convention: `fleet_<layer>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., bus_messages_published_total)
//! - **Gauge**: Value that can go up or down (e.g., monitor_machines_buffered)
//! - **Histogram**: Distribution of values (e.g., bus_rpc_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // TOPIC BUS
    // =========================================================================

    /// Messages published, by exchange
    pub static ref BUS_MESSAGES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("fleet_bus_messages_published_total", "Messages published to the topic bus"),
        &["exchange"]
    ).expect("metric creation failed");

    /// Deliveries settled by subscriptions
    pub static ref BUS_DELIVERIES: CounterVec = CounterVec::new(
        Opts::new("fleet_bus_deliveries_total", "Deliveries settled by bus subscriptions"),
        &["queue", "outcome"]  // outcome: ack/nack
    ).expect("metric creation failed");

    /// Request/reply calls
    pub static ref RPC_CALLS: CounterVec = CounterVec::new(
        Opts::new("fleet_bus_rpc_calls_total", "Request/reply calls over the bus"),
        &["pattern", "outcome"]  // outcome: success/failure/timeout/error
    ).expect("metric creation failed");

    /// Request/reply round trip
    pub static ref RPC_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "fleet_bus_rpc_duration_seconds",
            "Time from request publish to reply"
        ).buckets(exponential_buckets(0.0005, 2.0, 15).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // STREAM
    // =========================================================================

    pub static ref STREAM_RECORDS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("fleet_stream_records_published_total", "Records published to the stream"),
        &["topic"]
    ).expect("metric creation failed");

    pub static ref STREAM_RECORDS_CONSUMED: CounterVec = CounterVec::new(
        Opts::new("fleet_stream_records_consumed_total", "Records handled by stream consumers"),
        &["topic"]
    ).expect("metric creation failed");

    /// Records skipped by a consumer
    pub static ref STREAM_RECORDS_FAILED: CounterVec = CounterVec::new(
        Opts::new("fleet_stream_records_failed_total", "Records a stream consumer could not process"),
        &["topic", "reason"]  // reason: invalid/publish
    ).expect("metric creation failed");

    // =========================================================================
    // MONITOR
    // =========================================================================

    pub static ref SAMPLES_INGESTED: IntCounter = IntCounter::new(
        "fleet_monitor_samples_ingested_total",
        "Metric samples added to the ring buffers"
    ).expect("metric creation failed");

    /// Alert events, by derived severity
    pub static ref ALERTS_FIRED: CounterVec = CounterVec::new(
        Opts::new("fleet_monitor_alerts_fired_total", "Alert events raised by ingestion"),
        &["severity"]
    ).expect("metric creation failed");

    pub static ref MACHINES_BUFFERED: IntGauge = IntGauge::new(
        "fleet_monitor_machines_buffered",
        "Machines with at least one buffered sample"
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Safe to call more than
/// once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Bus
        Box::new(BUS_MESSAGES_PUBLISHED.clone()),
        Box::new(BUS_DELIVERIES.clone()),
        Box::new(RPC_CALLS.clone()),
        Box::new(RPC_DURATION.clone()),
        // Stream
        Box::new(STREAM_RECORDS_PUBLISHED.clone()),
        Box::new(STREAM_RECORDS_CONSUMED.clone()),
        Box::new(STREAM_RECORDS_FAILED.clone()),
        // Monitor
        Box::new(SAMPLES_INGESTED.clone()),
        Box::new(ALERTS_FIRED.clone()),
        Box::new(MACHINES_BUFFERED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all registered metrics as Prometheus text format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
