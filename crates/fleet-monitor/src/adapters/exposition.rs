//! Prometheus text exposition of the latest reading per machine.
//!
//! Rendered into a fresh registry on every call so machines that stopped
//! reporting drop out once their buffer does.

use crate::domain::MonitorError;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use shared_types::MetricSample;

struct Gauges {
    cpu: GaugeVec,
    memory_percent: GaugeVec,
    memory_used: GaugeVec,
    memory_total: GaugeVec,
    uptime: GaugeVec,
    load_1m: GaugeVec,
    load_5m: GaugeVec,
    load_15m: GaugeVec,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec, MonitorError> {
    let gauge = GaugeVec::new(Opts::new(name, help), &["vm_id"])
        .map_err(|e| MonitorError::Exposition(e.to_string()))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| MonitorError::Exposition(e.to_string()))?;
    Ok(gauge)
}

impl Gauges {
    fn register(registry: &Registry) -> Result<Self, MonitorError> {
        Ok(Self {
            cpu: gauge(registry, "vm_cpu_usage_percent", "CPU usage percentage")?,
            memory_percent: gauge(registry, "vm_memory_usage_percent", "Memory usage percentage")?,
            memory_used: gauge(registry, "vm_memory_bytes_used", "Memory used in bytes")?,
            memory_total: gauge(registry, "vm_memory_bytes_total", "Total memory in bytes")?,
            uptime: gauge(registry, "vm_uptime_seconds", "System uptime in seconds")?,
            load_1m: gauge(registry, "vm_load_average_1m", "1-minute load average")?,
            load_5m: gauge(registry, "vm_load_average_5m", "5-minute load average")?,
            load_15m: gauge(registry, "vm_load_average_15m", "15-minute load average")?,
        })
    }
}

/// Render the given samples, one series per machine per gauge.
pub fn render(latest: &[MetricSample]) -> Result<String, MonitorError> {
    let registry = Registry::new();
    let gauges = Gauges::register(&registry)?;

    for sample in latest {
        let labels = [sample.vm_id.as_str()];
        gauges.cpu.with_label_values(&labels).set(sample.cpu.usage_percent);
        if let Some(percent) = sample.memory.usage_percent() {
            gauges.memory_percent.with_label_values(&labels).set(percent);
        }
        gauges
            .memory_used
            .with_label_values(&labels)
            .set(sample.memory.used as f64);
        gauges
            .memory_total
            .with_label_values(&labels)
            .set(sample.memory.total as f64);
        gauges
            .uptime
            .with_label_values(&labels)
            .set(sample.uptime_seconds as f64);
        gauges.load_1m.with_label_values(&labels).set(sample.load.one);
        gauges.load_5m.with_label_values(&labels).set(sample.load.five);
        gauges.load_15m.with_label_values(&labels).set(sample.load.fifteen);
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| MonitorError::Exposition(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MonitorError::Exposition(e.to_string()))
}
