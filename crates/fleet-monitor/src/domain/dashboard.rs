//! # Machine Dashboard
//!
//! One view of a machine built from its buffered samples: current readings
//! from the latest sample, averages and peak over the whole buffer, a CPU
//! trend over the most recent readings and an hourly summary.

use super::alerts::{evaluate, machine_health, MachineHealth};
use super::config::AlertThresholds;
use super::stats::{mean, trend, Trend};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shared_types::{Alert, MetricSample, NetworkReading, ProcessInfo};

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const TOP_PROCESSES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub vm_id: String,
    pub hostname: String,
    pub os: String,
    pub kernel: String,
    /// `{d}d {h}h {m}m`
    pub uptime: String,
    pub status: MachineHealth,
    pub cpu: CpuPanel,
    pub memory: MemoryPanel,
    pub disk: Vec<DiskPanel>,
    pub network: NetworkPanel,
    pub load: LoadPanel,
    pub processes: ProcessPanel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<f64>,
    pub hourly_trend: HourlyTrend,
    pub alerts: Vec<Alert>,
    pub metadata: DashboardMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuPanel {
    pub current: f64,
    pub average: f64,
    pub peak: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryPanel {
    pub used_mb: f64,
    pub total_mb: f64,
    pub usage_percent: Option<f64>,
    pub available_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskPanel {
    pub filesystem: String,
    pub mount: String,
    pub usage_percent: Option<f64>,
    pub used_gb: f64,
    pub total_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkPanel {
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
    pub total_rx_packets: u64,
    pub total_tx_packets: u64,
    pub total_rx_mb: f64,
    pub total_tx_mb: f64,
    pub interfaces: Vec<NetworkReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadPanel {
    #[serde(rename = "1min")]
    pub one: f64,
    #[serde(rename = "5min")]
    pub five: f64,
    #[serde(rename = "15min")]
    pub fifteen: f64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessPanel {
    pub total: u32,
    pub top_5: Vec<ProcessInfo>,
}

/// Averages over samples taken in the last hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyTrend {
    pub cpu_average: f64,
    pub memory_average: f64,
    pub readings_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardMetadata {
    pub last_update: DateTime<Utc>,
    pub total_readings: usize,
    /// Minutes between the oldest buffered sample and `now`.
    pub reading_period_minutes: f64,
}

/// `{d}d {h}h {m}m`
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    format!("{days}d {hours}h {minutes}m")
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Interface counters summed, pinned at `u64::MAX` instead of wrapping.
fn counter_total(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0, u64::saturating_add)
}

/// Build the dashboard from a machine's samples, oldest first. `None` when
/// there are none.
pub fn build(
    vm_id: &str,
    samples: &[MetricSample],
    now: DateTime<Utc>,
    thresholds: &AlertThresholds,
    trend_points: usize,
) -> Option<Dashboard> {
    let latest = samples.last()?;
    let oldest = samples.first()?;

    let cpu_series: Vec<f64> = samples.iter().map(|s| s.cpu.usage_percent).collect();
    let recent = &cpu_series[cpu_series.len().saturating_sub(trend_points)..];

    let hour_ago = now - Duration::hours(1);
    let last_hour: Vec<&MetricSample> = samples.iter().filter(|s| s.timestamp > hour_ago).collect();
    let hourly_cpu: Vec<f64> = last_hour.iter().map(|s| s.cpu.usage_percent).collect();
    let hourly_memory: Vec<f64> = last_hour
        .iter()
        .filter_map(|s| s.memory.usage_percent())
        .collect();

    let alerts = evaluate(latest, thresholds);

    let network = NetworkPanel {
        total_rx_bytes: counter_total(latest.network.iter().map(|n| n.rx_bytes)),
        total_tx_bytes: counter_total(latest.network.iter().map(|n| n.tx_bytes)),
        total_rx_packets: counter_total(latest.network.iter().map(|n| n.rx_packets)),
        total_tx_packets: counter_total(latest.network.iter().map(|n| n.tx_packets)),
        total_rx_mb: 0.0,
        total_tx_mb: 0.0,
        interfaces: latest.network.clone(),
    };

    Some(Dashboard {
        vm_id: vm_id.to_string(),
        hostname: latest.hostname.clone(),
        os: latest.os.clone(),
        kernel: latest.kernel.clone(),
        uptime: format_uptime(latest.uptime_seconds),
        status: machine_health(&alerts),
        cpu: CpuPanel {
            current: round2(latest.cpu.usage_percent),
            average: round2(mean(&cpu_series)),
            peak: round2(cpu_series.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            trend: trend(recent),
        },
        memory: MemoryPanel {
            used_mb: round2(latest.memory.used as f64 / MIB),
            total_mb: round2(latest.memory.total as f64 / MIB),
            usage_percent: latest.memory.usage_percent().map(round2),
            available_mb: round2(latest.memory.available.unwrap_or_default() as f64 / MIB),
        },
        disk: latest
            .disk
            .iter()
            .map(|d| DiskPanel {
                filesystem: d.filesystem.clone(),
                mount: d.mount.clone(),
                usage_percent: d.usage_percent().map(round2),
                used_gb: round2(d.used as f64 / GIB),
                total_gb: round2(d.total as f64 / GIB),
            })
            .collect(),
        network: NetworkPanel {
            total_rx_mb: round2(network.total_rx_bytes as f64 / MIB),
            total_tx_mb: round2(network.total_tx_bytes as f64 / MIB),
            ..network
        },
        load: LoadPanel {
            one: round2(latest.load.one),
            five: round2(latest.load.five),
            fifteen: round2(latest.load.fifteen),
            average: round2(latest.load.mean()),
        },
        processes: ProcessPanel {
            total: latest.processes.total,
            top_5: latest
                .processes
                .top_processes
                .iter()
                .take(TOP_PROCESSES)
                .cloned()
                .collect(),
        },
        temperature_celsius: latest.temperature_celsius.map(round2),
        hourly_trend: HourlyTrend {
            cpu_average: round2(mean(&hourly_cpu)),
            memory_average: round2(mean(&hourly_memory)),
            readings_count: last_hour.len(),
        },
        alerts,
        metadata: DashboardMetadata {
            last_update: latest.timestamp,
            total_readings: samples.len(),
            reading_period_minutes: round2(
                (now - oldest.timestamp).num_milliseconds() as f64 / 60_000.0,
            ),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::metrics::fixtures::sample;
    use shared_types::ProcessInfo;

    fn series(now: DateTime<Utc>, cpu: &[f64]) -> Vec<MetricSample> {
        cpu.iter()
            .enumerate()
            .map(|(i, value)| {
                let mut s = sample("vm-1");
                s.cpu.usage_percent = *value;
                s.timestamp = now - Duration::minutes((cpu.len() - i) as i64);
                s
            })
            .collect()
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0d 0h 0m");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
        assert_eq!(format_uptime(3_599), "0d 0h 59m");
    }

    #[test]
    fn test_empty_buffer_has_no_dashboard() {
        assert!(build("vm-1", &[], Utc::now(), &AlertThresholds::default(), 10).is_none());
    }

    #[test]
    fn test_cpu_panel_and_trend() {
        let now = Utc::now();
        let samples = series(now, &[10.0, 10.0, 20.0, 20.0]);
        let dash = build("vm-1", &samples, now, &AlertThresholds::default(), 10).unwrap();

        assert_eq!(dash.cpu.current, 20.0);
        assert_eq!(dash.cpu.average, 15.0);
        assert_eq!(dash.cpu.peak, 20.0);
        assert_eq!(dash.cpu.trend, Trend::Ascending);
        assert_eq!(dash.status, MachineHealth::Healthy);
        assert_eq!(dash.metadata.total_readings, 4);
        assert_eq!(dash.metadata.reading_period_minutes, 4.0);
    }

    #[test]
    fn test_trend_only_looks_at_recent_points() {
        let now = Utc::now();
        let samples = series(now, &[90.0, 90.0, 10.0, 10.0, 10.0, 10.0]);
        let dash = build("vm-1", &samples, now, &AlertThresholds::default(), 4).unwrap();
        assert_eq!(dash.cpu.trend, Trend::Stable);
    }

    #[test]
    fn test_hourly_summary_excludes_old_samples() {
        let now = Utc::now();
        let mut samples = series(now, &[50.0, 30.0]);
        samples[0].timestamp = now - Duration::hours(3);

        let dash = build("vm-1", &samples, now, &AlertThresholds::default(), 10).unwrap();
        assert_eq!(dash.hourly_trend.readings_count, 1);
        assert_eq!(dash.hourly_trend.cpu_average, 30.0);
        assert_eq!(dash.hourly_trend.memory_average, 25.0);
    }

    #[test]
    fn test_latest_sample_drives_panels() {
        let now = Utc::now();
        let mut samples = series(now, &[95.0]);
        samples[0].processes.top_processes = (0..8)
            .map(|pid| ProcessInfo {
                pid,
                user: "root".into(),
                cpu: 1.0,
                memory: 1.0,
                command: format!("proc-{pid}"),
            })
            .collect();

        let dash = build("vm-1", &samples, now, &AlertThresholds::default(), 10).unwrap();
        assert_eq!(dash.status, MachineHealth::Critical);
        assert_eq!(dash.alerts.len(), 1);
        assert_eq!(dash.processes.top_5.len(), 5);
        assert_eq!(dash.memory.usage_percent, Some(25.0));
        assert_eq!(dash.memory.total_mb, 8192.0);
        assert_eq!(dash.disk[0].usage_percent, Some(40.0));
        assert_eq!(dash.network.total_rx_bytes, 1000);
        assert_eq!(dash.uptime, "0d 1h 0m");

        let json = serde_json::to_value(&dash).unwrap();
        assert_eq!(json["load"]["1min"], serde_json::json!(0.5));
        assert_eq!(json["status"], serde_json::json!("critical"));
    }
    #[test]
    fn test_huge_counters_do_not_overflow() {
        let now = Utc::now();
        let mut samples = series(now, &[10.0]);
        let mut second = samples[0].network[0].clone();
        second.interface = "eth1".into();
        samples[0].network[0].rx_bytes = u64::MAX;
        samples[0].network[0].tx_packets = u64::MAX;
        samples[0].network.push(second);
        samples[0].disk[0].total = u64::MAX;
        samples[0].disk[0].used = u64::MAX / 2;
        let mut small = samples[0].disk[0].clone();
        small.total = 10;
        small.used = 5;
        samples[0].disk.push(small);

        let dash = build("vm-1", &samples, now, &AlertThresholds::default(), 10).unwrap();
        assert_eq!(dash.network.total_rx_bytes, u64::MAX);
        assert_eq!(dash.network.total_tx_packets, u64::MAX);
        assert_eq!(dash.network.total_tx_bytes, 1000);
        assert!(dash.network.total_rx_mb > 0.0);
        assert_eq!(dash.disk.len(), 2);
    }
}
