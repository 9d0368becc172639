//! # Alert Derivation
//!
//! Each rule is evaluated independently against one sample; several may
//! fire at once.
//!
//! | Rule | Warning | Critical |
//! |------|---------|----------|
//! | CPU usage | > 70% | > 90% |
//! | Memory used/total | > 75% | > 90% |
//! | Disk used/total, per filesystem | > 85% | > 95% |
//! | 1-minute load | > 4 | |
//! | 1-minute load vs cores (overload) | > 2x cores | |
//! | `offline` status | | always |
//!
//! The severity of the published event is not the worst alert: it is
//! `critical` when an offline alert fired, `warning` when an overload alert
//! fired, `info` otherwise.

use super::config::AlertThresholds;
use serde::{Deserialize, Serialize};
use shared_types::{Alert, AlertKind, MetricSample, Severity};

/// Coarse health of a machine, from the alerts of its latest sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineHealth {
    Healthy,
    Warning,
    Critical,
}

fn level(value: f64, warning: f64, critical: f64) -> Option<(Severity, f64)> {
    if value > critical {
        Some((Severity::Critical, critical))
    } else if value > warning {
        Some((Severity::Warning, warning))
    } else {
        None
    }
}

fn alert(severity: Severity, kind: AlertKind, message: String, value: f64, threshold: f64) -> Alert {
    Alert {
        severity,
        kind,
        message,
        value,
        threshold,
        filesystem: None,
        mount: None,
    }
}

/// Alerts fired by `sample`.
pub fn evaluate(sample: &MetricSample, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let cpu = sample.cpu.usage_percent;
    if let Some((severity, threshold)) = level(cpu, thresholds.cpu_warning, thresholds.cpu_critical)
    {
        let prefix = if severity == Severity::Critical { "High" } else { "Moderate" };
        alerts.push(alert(
            severity,
            AlertKind::Cpu,
            format!("{prefix} CPU usage: {cpu:.2}%"),
            cpu,
            threshold,
        ));
    }

    if let Some(memory) = sample.memory.usage_percent() {
        if let Some((severity, threshold)) =
            level(memory, thresholds.memory_warning, thresholds.memory_critical)
        {
            let prefix = if severity == Severity::Critical { "High" } else { "Moderate" };
            alerts.push(alert(
                severity,
                AlertKind::Memory,
                format!("{prefix} memory usage: {memory:.2}%"),
                memory,
                threshold,
            ));
        }
    }

    for disk in &sample.disk {
        let Some(usage) = disk.usage_percent() else {
            continue;
        };
        if let Some((severity, threshold)) =
            level(usage, thresholds.disk_warning, thresholds.disk_critical)
        {
            let prefix = if severity == Severity::Critical { "Critical" } else { "High" };
            alerts.push(Alert {
                filesystem: Some(disk.filesystem.clone()),
                mount: Some(disk.mount.clone()),
                ..alert(
                    severity,
                    AlertKind::Disk,
                    format!("{prefix} disk usage on {}: {usage:.2}%", disk.mount),
                    usage,
                    threshold,
                )
            });
        }
    }

    let load = sample.load.one;
    if load > thresholds.load_1min {
        alerts.push(alert(
            Severity::Warning,
            AlertKind::Load,
            format!("High system load: {load:.2}"),
            load,
            thresholds.load_1min,
        ));
    }

    if let Some(cores) = sample.cpu.cores.filter(|c| *c > 0) {
        let limit = thresholds.overload_per_core * f64::from(cores);
        if load > limit {
            alerts.push(alert(
                Severity::Warning,
                AlertKind::Overload,
                format!("System overload: load average {load:.2} on {cores} cores"),
                load,
                limit,
            ));
        }
    }

    if sample.is_offline() {
        alerts.push(alert(
            Severity::Critical,
            AlertKind::Offline,
            "Machine is not responding".to_string(),
            0.0,
            0.0,
        ));
    }

    alerts
}

/// Severity of the event published for a batch of alerts.
pub fn event_severity(alerts: &[Alert]) -> Severity {
    if alerts.iter().any(|a| a.kind == AlertKind::Offline) {
        Severity::Critical
    } else if alerts.iter().any(|a| a.kind == AlertKind::Overload) {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Worst alert severity, mapped onto machine health.
pub fn machine_health(alerts: &[Alert]) -> MachineHealth {
    match alerts.iter().map(|a| a.severity).max() {
        Some(Severity::Critical) => MachineHealth::Critical,
        Some(Severity::Warning) => MachineHealth::Warning,
        _ => MachineHealth::Healthy,
    }
}
