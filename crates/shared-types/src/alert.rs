//! # Alert Contracts
//!
//! Alerts are derived from a metric sample, never stored on their own. When a
//! sample fires one or more alerts the monitor publishes an [`AlertEvent`] on
//! the topic bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Cpu,
    Memory,
    Disk,
    /// 1-minute load above the fixed threshold.
    Load,
    /// 1-minute load above a multiple of the core count.
    Overload,
    Offline,
}

/// A single fired alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    /// Observed value that crossed the threshold.
    pub value: f64,
    pub threshold: f64,
    /// Set for disk alerts only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
}

/// The event published when a sample fires alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub vm_id: String,
    pub timestamp: DateTime<Utc>,
    pub alerts: Vec<Alert>,
    pub severity: Severity,
}
