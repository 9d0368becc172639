//! Alert thresholds and buffer settings.

use super::errors::MonitorError;
use shared_types::topology::{exchanges, routing};
use std::time::Duration;

/// Samples kept per machine.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;
/// Trailing window of [`crate::MonitorService::aggregate`].
pub const DEFAULT_AGGREGATION_WINDOW: Duration = Duration::from_secs(3600);
/// Most recent CPU readings the dashboard trend looks at.
pub const DEFAULT_TREND_POINTS: usize = 10;

/// Static alert thresholds. Percentages are `0..=100`; an alert fires when
/// the reading is strictly above the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub memory_warning: f64,
    pub memory_critical: f64,
    /// Evaluated per mounted filesystem.
    pub disk_warning: f64,
    pub disk_critical: f64,
    /// Fixed 1-minute load threshold.
    pub load_1min: f64,
    /// Overload fires when 1-minute load exceeds this many times the core
    /// count. Only evaluated for samples that report cores.
    pub overload_per_core: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu_warning: 70.0,
            cpu_critical: 90.0,
            memory_warning: 75.0,
            memory_critical: 90.0,
            disk_warning: 85.0,
            disk_critical: 95.0,
            load_1min: 4.0,
            overload_per_core: 2.0,
        }
    }
}

impl AlertThresholds {
    pub fn validate(&self) -> Result<(), MonitorError> {
        for (name, warning, critical) in [
            ("cpu", self.cpu_warning, self.cpu_critical),
            ("memory", self.memory_warning, self.memory_critical),
            ("disk", self.disk_warning, self.disk_critical),
        ] {
            if !warning.is_finite() || !critical.is_finite() {
                return Err(MonitorError::InvalidConfig(format!(
                    "{name} thresholds must be finite"
                )));
            }
            if warning > critical {
                return Err(MonitorError::InvalidConfig(format!(
                    "{name} warning threshold {warning} is above critical threshold {critical}"
                )));
            }
        }
        if !(self.load_1min.is_finite() && self.load_1min >= 0.0) {
            return Err(MonitorError::InvalidConfig(
                "load threshold must be a non-negative number".to_string(),
            ));
        }
        if !(self.overload_per_core.is_finite() && self.overload_per_core > 0.0) {
            return Err(MonitorError::InvalidConfig(
                "overload multiplier must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Monitor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub thresholds: AlertThresholds,
    pub buffer_capacity: usize,
    pub aggregation_window: Duration,
    pub trend_points: usize,
    /// Exchange and routing key alert events are published with.
    pub alerts_exchange: String,
    pub alerts_routing_key: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: AlertThresholds::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            aggregation_window: DEFAULT_AGGREGATION_WINDOW,
            trend_points: DEFAULT_TREND_POINTS,
            alerts_exchange: exchanges::ALERTS.to_string(),
            alerts_routing_key: routing::ALERT_CRITICAL.to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.buffer_capacity == 0 {
            return Err(MonitorError::InvalidConfig(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        if self.aggregation_window.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "aggregation window must be non-zero".to_string(),
            ));
        }
        if self.trend_points < 2 {
            return Err(MonitorError::InvalidConfig(
                "trend needs at least 2 points".to_string(),
            ));
        }
        self.thresholds.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_capacity, 1000);
        assert_eq!(config.alerts_exchange, "alerts");
        assert_eq!(config.alerts_routing_key, "alert.critical");
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = MonitorConfig {
            thresholds: AlertThresholds {
                disk_warning: 96.0,
                ..AlertThresholds::default()
            },
            ..MonitorConfig::default()
        };
        assert!(matches!(config.validate(), Err(MonitorError::InvalidConfig(msg)) if msg.contains("disk")));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = MonitorConfig {
            buffer_capacity: 0,
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = MonitorConfig {
            aggregation_window: Duration::ZERO,
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
