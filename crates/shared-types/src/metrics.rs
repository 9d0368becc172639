//! # VM Metric Sample
//!
//! The record published by machine agents onto the metrics stream, keyed by
//! `vm_id`. This is an external contract: field names match the JSON the
//! agents emit and must round-trip unchanged.
//!
//! Required fields have no serde defaults. A sample missing `cpu.usage_percent`
//! is rejected at the decoding boundary rather than silently read as zero.

use crate::errors::SampleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading of a machine's resource usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Machine identifier; also the stream record key.
    pub vm_id: String,
    /// When the agent took the reading (ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuReading,
    pub memory: MemoryReading,
    /// One entry per mounted filesystem.
    pub disk: Vec<DiskReading>,
    /// One entry per network interface.
    pub network: Vec<NetworkReading>,
    pub processes: ProcessSummary,
    pub load: LoadAverage,
    pub uptime_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<f64>,
    pub hostname: String,
    pub os: String,
    pub kernel: String,
    /// Explicit liveness status reported by the agent or the infrastructure
    /// service. Absent on ordinary readings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MachineStatus>,
}

/// CPU reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    /// Utilisation across all cores, `0..=100`.
    pub usage_percent: f64,
    /// Logical core count, when the agent reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
}

/// Memory reading in bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<u64>,
}

/// Usage of a single mounted filesystem, in bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskReading {
    pub filesystem: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub mount: String,
}

/// Counters for one network interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkReading {
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

/// Process table summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub total: u32,
    pub top_processes: Vec<ProcessInfo>,
}

/// One entry of the agent's top-N process list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub user: String,
    pub cpu: f64,
    pub memory: f64,
    pub command: String,
}

/// Load averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    #[serde(rename = "1min")]
    pub one: f64,
    #[serde(rename = "5min")]
    pub five: f64,
    #[serde(rename = "15min")]
    pub fifteen: f64,
}

impl LoadAverage {
    /// Mean of the three load averages.
    pub fn mean(&self) -> f64 {
        (self.one + self.five + self.fifteen) / 3.0
    }
}

/// Liveness status of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Online,
    Offline,
    Warning,
    Error,
    #[serde(other)]
    Unknown,
}

impl MemoryReading {
    /// `used / total` as a percentage, `None` when `total` is zero.
    pub fn usage_percent(&self) -> Option<f64> {
        ratio_percent(self.used, self.total)
    }
}

impl DiskReading {
    /// `used / total` as a percentage, `None` when `total` is zero.
    pub fn usage_percent(&self) -> Option<f64> {
        ratio_percent(self.used, self.total)
    }
}

fn ratio_percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(used as f64 / total as f64 * 100.0)
}

impl MetricSample {
    /// Decode a sample from a JSON payload and validate it.
    ///
    /// # Errors
    ///
    /// - [`SampleError::Malformed`] if the JSON does not match the schema
    /// - any validation error from [`MetricSample::validate`]
    pub fn decode(payload: &[u8]) -> Result<Self, SampleError> {
        let sample: Self =
            serde_json::from_slice(payload).map_err(|e| SampleError::Malformed(e.to_string()))?;
        sample.validate()?;
        Ok(sample)
    }

    /// Reject readings that would poison aggregates.
    pub fn validate(&self) -> Result<(), SampleError> {
        if self.vm_id.trim().is_empty() {
            return Err(SampleError::EmptyMachineId);
        }

        let cpu = self.cpu.usage_percent;
        if !cpu.is_finite() || !(0.0..=100.0).contains(&cpu) {
            return Err(SampleError::InvalidPercentage {
                field: "cpu.usage_percent",
                value: cpu,
            });
        }

        for (field, value) in [
            ("load.1min", self.load.one),
            ("load.5min", self.load.five),
            ("load.15min", self.load.fifteen),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SampleError::InvalidReading { field, value });
            }
        }

        if let Some(temp) = self.temperature_celsius {
            if !temp.is_finite() {
                return Err(SampleError::InvalidReading {
                    field: "temperature_celsius",
                    value: temp,
                });
            }
        }

        Ok(())
    }

    /// Combined usage across every filesystem, `None` if no disk reports capacity.
    pub fn disk_usage_percent(&self) -> Option<f64> {
        let (used, total) = self.disk.iter().fold((0u128, 0u128), |(u, t), d| {
            (u + u128::from(d.used), t + u128::from(d.total))
        });
        if total == 0 {
            return None;
        }
        Some(used as f64 / total as f64 * 100.0)
    }

    /// True when the sample carries an explicit `offline` status.
    pub fn is_offline(&self) -> bool {
        self.status == Some(MachineStatus::Offline)
    }
}

/// Sample builders for tests in this and dependent crates.
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures {
    use super::*;

    /// A healthy sample with one disk and one interface.
    pub fn sample(vm_id: &str) -> MetricSample {
        MetricSample {
            vm_id: vm_id.to_string(),
            timestamp: Utc::now(),
            cpu: CpuReading {
                usage_percent: 12.5,
                cores: Some(4),
            },
            memory: MemoryReading {
                total: 8 * 1024 * 1024 * 1024,
                used: 2 * 1024 * 1024 * 1024,
                free: 6 * 1024 * 1024 * 1024,
                available: Some(6 * 1024 * 1024 * 1024),
            },
            disk: vec![DiskReading {
                filesystem: "/dev/sda1".into(),
                total: 100,
                used: 40,
                available: 60,
                mount: "/".into(),
            }],
            network: vec![NetworkReading {
                interface: "eth0".into(),
                rx_bytes: 1000,
                rx_packets: 10,
                tx_bytes: 500,
                tx_packets: 5,
            }],
            processes: ProcessSummary {
                total: 120,
                top_processes: vec![],
            },
            load: LoadAverage {
                one: 0.5,
                five: 0.4,
                fifteen: 0.3,
            },
            uptime_seconds: 3600,
            temperature_celsius: None,
            hostname: "web-01".into(),
            os: "linux".into(),
            kernel: "6.1.0".into(),
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample;
    use super::*;
    use serde_json::json;

    fn wire_sample() -> serde_json::Value {
        json!({
            "vm_id": "vm-1",
            "timestamp": "2024-05-01T10:00:00Z",
            "cpu": { "usage_percent": 42.0 },
            "memory": { "total": 1000, "used": 500, "free": 500 },
            "disk": [
                { "filesystem": "/dev/sda1", "total": 100, "used": 90, "available": 10, "mount": "/" }
            ],
            "network": [
                { "interface": "eth0", "rx_bytes": 1, "rx_packets": 1, "tx_bytes": 2, "tx_packets": 2 }
            ],
            "processes": {
                "total": 3,
                "top_processes": [
                    { "pid": 1, "user": "root", "cpu": 0.1, "memory": 0.2, "command": "init" }
                ]
            },
            "load": { "1min": 0.5, "5min": 0.25, "15min": 0.1 },
            "uptime_seconds": 99,
            "hostname": "h",
            "os": "linux",
            "kernel": "6.1"
        })
    }

    #[test]
    fn test_decode_wire_sample() {
        let bytes = serde_json::to_vec(&wire_sample()).unwrap();
        let sample = MetricSample::decode(&bytes).unwrap();

        assert_eq!(sample.vm_id, "vm-1");
        assert_eq!(sample.load.one, 0.5);
        assert_eq!(sample.memory.available, None);
        assert_eq!(sample.status, None);
        assert_eq!(sample.processes.top_processes[0].command, "init");
    }

    #[test]
    fn test_wire_field_names_survive_reencoding() {
        let bytes = serde_json::to_vec(&wire_sample()).unwrap();
        let sample = MetricSample::decode(&bytes).unwrap();
        let value = serde_json::to_value(&sample).unwrap();

        assert_eq!(value["load"]["1min"], json!(0.5));
        assert_eq!(value["load"]["15min"], json!(0.1));
        assert!(value.get("temperature_celsius").is_none());
    }

    #[test]
    fn test_missing_cpu_reading_is_rejected() {
        let mut wire = wire_sample();
        wire["cpu"] = json!({});
        let bytes = serde_json::to_vec(&wire).unwrap();

        let err = MetricSample::decode(&bytes).unwrap_err();
        assert!(matches!(err, SampleError::Malformed(_)));
    }

    #[test]
    fn test_out_of_range_cpu_is_rejected() {
        let mut s = sample("vm-1");
        s.cpu.usage_percent = 140.0;
        assert!(matches!(
            s.validate(),
            Err(SampleError::InvalidPercentage { field: "cpu.usage_percent", .. })
        ));
    }

    #[test]
    fn test_empty_vm_id_is_rejected() {
        let s = sample("  ");
        assert_eq!(s.validate(), Err(SampleError::EmptyMachineId));
    }

    #[test]
    fn test_unknown_status_maps_to_unknown() {
        let mut wire = wire_sample();
        wire["status"] = json!("rebooting");
        let bytes = serde_json::to_vec(&wire).unwrap();

        let sample = MetricSample::decode(&bytes).unwrap();
        assert_eq!(sample.status, Some(MachineStatus::Unknown));
        assert!(!sample.is_offline());
    }

    #[test]
    fn test_usage_percent_helpers() {
        let mut s = sample("vm-1");
        assert_eq!(s.memory.usage_percent(), Some(25.0));
        assert_eq!(s.disk_usage_percent(), Some(40.0));

        s.memory.total = 0;
        s.disk.clear();
        assert_eq!(s.memory.usage_percent(), None);
        assert_eq!(s.disk_usage_percent(), None);
    }

    #[test]
    fn test_disk_usage_sums_past_u64() {
        let mut s = sample("vm-big");
        s.disk[0].total = u64::MAX;
        s.disk[0].used = u64::MAX;
        let mut small = s.disk[0].clone();
        small.total = 10;
        small.used = 10;
        s.disk.push(small);

        assert!(s.validate().is_ok());
        assert_eq!(s.disk_usage_percent(), Some(100.0));
    }
}
