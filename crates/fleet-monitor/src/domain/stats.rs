//! Rolling statistics over buffered samples.

use serde::{Deserialize, Serialize};
use shared_types::MetricSample;

/// Relative change (percent) between the halves of a series that counts as
/// a trend.
pub const TREND_THRESHOLD_PERCENT: f64 = 5.0;

/// Arithmetic mean, `0` for an empty series.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation, `0` for an empty series.
pub fn std_dev(values: &[f64]) -> f64 {
    let avg = mean(values);
    let squares: Vec<f64> = values.iter().map(|v| (v - avg).powi(2)).collect();
    mean(&squares).sqrt()
}

/// Direction of a short series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Ascending,
    Descending,
    Stable,
}

/// Compare the mean of the second half of `values` to the first half.
///
/// Fewer than two points is `Stable`. With an odd length the middle point
/// belongs to the second half. A zero first-half mean has no relative
/// change: any positive second half is `Ascending`, anything else `Stable`.
pub fn trend(values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::Stable;
    }
    let (first, second) = values.split_at(values.len() / 2);
    let (first, second) = (mean(first), mean(second));

    if first == 0.0 {
        return if second > 0.0 { Trend::Ascending } else { Trend::Stable };
    }
    let change = (second - first) / first.abs() * 100.0;
    if change > TREND_THRESHOLD_PERCENT {
        Trend::Ascending
    } else if change < -TREND_THRESHOLD_PERCENT {
        Trend::Descending
    } else {
        Trend::Stable
    }
}

/// Summary of one percentage series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl SeriesStats {
    /// `None` for an empty series.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            average: mean(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            std_dev: std_dev(values),
        })
    }
}

/// CPU, memory and disk statistics over a set of samples.
///
/// Memory and disk are `None` when no sample reports capacity for them.
/// Disk usage of a sample is used/total summed over its filesystems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub data_points: usize,
    pub cpu: SeriesStats,
    pub memory: Option<SeriesStats>,
    pub disk: Option<SeriesStats>,
}

impl Aggregates {
    /// `None` when `samples` is empty.
    pub fn compute(samples: &[MetricSample]) -> Option<Self> {
        let cpu: Vec<f64> = samples.iter().map(|s| s.cpu.usage_percent).collect();
        let memory: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.memory.usage_percent())
            .collect();
        let disk: Vec<f64> = samples
            .iter()
            .filter_map(MetricSample::disk_usage_percent)
            .collect();

        Some(Self {
            data_points: samples.len(),
            cpu: SeriesStats::from_values(&cpu)?,
            memory: SeriesStats::from_values(&memory),
            disk: SeriesStats::from_values(&disk),
        })
    }
}
