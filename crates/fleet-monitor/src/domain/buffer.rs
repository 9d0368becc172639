//! # Per-Machine Ring Buffer
//!
//! The most recent N samples of every machine, in arrival order. Pure
//! in-memory cache: empty after a restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shared_types::MetricSample;
use std::collections::VecDeque;

/// Bounded FIFO of samples per machine id.
#[derive(Debug)]
pub struct MetricsBuffer {
    capacity: usize,
    machines: DashMap<String, VecDeque<MetricSample>>,
}

impl MetricsBuffer {
    /// `capacity` below 1 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            machines: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, evicting the oldest ones over capacity. Returns the
    /// number evicted.
    pub fn push(&self, sample: MetricSample) -> usize {
        let mut samples = self.machines.entry(sample.vm_id.clone()).or_default();
        samples.push_back(sample);
        let mut evicted = 0;
        while samples.len() > self.capacity {
            samples.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn latest(&self, vm_id: &str) -> Option<MetricSample> {
        self.machines.get(vm_id).and_then(|s| s.back().cloned())
    }

    /// All buffered samples of a machine, oldest first.
    pub fn samples(&self, vm_id: &str) -> Vec<MetricSample> {
        self.machines
            .get(vm_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Samples taken at or after `cutoff`.
    pub fn since(&self, vm_id: &str, cutoff: DateTime<Utc>) -> Vec<MetricSample> {
        self.machines
            .get(vm_id)
            .map(|s| s.iter().filter(|m| m.timestamp >= cutoff).cloned().collect())
            .unwrap_or_default()
    }

    /// A page of samples plus the total buffered for the machine.
    pub fn page(&self, vm_id: &str, offset: usize, limit: usize) -> (Vec<MetricSample>, usize) {
        match self.machines.get(vm_id) {
            Some(s) => (s.iter().skip(offset).take(limit).cloned().collect(), s.len()),
            None => (Vec::new(), 0),
        }
    }

    pub fn len(&self, vm_id: &str) -> usize {
        self.machines.get(vm_id).map(|s| s.len()).unwrap_or_default()
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// Machine ids, sorted.
    pub fn machine_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.machines.iter().map(|e| e.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    /// Latest sample of every machine, sorted by machine id.
    pub fn latest_per_machine(&self) -> Vec<MetricSample> {
        let mut latest: Vec<MetricSample> = self
            .machines
            .iter()
            .filter_map(|e| e.value().back().cloned())
            .collect();
        latest.sort_by(|a, b| a.vm_id.cmp(&b.vm_id));
        latest
    }
}
