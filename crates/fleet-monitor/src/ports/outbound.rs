//! Outbound (Driven) ports for the monitor.

use crate::domain::MonitorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::AlertEvent;

/// Where alert events go.
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, event: &AlertEvent) -> Result<(), MonitorError>;
}

/// Time source for aggregation windows and dashboards.
///
/// Abstracted to allow testing with deterministic time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Publisher that records events in memory, optionally failing.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: parking_lot::Mutex<Vec<AlertEvent>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl AlertPublisher for RecordingPublisher {
    async fn publish(&self, event: &AlertEvent) -> Result<(), MonitorError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MonitorError::Publish("bus unavailable".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Clock fixed at a settable instant.
#[cfg(test)]
pub struct FixedTimeSource(pub parking_lot::Mutex<DateTime<Utc>>);

#[cfg(test)]
impl TimeSource for FixedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}
