//! Ports layer for the monitor.
//!
//! Only driven ports: the monitor publishes alerts and reads the clock.
//! Inbound calls go straight to [`crate::MonitorService`].

pub mod outbound;

pub use outbound::{AlertPublisher, SystemTimeSource, TimeSource};
