//! Adapters layer for the monitor.
//!
//! - `publisher`: alert events onto the topic bus
//! - `subscriber`: samples from the metrics stream
//! - `exposition`: Prometheus text of the latest readings

pub mod exposition;
pub mod publisher;
pub mod subscriber;

pub use publisher::BusAlertPublisher;
pub use subscriber::attach_to_stream;
