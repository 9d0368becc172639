//! # Shared Types Crate
//!
//! Wire contracts exchanged over the topic bus and the metrics stream.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every payload that crosses a service
//!   boundary is defined here, once.
//! - **Fail Closed**: decoding a metric sample rejects missing or malformed
//!   required fields instead of defaulting them.
//! - **Names, not strings**: exchanges, queues, topics and message patterns
//!   live in [`topology`] so producers and consumers cannot drift apart.

pub mod alert;
pub mod errors;
pub mod metrics;
pub mod response;
pub mod topology;

pub use alert::{Alert, AlertEvent, AlertKind, Severity};
pub use errors::SampleError;
pub use metrics::{
    CpuReading, DiskReading, LoadAverage, MachineStatus, MemoryReading, MetricSample,
    NetworkReading, ProcessInfo, ProcessSummary,
};
pub use response::{PaginatedResponse, ServiceResponse};
