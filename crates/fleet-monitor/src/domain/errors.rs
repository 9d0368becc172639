//! Monitor error types.

use shared_stream::StreamError;
use shared_types::SampleError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MonitorError {
    /// Thresholds, capacity or window rejected at startup.
    #[error("Invalid monitor configuration: {0}")]
    InvalidConfig(String),

    /// A sample failed decoding or validation and was not buffered.
    #[error(transparent)]
    InvalidSample(#[from] SampleError),

    /// The alert event could not be published. The sample stays buffered.
    #[error("Failed to publish alert event: {0}")]
    Publish(String),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Metrics exposition failed: {0}")]
    Exposition(String),
}
