//! # Error Types
//!
//! Errors raised while decoding wire contracts.

use thiserror::Error;

/// Errors from decoding or validating a [`crate::MetricSample`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SampleError {
    /// Payload is not valid JSON or does not match the sample schema.
    #[error("Malformed metric sample: {0}")]
    Malformed(String),

    /// The machine identifier is empty.
    #[error("Metric sample has an empty vm_id")]
    EmptyMachineId,

    /// A percentage reading is outside `0..=100` or not finite.
    #[error("Invalid percentage for {field}: {value}")]
    InvalidPercentage { field: &'static str, value: f64 },

    /// A gauge reading is negative or not finite.
    #[error("Invalid reading for {field}: {value}")]
    InvalidReading { field: &'static str, value: f64 },
}
