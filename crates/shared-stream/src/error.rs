//! # Stream Errors

use crate::record::RecordMetadata;
use thiserror::Error;

/// Errors from stream client operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The client was closed or never connected.
    #[error("Stream client is not connected")]
    NotConnected,

    /// No broker reachable, or the broker list is empty.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The broker rejected some or all records of a send.
    ///
    /// `acknowledged` lists records the broker did accept before the
    /// failure; `failed` counts those it did not.
    #[error("Publish to {topic} failed ({failed} record(s) unacknowledged): {reason}")]
    Publish {
        topic: String,
        reason: String,
        acknowledged: Vec<RecordMetadata>,
        failed: usize,
    },

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Topic already exists: {0}")]
    TopicAlreadyExists(String),

    /// Topic administration failed for another reason.
    #[error("Admin error: {0}")]
    Admin(String),

    /// Consumer group or fetch failure.
    #[error("Consumer error: {0}")]
    Consumer(String),
}

impl StreamError {
    /// Broker-side condition the producer may retry with the same sequence
    /// numbers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Connection(_))
    }
}
