//! # Bus Errors
//!
//! Transport-level errors bubble to the immediate caller. Per-message
//! processing errors never leave a subscription loop.

use std::time::Duration;
use thiserror::Error;

/// Errors from topic bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The client was closed or the broker tore the connection down.
    #[error("Bus client is not connected")]
    NotConnected,

    /// The broker is unreachable or refused the credentials.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An exchange or queue already exists with different settings.
    #[error("Declaration conflict for {name}: {reason}")]
    DeclarationConflict { name: String, reason: String },

    /// No reply arrived within the request timeout.
    #[error("RPC request to {routing_key} timed out after {timeout:?}")]
    Timeout {
        routing_key: String,
        timeout: Duration,
    },

    /// The broker rejected a publish.
    #[error("Publish to {exchange}/{routing_key} failed: {reason}")]
    Publish {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    /// A payload could not be decoded.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// Any other channel-level failure reported by the broker.
    #[error("Channel error: {0}")]
    Channel(String),
}

impl BusError {
    /// True for errors a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Timeout { .. } | BusError::Connection(_))
    }
}
