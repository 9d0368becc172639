//! # Shared Bus - Topic Bus Client
//!
//! Durable topic-based publish/subscribe with exchange/queue binding,
//! manual acknowledgement, backpressure-aware publish and request/reply
//! over private reply queues.
//!
//! ## Routing
//!
//! ```text
//! ┌───────────┐  publish(exchange, key)  ┌──────────┐  binding matches  ┌─────────┐
//! │ Publisher │ ───────────────────────► │ Exchange │ ────────────────► │  Queue  │
//! └───────────┘                          └──────────┘                   └────┬────┘
//!                                                                            │ prefetch = 1
//!                                                                            ▼
//!                                                      handler(payload, Acknowledger)
//!                                                          ack ──► removed
//!                                                          nack / error / panic ──► requeued
//! ```
//!
//! ## Delivery Guarantees
//!
//! - At-least-once: every failure path requeues, nothing is discarded
//! - Per-queue FIFO towards a single consumer
//! - `publish` returns only after the transport has buffered the message
//!
//! The broker itself sits behind [`BusConnector`]/[`BusChannel`];
//! [`InMemoryBroker`] implements them for tests and single-node runs.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod error;
pub mod memory;
pub mod message;
pub mod pattern;
pub mod pending;
pub mod subscriber;
pub mod transport;

use std::time::Duration;

pub use client::BusClient;
pub use error::BusError;
pub use memory::{InMemoryBroker, MemoryChannel};
pub use message::{
    ConsumeOptions, Delivery, DeliveryTag, ExchangeKind, MessageProperties, OutboundMessage,
    PublishOptions, PublishStatus, QueueInfo, QueueOptions,
};
pub use pattern::{binding_matches, topic_matches};
pub use pending::{CorrelationId, PendingReplies};
pub use subscriber::{Acknowledger, DeliveryInfo, SubscriptionHandle};
pub use transport::{BusChannel, BusConnector, ConsumerStream};

/// Unacknowledged deliveries a subscription may hold at once.
pub const DEFAULT_PREFETCH: u16 = 1;

/// Reply wait used by [`BusClient::rpc`] when none is given.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_PREFETCH, 1);
        assert_eq!(DEFAULT_RPC_TIMEOUT, Duration::from_secs(5));
    }
}
