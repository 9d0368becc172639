//! # Bus Messages
//!
//! Topology declarations and the message envelope that flows through the bus.
//! A message is an opaque JSON payload plus routing metadata; the delivery tag
//! only exists on the consuming side and is never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange routing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Routing key must equal the binding key.
    Direct,
    /// Every bound queue receives every message.
    Fanout,
    /// Dot-separated pattern matching with `*` and `#`.
    Topic,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            other => Err(format!("unknown exchange type: {other}")),
        }
    }
}

/// Queue declaration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survives broker restarts.
    pub durable: bool,
    /// Owned by the declaring connection and removed when it closes.
    pub exclusive: bool,
    /// Removed once its last consumer is cancelled.
    pub auto_delete: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

impl QueueOptions {
    /// Options for a private, broker-named reply queue.
    pub fn reply_queue() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Queue metadata returned by a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: usize,
    pub consumer_count: usize,
}

/// Message properties carried alongside the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: Option<u64>,
    /// Delivery mode 2: written to disk by a durable queue.
    pub persistent: bool,
}

/// A message on its way to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

/// Opaque per-channel delivery identifier used for ack/nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub consumer_tag: String,
    pub exchange: String,
    pub routing_key: String,
    /// Set when the message was requeued after a nack or a channel close.
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

/// Per-publish options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub persistent: bool,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            correlation_id: None,
            reply_to: None,
        }
    }
}

/// Outcome of handing a message to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    /// Buffered without pressure.
    Accepted,
    /// Buffered, but the write buffer is above its high-water mark; the
    /// caller must wait for a drain signal before publishing more.
    BufferFull,
}

/// Consumer registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Deliveries count as acknowledged as soon as they are sent.
    pub no_ack: bool,
    /// No other consumer may attach to the queue.
    pub exclusive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_kind_parse() {
        assert_eq!("topic".parse::<ExchangeKind>(), Ok(ExchangeKind::Topic));
        assert_eq!(ExchangeKind::Fanout.to_string(), "fanout");
        assert!("headers".parse::<ExchangeKind>().is_err());
    }

    #[test]
    fn test_defaults_are_durable_and_persistent() {
        assert!(QueueOptions::default().durable);
        assert!(PublishOptions::default().persistent);

        let reply = QueueOptions::reply_queue();
        assert!(reply.exclusive && reply.auto_delete && !reply.durable);
    }
}
