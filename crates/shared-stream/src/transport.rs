//! # Log Broker Ports
//!
//! What [`crate::StreamClient`] needs from a partitioned log broker. The
//! client owns the consume loop, error isolation and commit policy; the
//! transport only moves records and offsets.

use crate::error::StreamError;
use crate::record::{
    Acks, ConsumedRecord, OffsetReset, ProducerRecord, RecordMetadata, TopicConfig, TopicMetadata,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Producer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    pub client_id: String,
    /// Broker-side dedup of retried sends via producer id + sequence numbers.
    pub idempotent: bool,
    /// Create unknown topics on first publish.
    pub allow_auto_topic_creation: bool,
    pub max_in_flight_requests: u32,
    /// Retries of a send whose acknowledgement was lost.
    pub retries: u32,
    /// Wait before retry `n` is `n * retry_backoff`.
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            client_id: "fleetops-client".to_string(),
            idempotent: true,
            allow_auto_topic_creation: true,
            max_in_flight_requests: 5,
            retries: 8,
            retry_backoff: Duration::from_millis(100),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Opens producer, admin and consumer sessions against a broker list.
#[async_trait]
pub trait LogBroker: Send + Sync {
    async fn connect_producer(
        &self,
        brokers: &[String],
        config: &ProducerConfig,
    ) -> Result<Arc<dyn LogProducer>, StreamError>;

    async fn connect_admin(&self, brokers: &[String]) -> Result<Arc<dyn LogAdmin>, StreamError>;

    /// Join `group_id` on `topic`.
    async fn connect_consumer(
        &self,
        brokers: &[String],
        group_id: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn LogConsumer>, StreamError>;
}

#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Send records to `topic` in one request. Metadata is returned in input
    /// order.
    async fn send(
        &self,
        topic: &str,
        records: Vec<ProducerRecord>,
        acks: Acks,
    ) -> Result<Vec<RecordMetadata>, StreamError>;

    async fn disconnect(&self) -> Result<(), StreamError>;
}

#[async_trait]
pub trait LogAdmin: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<String>, StreamError>;

    /// Fails with [`StreamError::TopicAlreadyExists`] for a topic that
    /// already exists.
    async fn create_topic(&self, config: &TopicConfig) -> Result<(), StreamError>;

    async fn describe_topics(&self, topics: &[String]) -> Result<Vec<TopicMetadata>, StreamError>;
}

/// A consumer group member.
#[async_trait]
pub trait LogConsumer: Send {
    /// Next record from the assigned partitions. `None` once the consumer
    /// is closed. Cancel-safe.
    async fn poll(&mut self) -> Option<Result<ConsumedRecord, StreamError>>;

    /// Commit `(partition, next_offset)` pairs for the group.
    async fn commit(&mut self, offsets: &[(i32, i64)]) -> Result<(), StreamError>;

    /// Leave the group.
    async fn close(&mut self) -> Result<(), StreamError>;
}
