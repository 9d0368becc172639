//! # Shared Stream Crate
//!
//! Client for a partitioned, replicated log of keyed records.
//!
//! ## Guarantees
//!
//! - **Per-key ordering**: records with the same key land on the same
//!   partition (`murmur2(key) % partitions`) and are consumed in publish
//!   order.
//! - **Idempotent publishing**: a send retried after a lost
//!   acknowledgement is not appended twice.
//! - **At-least-once consumption**: offsets are committed only after the
//!   callback for the record has returned.
//!
//! ## Transports
//!
//! | Transport | Use |
//! |-----------|-----|
//! | [`InMemoryLogBroker`] | single process, tests |
//! | `KafkaLogBroker` (feature `kafka`) | Kafka-compatible clusters |

pub mod client;
pub mod commit;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod partitioner;
pub mod record;
pub mod transport;

pub use client::{StreamClient, StreamClientConfig, StreamKey, DEFAULT_RECORD_KEY};
pub use commit::CommitPolicy;
pub use error::StreamError;
#[cfg(feature = "kafka")]
pub use kafka::KafkaLogBroker;
pub use memory::{InMemoryLogBroker, DEFAULT_AUTO_CREATE_PARTITIONS};
pub use partitioner::{murmur2, partition_for_key};
pub use record::{
    Acks, CleanupPolicy, Compression, ConsumedRecord, OffsetReset, PartitionMetadata,
    ProducerRecord, RecordMetadata, TopicConfig, TopicMetadata, DEFAULT_REPLICATION_FACTOR,
    DEFAULT_RETENTION_MS,
};
pub use transport::{LogAdmin, LogBroker, LogConsumer, LogProducer, ProducerConfig};
