//! # Records and Topic Settings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Seven days.
pub const DEFAULT_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Single-broker-safe replication factor.
pub const DEFAULT_REPLICATION_FACTOR: u16 = 1;

/// Acknowledgement level of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Acks {
    /// Fire and forget (`acks=0`).
    None,
    /// Partition leader only (`acks=1`).
    Leader,
    /// Every in-sync replica (`acks=-1`).
    All,
}

impl Acks {
    /// Wire value as understood by Kafka brokers.
    pub fn as_i16(&self) -> i16 {
        match self {
            Acks::None => 0,
            Acks::Leader => 1,
            Acks::All => -1,
        }
    }
}

/// Record batch compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log cleanup policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// Drop segments older than the retention period.
    Delete,
    /// Keep the latest record per key.
    Compact,
}

impl CleanupPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupPolicy::Delete => "delete",
            CleanupPolicy::Compact => "compact",
        }
    }
}

/// Settings a topic is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
    pub retention_ms: u64,
    pub compression: Compression,
    pub cleanup_policy: CleanupPolicy,
}

impl TopicConfig {
    /// Replication 1, 7-day retention, gzip, delete policy.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            retention_ms: DEFAULT_RETENTION_MS,
            compression: Compression::Gzip,
            cleanup_policy: CleanupPolicy::Delete,
        }
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_ms = retention.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn compacted(mut self) -> Self {
        self.cleanup_policy = CleanupPolicy::Compact;
        self
    }

    /// Broker config entries (`retention.ms`, `compression.type`, ...).
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("retention.ms", self.retention_ms.to_string()),
            ("compression.type", self.compression.as_str().to_string()),
            ("cleanup.policy", self.cleanup_policy.as_str().to_string()),
        ]
    }
}

/// A record on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    /// Partitioning key. Keyless records are spread round-robin.
    pub key: Option<String>,
    pub value: Vec<u8>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub headers: Vec<(String, String)>,
}

/// Where the broker stored a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    /// `-1` when the send did not wait for an acknowledgement.
    pub offset: i64,
}

/// A record read by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Vec<u8>,
    pub timestamp_ms: i64,
    pub headers: Vec<(String, String)>,
}

/// Per-partition offsets of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub partition: i32,
    /// Oldest offset still retained.
    pub low_watermark: i64,
    /// Offset the next record will get.
    pub high_watermark: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
}

impl TopicMetadata {
    /// Records currently retained across all partitions.
    pub fn total_records(&self) -> i64 {
        self.partitions
            .iter()
            .map(|p| p.high_watermark - p.low_watermark)
            .sum()
    }
}

/// Where a group without committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    Earliest,
    /// Only records published after the group joins.
    #[default]
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}
