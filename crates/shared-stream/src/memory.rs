//! # In-Memory Log Broker
//!
//! A single-process partitioned log implementing the transport ports:
//!
//! - keyed records land on `murmur2(key) % partitions`, keyless ones
//!   round-robin
//! - every partition is an append-only vector; the offset is the index
//! - idempotent producers get a producer id, and each partition batch
//!   carries a base sequence number; a resend of the last accepted batch is
//!   acknowledged without appending again
//! - consumer groups split partitions between members with range
//!   assignment and bump a generation on every join/leave
//! - committed offsets are stored per group and partition
//!
//! Fault hooks ([`InMemoryLogBroker::fail_next_acks`],
//! [`InMemoryLogBroker::set_reachable`]) simulate lost acknowledgements and
//! unreachable brokers.

use crate::error::StreamError;
use crate::partitioner::partition_for_key;
use crate::record::{
    Acks, ConsumedRecord, OffsetReset, PartitionMetadata, ProducerRecord, RecordMetadata,
    TopicConfig, TopicMetadata,
};
use crate::transport::{LogAdmin, LogBroker, LogConsumer, LogProducer, ProducerConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Partition count of auto-created topics (`num.partitions`).
pub const DEFAULT_AUTO_CREATE_PARTITIONS: u32 = 1;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    value: Vec<u8>,
    timestamp_ms: i64,
    headers: Vec<(String, String)>,
}

struct TopicState {
    config: TopicConfig,
    partitions: Vec<Vec<StoredRecord>>,
}

impl TopicState {
    fn new(config: TopicConfig) -> Self {
        let partitions = (0..config.partitions).map(|_| Vec::new()).collect();
        Self { config, partitions }
    }
}

#[derive(Debug, Clone, Copy)]
struct LastBatch {
    base_sequence: i32,
    base_offset: i64,
}

struct GroupState {
    members: Vec<u64>,
    generation: u64,
    committed: HashMap<i32, i64>,
}

impl GroupState {
    /// Range assignment: contiguous partition ranges, earlier members take
    /// the remainder.
    fn assignment(&self, member: u64, partitions: u32) -> Vec<i32> {
        let mut members = self.members.clone();
        members.sort_unstable();
        let Some(index) = members.iter().position(|m| *m == member) else {
            return Vec::new();
        };
        let count = members.len() as u32;
        let per_member = partitions / count;
        let extra = partitions % count;
        let index = index as u32;
        let start = index * per_member + index.min(extra);
        let len = per_member + u32::from(index < extra);
        (start..start + len).map(|p| p as i32).collect()
    }
}

enum AppendError {
    /// Appended (or not) but the acknowledgement was lost; safe to resend.
    Transient(String),
    Fatal(String),
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    groups: HashMap<(String, String), GroupState>,
    last_batches: HashMap<(u64, String, i32), LastBatch>,
}

struct Inner {
    state: Mutex<BrokerState>,
    records_or_members_changed: Notify,
    lost_acks: AtomicUsize,
    reachable: AtomicBool,
    next_id: AtomicU64,
    auto_create_partitions: u32,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_reachable(&self) -> Result<(), StreamError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StreamError::Connection(
                "broker transport failure: connection refused".to_string(),
            ))
        }
    }

    /// Partition count of `topic`, creating it when allowed.
    fn ensure_topic(&self, topic: &str, auto_create: bool) -> Result<u32, StreamError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.topics.get(topic) {
            return Ok(existing.config.partitions);
        }
        if !auto_create {
            return Err(StreamError::TopicNotFound(topic.to_string()));
        }
        let config = TopicConfig::new(topic, self.auto_create_partitions);
        let partitions = config.partitions;
        state.topics.insert(topic.to_string(), TopicState::new(config));
        info!(topic, partitions, "Topic auto-created on first publish");
        Ok(partitions)
    }

    fn append(
        &self,
        producer: Option<u64>,
        topic: &str,
        partition: i32,
        base_sequence: Option<i32>,
        records: &[ProducerRecord],
    ) -> Result<i64, AppendError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(AppendError::Transient("connection refused".to_string()));
        }

        let base_offset = {
            let mut state = self.state.lock();
            let BrokerState {
                topics,
                last_batches,
                ..
            } = &mut *state;

            let log = topics
                .get_mut(topic)
                .and_then(|t| t.partitions.get_mut(partition as usize))
                .ok_or_else(|| {
                    AppendError::Fatal(format!("UNKNOWN_TOPIC_OR_PARTITION {topic}/{partition}"))
                })?;

            let dedup_key = match (producer, base_sequence) {
                (Some(pid), Some(seq)) => Some(((pid, topic.to_string(), partition), seq)),
                _ => None,
            };

            if let Some((key, seq)) = &dedup_key {
                if let Some(last) = last_batches.get(key) {
                    if *seq == last.base_sequence {
                        debug!(topic, partition, sequence = seq, "Duplicate batch acknowledged");
                        return Ok(last.base_offset);
                    }
                    if *seq < last.base_sequence {
                        return Err(AppendError::Fatal(format!(
                            "OUT_OF_ORDER_SEQUENCE_NUMBER {seq} < {}",
                            last.base_sequence
                        )));
                    }
                }
            }

            let base_offset = log.len() as i64;
            log.extend(records.iter().map(|r| StoredRecord {
                key: r.key.clone(),
                value: r.value.clone(),
                timestamp_ms: r.timestamp_ms,
                headers: r.headers.clone(),
            }));

            if let Some((key, seq)) = dedup_key {
                last_batches.insert(
                    key,
                    LastBatch {
                        base_sequence: seq,
                        base_offset,
                    },
                );
            }
            base_offset
        };

        self.records_or_members_changed.notify_waiters();

        let lost = self
            .lost_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(AppendError::Transient(
                "NETWORK_EXCEPTION: acknowledgement lost".to_string(),
            ));
        }
        Ok(base_offset)
    }
}

/// In-memory partitioned log broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryLogBroker {
    inner: Arc<Inner>,
}

impl InMemoryLogBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_auto_create_partitions(DEFAULT_AUTO_CREATE_PARTITIONS)
    }

    /// Broker whose auto-created topics get `partitions` partitions.
    #[must_use]
    pub fn with_auto_create_partitions(partitions: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                records_or_members_changed: Notify::new(),
                lost_acks: AtomicUsize::new(0),
                reachable: AtomicBool::new(true),
                next_id: AtomicU64::new(0),
                auto_create_partitions: partitions.max(1),
            }),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Append the next `count` partition batches but report their
    /// acknowledgement as lost.
    pub fn fail_next_acks(&self, count: usize) {
        self.inner.lost_acks.store(count, Ordering::SeqCst);
    }

    pub fn topic_exists(&self, topic: &str) -> bool {
        self.inner.state.lock().topics.contains_key(topic)
    }

    pub fn topic_config(&self, topic: &str) -> Option<TopicConfig> {
        self.inner
            .state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.config.clone())
    }

    /// Every record stored in one partition.
    pub fn records(&self, topic: &str, partition: i32) -> Vec<ConsumedRecord> {
        let state = self.inner.state.lock();
        let Some(log) = state
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
        else {
            return Vec::new();
        };
        log.iter()
            .enumerate()
            .map(|(offset, r)| to_consumed(topic, partition, offset as i64, r))
            .collect()
    }

    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.inner
            .state
            .lock()
            .groups
            .get(&(group_id.to_string(), topic.to_string()))
            .and_then(|g| g.committed.get(&partition).copied())
    }

    pub fn group_members(&self, group_id: &str, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .groups
            .get(&(group_id.to_string(), topic.to_string()))
            .map(|g| g.members.len())
            .unwrap_or_default()
    }
}

impl Default for InMemoryLogBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn to_consumed(topic: &str, partition: i32, offset: i64, record: &StoredRecord) -> ConsumedRecord {
    ConsumedRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: record.key.clone(),
        value: record.value.clone(),
        timestamp_ms: record.timestamp_ms,
        headers: record.headers.clone(),
    }
}

fn check_brokers(brokers: &[String]) -> Result<(), StreamError> {
    if brokers.iter().all(|b| b.trim().is_empty()) {
        return Err(StreamError::Connection("no brokers configured".to_string()));
    }
    Ok(())
}

#[async_trait]
impl LogBroker for InMemoryLogBroker {
    async fn connect_producer(
        &self,
        brokers: &[String],
        config: &ProducerConfig,
    ) -> Result<Arc<dyn LogProducer>, StreamError> {
        check_brokers(brokers)?;
        self.inner.check_reachable()?;
        let producer_id = config.idempotent.then(|| self.inner.next_id());
        debug!(client_id = %config.client_id, ?producer_id, "Producer connected");
        Ok(Arc::new(MemoryProducer {
            inner: self.inner.clone(),
            producer_id,
            config: config.clone(),
            sequences: Mutex::new(HashMap::new()),
            round_robin: AtomicUsize::new(0),
            open: AtomicBool::new(true),
        }))
    }

    async fn connect_admin(&self, brokers: &[String]) -> Result<Arc<dyn LogAdmin>, StreamError> {
        check_brokers(brokers)?;
        self.inner.check_reachable()?;
        Ok(Arc::new(MemoryAdmin {
            inner: self.inner.clone(),
        }))
    }

    async fn connect_consumer(
        &self,
        brokers: &[String],
        group_id: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn LogConsumer>, StreamError> {
        check_brokers(brokers)?;
        self.inner.check_reachable()?;
        let member_id = self.inner.next_id();
        {
            let mut state = self.inner.state.lock();
            let ends: Vec<i64> = state
                .topics
                .get(topic)
                .ok_or_else(|| StreamError::TopicNotFound(topic.to_string()))?
                .partitions
                .iter()
                .map(|p| p.len() as i64)
                .collect();
            let group = state
                .groups
                .entry((group_id.to_string(), topic.to_string()))
                .or_insert_with(|| GroupState {
                    members: Vec::new(),
                    generation: 0,
                    committed: ends
                        .iter()
                        .enumerate()
                        .map(|(p, end)| {
                            let start = match reset {
                                OffsetReset::Latest => *end,
                                OffsetReset::Earliest => 0,
                            };
                            (p as i32, start)
                        })
                        .collect(),
                });
            group.members.push(member_id);
            group.generation += 1;
            info!(group_id, topic, member_id, generation = group.generation, "Consumer joined group");
        }
        self.inner.records_or_members_changed.notify_waiters();

        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            member_id,
            generation: 0,
            assignment: Vec::new(),
            positions: BTreeMap::new(),
            next_partition: 0,
            closed: false,
        }))
    }
}

struct MemoryProducer {
    inner: Arc<Inner>,
    producer_id: Option<u64>,
    config: ProducerConfig,
    sequences: Mutex<HashMap<(String, i32), i32>>,
    round_robin: AtomicUsize,
    open: AtomicBool,
}

impl MemoryProducer {
    fn next_sequence(&self, topic: &str, partition: i32, count: usize) -> Option<i32> {
        self.producer_id?;
        let mut sequences = self.sequences.lock();
        let next = sequences.entry((topic.to_string(), partition)).or_insert(0);
        let base = *next;
        *next = next.wrapping_add(count as i32);
        Some(base)
    }
}

#[async_trait]
impl LogProducer for MemoryProducer {
    async fn send(
        &self,
        topic: &str,
        records: Vec<ProducerRecord>,
        acks: Acks,
    ) -> Result<Vec<RecordMetadata>, StreamError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(StreamError::NotConnected);
        }
        let total = records.len();
        let partitions = self
            .inner
            .ensure_topic(topic, self.config.allow_auto_topic_creation)?;

        let mut batches: BTreeMap<i32, Vec<(usize, ProducerRecord)>> = BTreeMap::new();
        for (index, record) in records.into_iter().enumerate() {
            let partition = match &record.key {
                Some(key) => partition_for_key(key.as_bytes(), partitions),
                None => (self.round_robin.fetch_add(1, Ordering::Relaxed) % partitions as usize) as i32,
            };
            batches.entry(partition).or_default().push((index, record));
        }

        let mut results: Vec<Option<RecordMetadata>> = vec![None; total];
        let mut failure: Option<String> = None;

        for (partition, batch) in batches {
            let (indices, batch): (Vec<usize>, Vec<ProducerRecord>) = batch.into_iter().unzip();
            let base_sequence = self.next_sequence(topic, partition, batch.len());

            let mut attempt = 0;
            let outcome = loop {
                match self
                    .inner
                    .append(self.producer_id, topic, partition, base_sequence, &batch)
                {
                    Ok(base_offset) => break Ok(base_offset),
                    Err(AppendError::Transient(_)) if acks == Acks::None => break Ok(-1),
                    Err(AppendError::Transient(reason)) if attempt < self.config.retries => {
                        attempt += 1;
                        warn!(topic, partition, attempt, reason = %reason, "Send not acknowledged, retrying");
                        tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    }
                    Err(AppendError::Transient(reason)) | Err(AppendError::Fatal(reason)) => {
                        break Err(reason)
                    }
                }
            };

            match outcome {
                Ok(base_offset) => {
                    for (i, index) in indices.into_iter().enumerate() {
                        let offset = if acks == Acks::None || base_offset < 0 {
                            -1
                        } else {
                            base_offset + i as i64
                        };
                        results[index] = Some(RecordMetadata {
                            topic: topic.to_string(),
                            partition,
                            offset,
                        });
                    }
                }
                Err(reason) => {
                    failure.get_or_insert(reason);
                }
            }
        }

        let acknowledged: Vec<RecordMetadata> = results.into_iter().flatten().collect();
        match failure {
            None => Ok(acknowledged),
            Some(reason) => Err(StreamError::Publish {
                topic: topic.to_string(),
                reason,
                failed: total - acknowledged.len(),
                acknowledged,
            }),
        }
    }

    async fn disconnect(&self) -> Result<(), StreamError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryAdmin {
    inner: Arc<Inner>,
}

#[async_trait]
impl LogAdmin for MemoryAdmin {
    async fn list_topics(&self) -> Result<Vec<String>, StreamError> {
        self.inner.check_reachable()?;
        let mut topics: Vec<String> = self.inner.state.lock().topics.keys().cloned().collect();
        topics.sort_unstable();
        Ok(topics)
    }

    async fn create_topic(&self, config: &TopicConfig) -> Result<(), StreamError> {
        self.inner.check_reachable()?;
        if config.partitions == 0 {
            return Err(StreamError::Admin(format!(
                "INVALID_PARTITIONS for {}: must be at least 1",
                config.name
            )));
        }
        if config.replication_factor == 0 {
            return Err(StreamError::Admin(format!(
                "INVALID_REPLICATION_FACTOR for {}",
                config.name
            )));
        }
        let mut state = self.inner.state.lock();
        if state.topics.contains_key(&config.name) {
            return Err(StreamError::TopicAlreadyExists(config.name.clone()));
        }
        state
            .topics
            .insert(config.name.clone(), TopicState::new(config.clone()));
        Ok(())
    }

    async fn describe_topics(&self, topics: &[String]) -> Result<Vec<TopicMetadata>, StreamError> {
        self.inner.check_reachable()?;
        let state = self.inner.state.lock();
        topics
            .iter()
            .map(|name| {
                let topic = state
                    .topics
                    .get(name)
                    .ok_or_else(|| StreamError::TopicNotFound(name.clone()))?;
                Ok(TopicMetadata {
                    name: name.clone(),
                    partitions: topic
                        .partitions
                        .iter()
                        .enumerate()
                        .map(|(p, log)| PartitionMetadata {
                            partition: p as i32,
                            low_watermark: 0,
                            high_watermark: log.len() as i64,
                        })
                        .collect(),
                })
            })
            .collect()
    }
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    group_id: String,
    topic: String,
    member_id: u64,
    generation: u64,
    assignment: Vec<i32>,
    positions: BTreeMap<i32, i64>,
    next_partition: usize,
    closed: bool,
}

impl MemoryConsumer {
    fn group_key(&self) -> (String, String) {
        (self.group_id.clone(), self.topic.clone())
    }

    /// Pick up a new assignment after a rebalance. Partitions kept across
    /// generations keep their fetch position; new ones resume from the
    /// group's committed offset.
    fn refresh(&mut self, state: &BrokerState) {
        let Some(group) = state.groups.get(&self.group_key()) else {
            return;
        };
        if group.generation == self.generation {
            return;
        }
        let partitions = state
            .topics
            .get(&self.topic)
            .map(|t| t.config.partitions)
            .unwrap_or_default();
        let assignment = group.assignment(self.member_id, partitions);

        let mut positions = BTreeMap::new();
        for p in &assignment {
            let position = self
                .positions
                .get(p)
                .copied()
                .or_else(|| group.committed.get(p).copied())
                .unwrap_or(0);
            positions.insert(*p, position);
        }

        debug!(
            group_id = %self.group_id,
            topic = %self.topic,
            member_id = self.member_id,
            generation = group.generation,
            partitions = ?assignment,
            "Partitions assigned"
        );
        self.generation = group.generation;
        self.assignment = assignment;
        self.positions = positions;
    }

    fn try_next(&mut self) -> Option<ConsumedRecord> {
        let inner = self.inner.clone();
        let state = inner.state.lock();
        self.refresh(&state);

        let topic = state.topics.get(&self.topic)?;
        let count = self.assignment.len();
        for i in 0..count {
            let slot = (self.next_partition + i) % count;
            let partition = self.assignment[slot];
            let position = self.positions.get(&partition).copied().unwrap_or(0);
            let record = topic
                .partitions
                .get(partition as usize)
                .and_then(|log| log.get(position as usize));
            if let Some(record) = record {
                self.positions.insert(partition, position + 1);
                self.next_partition = slot + 1;
                return Some(to_consumed(&self.topic, partition, position, record));
            }
        }
        None
    }

    fn leave_group(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut state = self.inner.state.lock();
            if let Some(group) = state.groups.get_mut(&self.group_key()) {
                group.members.retain(|m| *m != self.member_id);
                group.generation += 1;
            }
        }
        self.inner.records_or_members_changed.notify_waiters();
        info!(group_id = %self.group_id, topic = %self.topic, member_id = self.member_id, "Consumer left group");
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn poll(&mut self) -> Option<Result<ConsumedRecord, StreamError>> {
        let inner = self.inner.clone();
        loop {
            if self.closed {
                return None;
            }
            let notified = inner.records_or_members_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.try_next() {
                return Some(Ok(record));
            }
            notified.await;
        }
    }

    async fn commit(&mut self, offsets: &[(i32, i64)]) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::NotConnected);
        }
        let inner = self.inner.clone();
        let mut state = inner.state.lock();
        self.refresh(&state);
        let key = self.group_key();
        let group = state
            .groups
            .get_mut(&key)
            .ok_or_else(|| StreamError::Consumer(format!("unknown group {}", self.group_id)))?;
        for (partition, offset) in offsets {
            if self.assignment.contains(partition) {
                group.committed.insert(*partition, *offset);
            } else {
                debug!(group_id = %self.group_id, partition, "Skipping commit for revoked partition");
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.leave_group();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.leave_group();
    }
}
