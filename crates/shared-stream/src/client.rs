//! # Stream Client
//!
//! Owns one producer, one admin session and any number of consumer-group
//! loops against a partitioned log broker.
//!
//! ## Consume Loop
//!
//! ```text
//! poll ──► decode ──► callback ──► mark processed ──► threshold? ──► commit
//!            │            │
//!            └── error ───┴──► log and skip (never stops the loop)
//!
//! interval tick ──► commit processed offsets
//! shutdown      ──► commit processed offsets, leave group
//! ```

use crate::commit::{CommitPolicy, OffsetTracker};
use crate::error::StreamError;
use crate::record::{
    Acks, ConsumedRecord, OffsetReset, ProducerRecord, RecordMetadata, TopicConfig, TopicMetadata,
};
use crate::transport::{LogAdmin, LogBroker, LogConsumer, LogProducer, ProducerConfig};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::MetricSample;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Record key used when a value carries none.
pub const DEFAULT_RECORD_KEY: &str = "default";

/// Values that know their own partitioning key.
pub trait StreamKey {
    fn stream_key(&self) -> Option<&str>;
}

impl StreamKey for MetricSample {
    fn stream_key(&self) -> Option<&str> {
        Some(self.vm_id.as_str()).filter(|k| !k.is_empty())
    }
}

impl StreamKey for serde_json::Value {
    fn stream_key(&self) -> Option<&str> {
        self.get("vm_id").and_then(serde_json::Value::as_str)
    }
}

/// Stream client settings.
#[derive(Debug, Clone, Default)]
pub struct StreamClientConfig {
    pub producer: ProducerConfig,
    pub commit: CommitPolicy,
    /// Start position of groups without committed offsets.
    pub offset_reset: OffsetReset,
}

struct ConsumerTask {
    group_id: String,
    topic: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerTask {
    async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(group_id = %self.group_id, topic = %self.topic, error = %e, "Consumer task ended abnormally");
        }
    }
}

/// Partitioned log stream client.
pub struct StreamClient {
    broker: Arc<dyn LogBroker>,
    brokers: Vec<String>,
    config: StreamClientConfig,
    producer: RwLock<Option<Arc<dyn LogProducer>>>,
    admin: RwLock<Option<Arc<dyn LogAdmin>>>,
    consumers: Mutex<Vec<ConsumerTask>>,
}

impl StreamClient {
    /// Connect the producer and admin session.
    ///
    /// # Errors
    ///
    /// [`StreamError::Connection`] for an empty broker list or an
    /// unreachable broker.
    pub async fn connect(
        broker: Arc<dyn LogBroker>,
        brokers: &[String],
        config: StreamClientConfig,
    ) -> Result<Self, StreamError> {
        let producer = broker.connect_producer(brokers, &config.producer).await?;
        let admin = broker.connect_admin(brokers).await?;
        info!(
            brokers = ?brokers,
            client_id = %config.producer.client_id,
            idempotent = config.producer.idempotent,
            "Stream producer connected"
        );
        Ok(Self {
            broker,
            brokers: brokers.to_vec(),
            config,
            producer: RwLock::new(Some(producer)),
            admin: RwLock::new(Some(admin)),
            consumers: Mutex::new(Vec::new()),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.producer.read().is_some()
    }

    /// Number of running consumer-group loops.
    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }

    fn producer(&self) -> Result<Arc<dyn LogProducer>, StreamError> {
        self.producer.read().clone().ok_or(StreamError::NotConnected)
    }

    fn admin(&self) -> Result<Arc<dyn LogAdmin>, StreamError> {
        self.admin.read().clone().ok_or(StreamError::NotConnected)
    }

    /// Create `name` with default settings unless it already exists.
    pub async fn create_topic(&self, name: &str, partitions: u32) -> Result<(), StreamError> {
        self.create_topic_with(TopicConfig::new(name, partitions))
            .await
    }

    /// Create a topic unless it already exists. An existing topic is left
    /// untouched, whatever its settings.
    pub async fn create_topic_with(&self, config: TopicConfig) -> Result<(), StreamError> {
        let admin = self.admin()?;
        let existing = admin.list_topics().await?;
        if existing.iter().any(|t| *t == config.name) {
            info!(topic = %config.name, "Topic already exists");
            return Ok(());
        }

        match admin.create_topic(&config).await {
            Ok(()) => {
                info!(
                    topic = %config.name,
                    partitions = config.partitions,
                    replication_factor = config.replication_factor,
                    retention_ms = config.retention_ms,
                    compression = %config.compression,
                    "Topic created"
                );
                Ok(())
            }
            Err(StreamError::TopicAlreadyExists(name)) => {
                info!(topic = %name, "Topic created concurrently");
                Ok(())
            }
            Err(e) => {
                error!(topic = %config.name, error = %e, "Failed to create topic");
                Err(e)
            }
        }
    }

    /// Partition offsets of each topic.
    pub async fn topic_metadata(&self, topics: &[&str]) -> Result<Vec<TopicMetadata>, StreamError> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        self.admin()?.describe_topics(&topics).await
    }

    /// Publish one value keyed by machine id.
    pub async fn publish_metric<T: Serialize + Sync + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<RecordMetadata, StreamError> {
        let record = ProducerRecord {
            key: Some(key.to_string()),
            value: encode(value)?,
            timestamp_ms: now_millis(),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("vm-id".to_string(), key.to_string()),
            ],
        };
        let mut sent = self.publish_records(topic, vec![record], Acks::All).await?;
        debug!(topic, vm_id = key, "Published metric");
        sent.pop().ok_or_else(|| StreamError::Publish {
            topic: topic.to_string(),
            reason: "broker returned no metadata".to_string(),
            acknowledged: Vec::new(),
            failed: 1,
        })
    }

    /// Publish a batch in one request, waiting for all in-sync replicas.
    /// Each value is keyed by its own [`StreamKey`].
    pub async fn publish_metrics<T: Serialize + StreamKey + Sync>(
        &self,
        topic: &str,
        values: &[T],
    ) -> Result<Vec<RecordMetadata>, StreamError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let timestamp_ms = now_millis();
        let records = values
            .iter()
            .map(|value| {
                Ok(ProducerRecord {
                    key: Some(value.stream_key().unwrap_or(DEFAULT_RECORD_KEY).to_string()),
                    value: encode(value)?,
                    timestamp_ms,
                    headers: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, StreamError>>()?;

        let sent = self.publish_records(topic, records, Acks::All).await?;
        debug!(topic, count = sent.len(), "Published metrics batch");
        Ok(sent)
    }

    /// Send raw records with an explicit acknowledgement level.
    pub async fn publish_records(
        &self,
        topic: &str,
        records: Vec<ProducerRecord>,
        acks: Acks,
    ) -> Result<Vec<RecordMetadata>, StreamError> {
        let producer = self.producer()?;
        producer.send(topic, records, acks).await.map_err(|e| {
            error!(topic, error = %e, "Failed to publish records");
            e
        })
    }

    /// Join `group_id` on `topic` and invoke `callback` for every record
    /// published from now on.
    ///
    /// Records that fail to decode, callbacks that fail and callbacks that
    /// panic are logged and skipped. Offsets commit per the configured
    /// [`CommitPolicy`]; processed offsets are also committed on close.
    pub async fn subscribe_to_metrics<T, F, Fut, E>(
        &self,
        topic: &str,
        group_id: &str,
        callback: F,
    ) -> Result<(), StreamError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if !self.is_connected() {
            return Err(StreamError::NotConnected);
        }
        let consumer = self
            .broker
            .connect_consumer(&self.brokers, group_id, topic, self.config.offset_reset)
            .await?;
        info!(topic, group_id, "Consumer subscribed");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(consume_loop(
            consumer,
            topic.to_string(),
            group_id.to_string(),
            self.config.commit,
            callback,
            shutdown_rx,
        ));

        self.consumers.lock().push(ConsumerTask {
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            shutdown,
            task,
        });
        Ok(())
    }

    /// Stop every consumer (committing processed offsets), then disconnect
    /// the producer. A failure in one step does not skip the others.
    pub async fn close(&self) -> Result<(), StreamError> {
        let consumers = std::mem::take(&mut *self.consumers.lock());
        for consumer in consumers {
            consumer.stop().await;
        }
        info!("Stream consumers disconnected");

        let producer = self.producer.write().take();
        if let Some(producer) = producer {
            match producer.disconnect().await {
                Ok(()) => info!("Stream producer disconnected"),
                Err(e) => warn!(error = %e, "Error while disconnecting stream producer"),
            }
        }
        self.admin.write().take();
        Ok(())
    }
}

async fn consume_loop<T, F, Fut, E>(
    mut consumer: Box<dyn LogConsumer>,
    topic: String,
    group_id: String,
    policy: CommitPolicy,
    callback: F,
    mut shutdown: watch::Receiver<bool>,
) where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut tracker = OffsetTracker::default();
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => break,
            _ = ticker.tick() => {
                commit_processed(consumer.as_mut(), &mut tracker, &topic, &group_id).await;
            }
            polled = consumer.poll() => match polled {
                None => break,
                Some(Err(e)) => {
                    warn!(topic = %topic, group_id = %group_id, error = %e, "Fetch failed");
                }
                Some(Ok(record)) => {
                    handle_record(&record, &callback).await;
                    if tracker.processed(record.partition, record.offset, policy.threshold) {
                        commit_processed(consumer.as_mut(), &mut tracker, &topic, &group_id).await;
                    }
                }
            },
        }
    }

    commit_processed(consumer.as_mut(), &mut tracker, &topic, &group_id).await;
    if let Err(e) = consumer.close().await {
        warn!(topic = %topic, group_id = %group_id, error = %e, "Error while leaving consumer group");
    }
    debug!(topic = %topic, group_id = %group_id, "Consume loop ended");
}

async fn handle_record<T, F, Fut, E>(record: &ConsumedRecord, callback: &F)
where
    T: DeserializeOwned,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let value: T = match serde_json::from_slice(&record.value) {
        Ok(value) => value,
        Err(e) => {
            error!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Error decoding record, skipping"
            );
            return;
        }
    };

    match AssertUnwindSafe(async move { callback(value).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            error = %e,
            "Error processing record"
        ),
        Err(_) => error!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Record callback panicked"
        ),
    }
}

async fn commit_processed(
    consumer: &mut dyn LogConsumer,
    tracker: &mut OffsetTracker,
    topic: &str,
    group_id: &str,
) {
    let Some(offsets) = tracker.pending() else {
        return;
    };
    match consumer.commit(&offsets).await {
        Ok(()) => {
            debug!(topic, group_id, records = tracker.uncommitted(), offsets = ?offsets, "Offsets committed");
            tracker.committed();
        }
        Err(e) => warn!(topic, group_id, error = %e, "Offset commit failed, will retry"),
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StreamError> {
    serde_json::to_vec(value).map_err(|e| StreamError::Serialization(e.to_string()))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
