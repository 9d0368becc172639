//! # Kafka Transport
//!
//! The transport ports over librdkafka. Enabled with the `kafka` feature.
//!
//! librdkafka fixes `acks` per producer, not per send, and idempotence
//! requires `acks=all`. The producer therefore always runs with `acks=all`
//! and the per-send [`Acks`] only ever strengthens to that level.
//! Partitioning uses `murmur2_random`, the Java client's hash, so keys land
//! where [`crate::partitioner::partition_for_key`] says.

use crate::error::StreamError;
use crate::record::{
    Acks, ConsumedRecord, OffsetReset, PartitionMetadata, ProducerRecord, RecordMetadata,
    TopicConfig, TopicMetadata,
};
use crate::transport::{LogAdmin, LogBroker, LogConsumer, LogProducer, ProducerConfig};
use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker connector backed by librdkafka.
#[derive(Debug, Clone, Default)]
pub struct KafkaLogBroker;

impl KafkaLogBroker {
    pub fn new() -> Self {
        Self
    }
}

fn bootstrap(brokers: &[String]) -> Result<String, StreamError> {
    let list: Vec<&str> = brokers
        .iter()
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .collect();
    if list.is_empty() {
        return Err(StreamError::Connection("no brokers configured".to_string()));
    }
    Ok(list.join(","))
}

fn connection_error(e: KafkaError) -> StreamError {
    StreamError::Connection(e.to_string())
}

#[async_trait]
impl LogBroker for KafkaLogBroker {
    async fn connect_producer(
        &self,
        brokers: &[String],
        config: &ProducerConfig,
    ) -> Result<Arc<dyn LogProducer>, StreamError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap(brokers)?)
            .set("client.id", &config.client_id)
            .set("enable.idempotence", config.idempotent.to_string())
            .set("acks", "all")
            .set(
                "max.in.flight.requests.per.connection",
                config.max_in_flight_requests.to_string(),
            )
            .set("retries", config.retries.to_string())
            .set("retry.backoff.ms", config.retry_backoff.as_millis().to_string())
            .set("request.timeout.ms", config.request_timeout.as_millis().to_string())
            .set(
                "allow.auto.create.topics",
                config.allow_auto_topic_creation.to_string(),
            )
            .set("partitioner", "murmur2_random")
            .create()
            .map_err(connection_error)?;

        info!(client_id = %config.client_id, "Kafka producer created");
        Ok(Arc::new(KafkaProducer {
            producer,
            timeout: config.request_timeout,
        }))
    }

    async fn connect_admin(&self, brokers: &[String]) -> Result<Arc<dyn LogAdmin>, StreamError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", bootstrap(brokers)?)
            .create()
            .map_err(connection_error)?;
        Ok(Arc::new(KafkaAdmin {
            admin: Arc::new(admin),
        }))
    }

    async fn connect_consumer(
        &self,
        brokers: &[String],
        group_id: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn LogConsumer>, StreamError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap(brokers)?)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", reset.as_str())
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(connection_error)?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| StreamError::Consumer(e.to_string()))?;

        info!(group_id, topic, auto_offset_reset = reset.as_str(), "Kafka consumer subscribed");
        Ok(Box::new(KafkaConsumer {
            consumer,
            topic: topic.to_string(),
            closed: false,
            last_commit: None,
        }))
    }
}

struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

#[async_trait]
impl LogProducer for KafkaProducer {
    async fn send(
        &self,
        topic: &str,
        records: Vec<ProducerRecord>,
        acks: Acks,
    ) -> Result<Vec<RecordMetadata>, StreamError> {
        if acks != Acks::All {
            debug!(topic, acks = acks.as_i16(), "Producer runs with acks=all");
        }
        let mut pending = Vec::with_capacity(records.len());
        for record in &records {
            let mut headers = OwnedHeaders::new();
            for (key, value) in &record.headers {
                headers = headers.insert(Header {
                    key,
                    value: Some(value.as_bytes()),
                });
            }
            let mut future = FutureRecord::to(topic)
                .payload(&record.value)
                .timestamp(record.timestamp_ms)
                .headers(headers);
            if let Some(key) = &record.key {
                future = future.key(key.as_bytes());
            }
            pending.push(self.producer.send(future, Timeout::After(self.timeout)));
        }

        let delivered = join_all(pending)
            .await
            .into_iter()
            .map(|result| result.map_err(|(e, _)| e.to_string()))
            .collect();
        batch_outcome(topic, delivered)
    }

    async fn disconnect(&self) -> Result<(), StreamError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?
            .map_err(connection_error)
    }
}

/// Fold per-record delivery results into one batch result. Any failure
/// fails the batch, carrying every record that did get acknowledged.
fn batch_outcome(
    topic: &str,
    delivered: Vec<Result<(i32, i64), String>>,
) -> Result<Vec<RecordMetadata>, StreamError> {
    let total = delivered.len();
    let mut acknowledged = Vec::with_capacity(total);
    let mut first_error = None;
    for result in delivered {
        match result {
            Ok((partition, offset)) => acknowledged.push(RecordMetadata {
                topic: topic.to_string(),
                partition,
                offset,
            }),
            Err(reason) => {
                first_error.get_or_insert(reason);
            }
        }
    }
    match first_error {
        None => Ok(acknowledged),
        Some(reason) => Err(StreamError::Publish {
            topic: topic.to_string(),
            reason,
            failed: total - acknowledged.len(),
            acknowledged,
        }),
    }
}

struct KafkaAdmin {
    admin: Arc<AdminClient<DefaultClientContext>>,
}

#[async_trait]
impl LogAdmin for KafkaAdmin {
    async fn list_topics(&self) -> Result<Vec<String>, StreamError> {
        let admin = Arc::clone(&self.admin);
        tokio::task::spawn_blocking(move || {
            let metadata = admin
                .inner()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map_err(|e| StreamError::Admin(e.to_string()))?;
            Ok(metadata
                .topics()
                .iter()
                .map(|t| t.name().to_string())
                .collect())
        })
        .await
        .map_err(|e| StreamError::Admin(e.to_string()))?
    }

    async fn create_topic(&self, config: &TopicConfig) -> Result<(), StreamError> {
        let entries = config.entries();
        let mut topic = NewTopic::new(
            &config.name,
            config.partitions as i32,
            TopicReplication::Fixed(i32::from(config.replication_factor)),
        );
        for (key, value) in &entries {
            topic = topic.set(key, value);
        }

        let results = self
            .admin
            .create_topics([&topic], &AdminOptions::new())
            .await
            .map_err(|e| StreamError::Admin(e.to_string()))?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(StreamError::TopicAlreadyExists(name));
                }
                Err((name, code)) => {
                    return Err(StreamError::Admin(format!("{name}: {code}")));
                }
            }
        }
        Ok(())
    }

    async fn describe_topics(&self, topics: &[String]) -> Result<Vec<TopicMetadata>, StreamError> {
        let admin = Arc::clone(&self.admin);
        let topics = topics.to_vec();
        tokio::task::spawn_blocking(move || {
            let client = admin.inner();
            let mut described = Vec::with_capacity(topics.len());
            for name in topics {
                let metadata = client
                    .fetch_metadata(Some(&name), METADATA_TIMEOUT)
                    .map_err(|e| StreamError::Admin(e.to_string()))?;
                let Some(topic) = metadata.topics().iter().find(|t| t.name() == name) else {
                    return Err(StreamError::TopicNotFound(name));
                };
                if topic.error().is_some() {
                    return Err(StreamError::TopicNotFound(name));
                }

                let mut partitions = Vec::with_capacity(topic.partitions().len());
                for partition in topic.partitions() {
                    let (low, high) = client
                        .fetch_watermarks(&name, partition.id(), METADATA_TIMEOUT)
                        .map_err(|e| StreamError::Admin(e.to_string()))?;
                    partitions.push(PartitionMetadata {
                        partition: partition.id(),
                        low_watermark: low,
                        high_watermark: high,
                    });
                }
                partitions.sort_by_key(|p| p.partition);
                described.push(TopicMetadata { name, partitions });
            }
            Ok(described)
        })
        .await
        .map_err(|e| StreamError::Admin(e.to_string()))?
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
    closed: bool,
    /// Offsets of the latest async commit, made durable on close.
    last_commit: Option<TopicPartitionList>,
}

#[async_trait]
impl LogConsumer for KafkaConsumer {
    async fn poll(&mut self) -> Option<Result<ConsumedRecord, StreamError>> {
        if self.closed {
            return None;
        }
        let message = match self.consumer.recv().await {
            Ok(message) => message,
            Err(e) => return Some(Err(StreamError::Consumer(e.to_string()))),
        };

        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| {
                        let value = h
                            .value
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default();
                        (h.key.to_string(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Ok(ConsumedRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp_ms: message.timestamp().to_millis().unwrap_or_default(),
            headers,
        }))
    }

    async fn commit(&mut self, offsets: &[(i32, i64)]) -> Result<(), StreamError> {
        let list = offset_list(&self.topic, offsets)?;
        self.consumer
            .commit(&list, CommitMode::Async)
            .map_err(|e| StreamError::Consumer(e.to_string()))?;
        self.last_commit = Some(list);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        if !self.closed {
            self.closed = true;
            if let Some(list) = self.last_commit.take() {
                if let Err(e) = self.consumer.commit(&list, CommitMode::Sync) {
                    warn!(topic = %self.topic, error = %e, "Final offset commit failed");
                }
            }
            self.consumer.unsubscribe();
            debug!(topic = %self.topic, "Kafka consumer left group");
        }
        Ok(())
    }
}

fn offset_list(topic: &str, offsets: &[(i32, i64)]) -> Result<TopicPartitionList, StreamError> {
    let mut list = TopicPartitionList::new();
    for (partition, offset) in offsets {
        list.add_partition_offset(topic, *partition, Offset::Offset(*offset))
            .map_err(|e| StreamError::Consumer(e.to_string()))?;
    }
    Ok(list)
}

impl Drop for KafkaConsumer {
    fn drop(&mut self) {
        if !self.closed {
            warn!(topic = %self.topic, "Kafka consumer dropped without close");
        }
    }
}
