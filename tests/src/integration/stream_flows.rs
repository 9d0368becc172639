//! # Stream Flows
//!
//! Keyed partitioning and consumer groups across two [`StreamClient`]s on
//! one [`InMemoryLogBroker`].

use super::eventually;
use parking_lot::Mutex;
use serde_json::Value;
use shared_stream::{
    partition_for_key, CommitPolicy, InMemoryLogBroker, StreamClient, StreamClientConfig,
};
use shared_types::metrics::fixtures::sample;
use shared_types::topology::{consumer_groups, topics};
use shared_types::MetricSample;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

async fn client(broker: &Arc<InMemoryLogBroker>, config: StreamClientConfig) -> StreamClient {
    StreamClient::connect(broker.clone(), &["memory".to_string()], config)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_same_machine_lands_on_one_partition_in_order() {
    let broker = Arc::new(InMemoryLogBroker::new());
    let producer = client(&broker, StreamClientConfig::default()).await;
    producer
        .create_topic(topics::VM_METRICS, topics::VM_METRICS_PARTITIONS)
        .await
        .unwrap();

    let mut partitions = Vec::new();
    for n in 0..10 {
        let mut reading = sample("vm-ordered");
        reading.cpu.usage_percent = f64::from(n);
        let sent = producer
            .publish_metric(topics::VM_METRICS, "vm-ordered", &reading)
            .await
            .unwrap();
        partitions.push(sent.partition);
    }

    let expected = partition_for_key(b"vm-ordered", topics::VM_METRICS_PARTITIONS);
    assert!(partitions.iter().all(|p| *p == expected));

    let stored: Vec<f64> = broker
        .records(topics::VM_METRICS, expected)
        .iter()
        .map(|r| MetricSample::decode(&r.value).unwrap().cpu.usage_percent)
        .collect();
    assert_eq!(stored, (0..10).map(f64::from).collect::<Vec<_>>());

    let metadata = producer.topic_metadata(&[topics::VM_METRICS]).await.unwrap();
    assert_eq!(metadata[0].partitions.len(), 6);
    assert_eq!(metadata[0].total_records(), 10);
}

#[tokio::test]
async fn test_two_groups_each_see_every_record() {
    let broker = Arc::new(InMemoryLogBroker::new());
    let stream = client(&broker, StreamClientConfig::default()).await;
    stream.create_topic(topics::VM_METRICS, 6).await.unwrap();

    let monitor_seen = Arc::new(Mutex::new(Vec::new()));
    let analytics_seen = Arc::new(Mutex::new(Vec::new()));
    for (group, seen) in [
        (consumer_groups::MONITOR_SERVICE, monitor_seen.clone()),
        (consumer_groups::ANALYTICS, analytics_seen.clone()),
    ] {
        stream
            .subscribe_to_metrics(topics::VM_METRICS, group, move |s: MetricSample| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(s.vm_id);
                    Ok::<(), Infallible>(())
                }
            })
            .await
            .unwrap();
    }

    let batch: Vec<MetricSample> = ["vm-1", "vm-2", "vm-3"].into_iter().map(sample).collect();
    stream.publish_metrics(topics::VM_METRICS, &batch).await.unwrap();

    assert!(eventually(Duration::from_secs(2), || monitor_seen.lock().len() == 3).await);
    assert!(eventually(Duration::from_secs(2), || analytics_seen.lock().len() == 3).await);
    let mut seen = monitor_seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["vm-1", "vm-2", "vm-3"]);

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_restarted_group_resumes_after_committed_offset() {
    let broker = Arc::new(InMemoryLogBroker::new());
    let config = StreamClientConfig {
        commit: CommitPolicy {
            interval: Duration::from_secs(60),
            threshold: 1,
        },
        ..StreamClientConfig::default()
    };
    let producer = client(&broker, StreamClientConfig::default()).await;
    producer.create_topic(topics::ALERTS, 1).await.unwrap();

    let first_run = Arc::new(Mutex::new(Vec::new()));
    let consumer = client(&broker, config.clone()).await;
    {
        let seen = first_run.clone();
        consumer
            .subscribe_to_metrics(topics::ALERTS, "replay-group", move |v: Value| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(v["n"].as_i64().unwrap_or(-1));
                    Ok::<(), Infallible>(())
                }
            })
            .await
            .unwrap();
    }
    for n in 0..3 {
        producer
            .publish_metric(topics::ALERTS, "k", &serde_json::json!({ "n": n }))
            .await
            .unwrap();
    }
    assert!(eventually(Duration::from_secs(2), || first_run.lock().len() == 3).await);
    consumer.close().await.unwrap();
    assert_eq!(broker.committed_offset("replay-group", topics::ALERTS, 0), Some(3));

    producer
        .publish_metric(topics::ALERTS, "k", &serde_json::json!({ "n": 3 }))
        .await
        .unwrap();

    let second_run = Arc::new(Mutex::new(Vec::new()));
    let restarted = client(&broker, config).await;
    {
        let seen = second_run.clone();
        restarted
            .subscribe_to_metrics(topics::ALERTS, "replay-group", move |v: Value| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(v["n"].as_i64().unwrap_or(-1));
                    Ok::<(), Infallible>(())
                }
            })
            .await
            .unwrap();
    }

    assert!(eventually(Duration::from_secs(2), || !second_run.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*second_run.lock(), vec![3]);
    restarted.close().await.unwrap();
}
