//! Monitor commands answered over the bus.

use crate::router::{CommandError, CommandHandler};
use async_trait::async_trait;
use chrono::Utc;
use fleet_monitor::{AlertFilter, MonitorService, VmMetricsQuery};
use fleet_telemetry::{gather_text, STREAM_RECORDS_PUBLISHED};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_stream::StreamClient;
use shared_types::topology::patterns::monitor;
use shared_types::MetricSample;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Every pattern [`MonitorCommandHandler`] answers.
pub const MONITOR_PATTERNS: [&str; 9] = [
    monitor::GET_HEALTH,
    monitor::GET_VM_METRICS,
    monitor::RECORD_METRIC,
    monitor::GET_DASHBOARD,
    monitor::GET_ALERTS,
    monitor::GET_AGGREGATION,
    monitor::GET_MACHINES,
    monitor::GET_HEALTH_REPORT,
    monitor::GET_PROMETHEUS,
];

#[derive(Debug, Deserialize)]
struct MachineQuery {
    #[serde(alias = "vmId")]
    vm_id: String,
}

#[derive(Debug, Deserialize)]
struct AggregationQuery {
    #[serde(alias = "vmId")]
    vm_id: String,
    /// Trailing window; the configured one when absent.
    #[serde(default, alias = "timeRange")]
    window_ms: Option<u64>,
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, CommandError> {
    serde_json::from_value(payload).map_err(|e| CommandError::InvalidPayload(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Failed(e.to_string()))
}

/// Answers monitor queries from the service's buffers and publishes
/// recorded samples to the metrics stream.
pub struct MonitorCommandHandler {
    service: Arc<MonitorService>,
    stream: Arc<StreamClient>,
    metrics_topic: String,
}

impl MonitorCommandHandler {
    pub fn new(
        service: Arc<MonitorService>,
        stream: Arc<StreamClient>,
        metrics_topic: impl Into<String>,
    ) -> Self {
        Self {
            service,
            stream,
            metrics_topic: metrics_topic.into(),
        }
    }

    /// Validate the sample and publish it keyed by machine; ingestion
    /// happens when the stream consumer picks it up.
    async fn record_metric(&self, payload: Value) -> Result<Value, CommandError> {
        let sample: MetricSample = decode(payload)?;
        sample
            .validate()
            .map_err(|e| CommandError::InvalidPayload(e.to_string()))?;

        let metadata = self
            .stream
            .publish_metric(&self.metrics_topic, &sample.vm_id, &sample)
            .await
            .map_err(|e| CommandError::Failed(e.to_string()))?;
        STREAM_RECORDS_PUBLISHED
            .with_label_values(&[self.metrics_topic.as_str()])
            .inc();
        info!(
            vm_id = %sample.vm_id,
            topic = %self.metrics_topic,
            partition = metadata.partition,
            offset = metadata.offset,
            "Metric published"
        );

        Ok(json!({
            "message": "Metric published successfully",
            "vm_id": sample.vm_id,
            "partition": metadata.partition,
            "offset": metadata.offset,
            "timestamp": Utc::now(),
        }))
    }
}

#[async_trait]
impl CommandHandler for MonitorCommandHandler {
    async fn handle(&self, pattern: &str, payload: Value) -> Result<Value, CommandError> {
        match pattern {
            monitor::GET_HEALTH => encode(&self.service.health()),
            monitor::GET_VM_METRICS => {
                let query: VmMetricsQuery = decode(payload)?;
                let page = self.service.vm_metrics(&query);
                if page.total == 0 {
                    return Err(CommandError::NotFound(format!(
                        "No metrics found for VM {}",
                        query.vm_id
                    )));
                }
                encode(&page)
            }
            monitor::RECORD_METRIC => self.record_metric(payload).await,
            monitor::GET_DASHBOARD => {
                let query: MachineQuery = decode(payload)?;
                match self.service.dashboard(&query.vm_id) {
                    Some(dashboard) => encode(&dashboard),
                    None => Err(CommandError::NotFound(format!(
                        "No metrics found for VM {}",
                        query.vm_id
                    ))),
                }
            }
            monitor::GET_ALERTS => {
                let filter: AlertFilter = if payload.is_null() {
                    AlertFilter::default()
                } else {
                    decode(payload)?
                };
                encode(&self.service.current_alerts(&filter))
            }
            monitor::GET_AGGREGATION => {
                let query: AggregationQuery = decode(payload)?;
                let window = query.window_ms.map(Duration::from_millis);
                // Null data is the no-data answer for an empty window.
                match self.service.aggregate(&query.vm_id, window) {
                    Some(report) => encode(&report),
                    None => Ok(Value::Null),
                }
            }
            monitor::GET_MACHINES => encode(&self.service.machines()),
            monitor::GET_HEALTH_REPORT => encode(&self.service.health_report()),
            monitor::GET_PROMETHEUS => {
                let machines = self
                    .service
                    .prometheus_text()
                    .map_err(|e| CommandError::Failed(e.to_string()))?;
                let process = gather_text().map_err(|e| CommandError::Failed(e.to_string()))?;
                Ok(json!({ "machines": machines, "process": process }))
            }
            other => Err(CommandError::UnknownPattern(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_monitor::{AlertPublisher, MonitorConfig, MonitorError};
    use shared_stream::{InMemoryLogBroker, StreamClientConfig};
    use shared_types::metrics::fixtures::sample;
    use shared_types::AlertEvent;

    struct Discard;

    #[async_trait]
    impl AlertPublisher for Discard {
        async fn publish(&self, _event: &AlertEvent) -> Result<(), MonitorError> {
            Ok(())
        }
    }

    async fn handler() -> (Arc<InMemoryLogBroker>, Arc<MonitorService>, MonitorCommandHandler) {
        let broker = Arc::new(InMemoryLogBroker::new());
        let stream = Arc::new(
            StreamClient::connect(
                broker.clone(),
                &["memory".to_string()],
                StreamClientConfig::default(),
            )
            .await
            .unwrap(),
        );
        stream.create_topic("vm-metrics", 6).await.unwrap();
        let service =
            Arc::new(MonitorService::new(MonitorConfig::default(), Arc::new(Discard)).unwrap());
        let handler = MonitorCommandHandler::new(service.clone(), stream, "vm-metrics");
        (broker, service, handler)
    }

    #[tokio::test]
    async fn test_record_metric_publishes_keyed_record() {
        let (broker, _service, handler) = handler().await;
        let payload = serde_json::to_value(sample("vm-7")).unwrap();

        let data = handler.handle(monitor::RECORD_METRIC, payload).await.unwrap();
        assert_eq!(data["vm_id"], "vm-7");
        let partition = data["partition"].as_i64().unwrap() as i32;
        assert_eq!(broker.records("vm-metrics", partition).len(), 1);
    }

    #[tokio::test]
    async fn test_record_metric_rejects_invalid_sample() {
        let (_broker, _service, handler) = handler().await;
        let mut bad = sample("vm-7");
        bad.cpu.usage_percent = -3.0;

        let err = handler
            .handle(monitor::RECORD_METRIC, serde_json::to_value(bad).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidPayload(_)));

        let err = handler
            .handle(monitor::RECORD_METRIC, json!({ "vm_id": "vm-7" }))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_queries_over_buffer() {
        let (_broker, service, handler) = handler().await;
        let mut hot = sample("vm-1");
        hot.cpu.usage_percent = 93.0;
        service.ingest(hot).await.unwrap();

        let metrics = handler
            .handle(monitor::GET_VM_METRICS, json!({ "vmId": "vm-1", "limit": 10 }))
            .await
            .unwrap();
        assert_eq!(metrics["total"], 1);

        let dashboard = handler
            .handle(monitor::GET_DASHBOARD, json!({ "vm_id": "vm-1" }))
            .await
            .unwrap();
        assert_eq!(dashboard["status"], "critical");

        let alerts = handler
            .handle(monitor::GET_ALERTS, json!({ "severity": "critical" }))
            .await
            .unwrap();
        assert_eq!(alerts["total_alerts"], 1);

        let aggregation = handler
            .handle(monitor::GET_AGGREGATION, json!({ "vm_id": "vm-1" }))
            .await
            .unwrap();
        assert_eq!(aggregation["data_points"], 1);

        let machines = handler.handle(monitor::GET_MACHINES, Value::Null).await.unwrap();
        assert_eq!(machines["total_vms"], 1);

        let exposition = handler.handle(monitor::GET_PROMETHEUS, Value::Null).await.unwrap();
        assert!(exposition["machines"]
            .as_str()
            .unwrap()
            .contains("vm_cpu_usage_percent{vm_id=\"vm-1\"} 93"));
    }

    #[tokio::test]
    async fn test_unknown_machine() {
        let (_broker, _service, handler) = handler().await;

        let err = handler
            .handle(monitor::GET_DASHBOARD, json!({ "vm_id": "ghost" }))
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::NotFound("No metrics found for VM ghost".to_string()));

        assert!(handler
            .handle(monitor::GET_VM_METRICS, json!({ "vm_id": "ghost" }))
            .await
            .is_err());

        let aggregation = handler
            .handle(monitor::GET_AGGREGATION, json!({ "vm_id": "ghost", "timeRange": 1000 }))
            .await
            .unwrap();
        assert!(aggregation.is_null());

        let err = handler.handle(monitor::GET_DASHBOARD, json!({})).await.unwrap_err();
        assert!(matches!(err, CommandError::InvalidPayload(_)));
    }
}
