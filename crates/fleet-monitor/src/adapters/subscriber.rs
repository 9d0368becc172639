//! Feeds the monitor from the metrics stream.

use crate::domain::MonitorError;
use crate::service::MonitorService;
use fleet_telemetry::{STREAM_RECORDS_CONSUMED, STREAM_RECORDS_FAILED};
use shared_stream::{StreamClient, StreamError};
use shared_types::MetricSample;
use std::sync::Arc;
use tracing::info;

/// Start a consumer in `group_id` that ingests every sample on `topic`.
///
/// Rejected samples and failed alert publishes are counted and logged by
/// the consume loop; they never stop consumption.
pub async fn attach_to_stream(
    service: Arc<MonitorService>,
    stream: &StreamClient,
    topic: &str,
    group_id: &str,
) -> Result<(), StreamError> {
    let label = topic.to_string();
    stream
        .subscribe_to_metrics(topic, group_id, move |sample: MetricSample| {
            let service = service.clone();
            let topic = label.clone();
            async move {
                let result = service.ingest(sample).await;
                match &result {
                    Ok(_) => STREAM_RECORDS_CONSUMED.with_label_values(&[&topic]).inc(),
                    Err(e) => STREAM_RECORDS_FAILED
                        .with_label_values(&[&topic, failure_reason(e)])
                        .inc(),
                }
                result.map(|_| ())
            }
        })
        .await?;
    info!(topic, group_id, "Monitor attached to metrics stream");
    Ok(())
}

fn failure_reason(error: &MonitorError) -> &'static str {
    match error {
        MonitorError::InvalidSample(_) => "invalid",
        MonitorError::Publish(_) => "publish",
        _ => "other",
    }
}
