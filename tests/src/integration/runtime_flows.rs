//! # End-to-End Runtime Flows
//!
//! ```text
//! GatewayClient ──monitor.record_metric──► CommandRouter ──► vm-metrics stream
//!                                                                  │
//!                                        MonitorService ◄──consume─┘
//!                                              │
//!                           alerts exchange ◄──┘ (alert.critical)
//!                                  │
//!                           alert.triggered queue
//! ```

use super::eventually;
use chrono::Utc;
use fleet_runtime::{FleetRuntime, GatewayClient, RuntimeConfig};
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_bus::{Acknowledger, BusClient, InMemoryBroker};
use shared_stream::InMemoryLogBroker;
use shared_types::metrics::fixtures::sample;
use shared_types::topology::patterns::monitor;
use shared_types::topology::queues;
use shared_types::{AlertEvent, AlertKind, MachineStatus, MetricSample, ServiceResponse, Severity};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    broker: InMemoryBroker,
    runtime: FleetRuntime,
    gateway: GatewayClient,
}

/// A running runtime plus a gateway on its own bus connection.
async fn harness() -> Harness {
    let broker = InMemoryBroker::new();
    let runtime = FleetRuntime::start(
        RuntimeConfig::default(),
        &broker,
        Arc::new(InMemoryLogBroker::new()),
    )
    .await
    .unwrap();
    let gateway_bus = Arc::new(
        BusClient::connect(&broker, "memory://localhost")
            .await
            .unwrap(),
    );
    Harness {
        broker,
        runtime,
        gateway: GatewayClient::new(gateway_bus).with_timeout(Duration::from_secs(2)),
    }
}

async fn record(gateway: &GatewayClient, reading: &MetricSample) -> ServiceResponse<Value> {
    gateway.send(monitor::RECORD_METRIC, reading).await
}

#[tokio::test]
async fn test_recorded_metric_reaches_dashboard_and_alert_queue() {
    let h = harness().await;
    let mut hot = sample("vm-42");
    hot.cpu.usage_percent = 95.0;

    let recorded = record(&h.gateway, &hot).await;
    assert!(recorded.success, "record failed: {:?}", recorded.error);
    assert_eq!(recorded.data.unwrap()["vm_id"], "vm-42");

    let monitor_service = h.runtime.monitor();
    assert!(
        eventually(Duration::from_secs(2), || monitor_service.machines().total_vms == 1).await
    );
    assert!(
        eventually(Duration::from_secs(2), || h
            .broker
            .queue_depth(queues::ALERT_TRIGGERED)
            == Some(1))
        .await
    );

    let dashboard: ServiceResponse<Value> = h
        .gateway
        .send(monitor::GET_DASHBOARD, &json!({ "vmId": "vm-42" }))
        .await;
    let dashboard = dashboard.data.unwrap();
    assert_eq!(dashboard["status"], "critical");
    assert_eq!(dashboard["alerts"][0]["type"], "cpu");

    let alerts: ServiceResponse<Value> = h
        .gateway
        .send(monitor::GET_ALERTS, &json!({ "severity": "critical" }))
        .await;
    assert_eq!(alerts.data.unwrap()["total_alerts"], 1);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn test_offline_machine_raises_critical_event() {
    let h = harness().await;

    let received = Arc::new(Mutex::new(Vec::<AlertEvent>::new()));
    let watcher = {
        let received = received.clone();
        h.runtime
            .bus()
            .subscribe(queues::ALERT_TRIGGERED, move |event: AlertEvent, ack: Acknowledger| {
                let received = received.clone();
                async move {
                    received.lock().push(event);
                    ack.ack().await
                }
            })
            .await
            .unwrap()
    };

    let mut down = sample("vm-down");
    down.status = Some(MachineStatus::Offline);
    let recorded = record(&h.gateway, &down).await;
    assert!(recorded.success);

    assert!(eventually(Duration::from_secs(2), || received.lock().len() == 1).await);
    let event = received.lock()[0].clone();
    assert_eq!(event.vm_id, "vm-down");
    assert_eq!(event.severity, Severity::Critical);
    assert!(event.alerts.iter().any(|a| a.kind == AlertKind::Offline));

    watcher.cancel().await.unwrap();
    h.runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_sample_rejected_before_stream() {
    let h = harness().await;
    let mut broken = sample("vm-1");
    broken.cpu.usage_percent = 180.0;

    let response = record(&h.gateway, &broken).await;
    assert!(!response.success);
    assert!(response.error.is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.runtime.monitor().machines().total_vms, 0);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn test_queries_without_data() {
    let h = harness().await;

    let aggregation: ServiceResponse<Value> = h
        .gateway
        .send(
            monitor::GET_AGGREGATION,
            &json!({ "vmId": "nobody", "timeRange": 60_000 }),
        )
        .await;
    assert!(aggregation.success);
    assert!(aggregation.data.is_none());

    let dashboard: ServiceResponse<Value> = h
        .gateway
        .send(monitor::GET_DASHBOARD, &json!({ "vm_id": "nobody" }))
        .await;
    assert_eq!(
        dashboard.error.as_deref(),
        Some("No metrics found for VM nobody")
    );

    let unhandled: ServiceResponse<Value> = h
        .gateway
        .send(monitor::GET_RESOURCE_GROUP_STATS, &json!({ "resource_group_id": 1 }))
        .await;
    assert!(!unhandled.success);
    assert_eq!(
        unhandled.error.as_deref(),
        Some("No handler registered for monitor.get_rg_stats")
    );

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn test_gateway_times_out_after_shutdown() {
    let h = harness().await;
    h.runtime.shutdown().await;

    let response: ServiceResponse<Value> = h
        .gateway
        .clone()
        .with_timeout(Duration::from_millis(50))
        .send(monitor::GET_HEALTH, &json!({ "at": Utc::now() }))
        .await;
    assert!(!response.success);
    assert_eq!(
        response.error.as_deref(),
        Some("Service did not respond to monitor.get_health within 50ms")
    );
}
