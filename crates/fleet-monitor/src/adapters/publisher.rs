//! Alert publisher backed by the topic bus.

use crate::domain::MonitorError;
use crate::ports::AlertPublisher;
use async_trait::async_trait;
use fleet_telemetry::BUS_MESSAGES_PUBLISHED;
use shared_bus::BusClient;
use shared_types::topology::{exchanges, routing};
use shared_types::AlertEvent;
use std::sync::Arc;
use tracing::debug;

/// Publishes alert events as persistent JSON on a topic exchange.
pub struct BusAlertPublisher {
    bus: Arc<BusClient>,
    exchange: String,
    routing_key: String,
}

impl BusAlertPublisher {
    /// Publisher on the `alerts` exchange with routing key `alert.critical`.
    pub fn new(bus: Arc<BusClient>) -> Self {
        Self::with_route(bus, exchanges::ALERTS, routing::ALERT_CRITICAL)
    }

    pub fn with_route(
        bus: Arc<BusClient>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

#[async_trait]
impl AlertPublisher for BusAlertPublisher {
    async fn publish(&self, event: &AlertEvent) -> Result<(), MonitorError> {
        self.bus
            .publish(&self.exchange, &self.routing_key, event)
            .await
            .map_err(|e| MonitorError::Publish(e.to_string()))?;
        BUS_MESSAGES_PUBLISHED
            .with_label_values(&[self.exchange.as_str()])
            .inc();
        debug!(
            exchange = %self.exchange,
            routing_key = %self.routing_key,
            vm_id = %event.vm_id,
            "Alert event published"
        );
        Ok(())
    }
}
