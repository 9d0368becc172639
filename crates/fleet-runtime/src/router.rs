//! # Command Router
//!
//! Responder side of request/reply. One subscription per service queue;
//! every delivery is dispatched by its routing key to the handler registered
//! for that pattern.
//!
//! ```text
//! delivery(routing_key, reply_to, correlation_id)
//!    │
//!    ├─ handler for routing_key? ── no ──► failure response
//!    │        │
//!    │        └─ handle(payload) ──► Ok(data) / Err(e) ──► ServiceResponse
//!    │
//!    ├─ reply_to set? ──► publish response to reply_to with correlation_id
//!    │
//!    └─ ack (reply failed: nack + requeue)
//! ```
//!
//! Handler errors never cross the bus as errors; the caller always receives
//! a `ServiceResponse`.

use async_trait::async_trait;
use fleet_telemetry::BUS_DELIVERIES;
use serde_json::Value;
use shared_bus::{Acknowledger, BusClient, BusError, SubscriptionHandle};
use shared_types::ServiceResponse;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of one command, returned to the caller as a failure response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    NotFound(String),

    #[error("No handler registered for {0}")]
    UnknownPattern(String),

    #[error("{0}")]
    Failed(String),
}

/// Application logic behind one or more command patterns.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Answer `pattern` with `payload`. The returned value becomes the
    /// response `data`.
    async fn handle(&self, pattern: &str, payload: Value) -> Result<Value, CommandError>;
}

/// Dispatches deliveries on one queue to registered handlers.
pub struct CommandRouter {
    bus: Arc<BusClient>,
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new(bus: Arc<BusClient>) -> Self {
        Self {
            bus,
            handlers: HashMap::new(),
        }
    }

    /// Route every pattern in `patterns` to `handler`. A later registration
    /// for the same pattern replaces the earlier one.
    #[must_use]
    pub fn register<'a>(
        mut self,
        patterns: impl IntoIterator<Item = &'a str>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        for pattern in patterns {
            self.handlers.insert(pattern.to_string(), handler.clone());
        }
        self
    }

    pub fn patterns(&self) -> Vec<&str> {
        let mut patterns: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        patterns.sort_unstable();
        patterns
    }

    /// Answer one command without going through the bus.
    pub async fn dispatch(&self, pattern: &str, payload: Value) -> ServiceResponse<Value> {
        let result = match self.handlers.get(pattern) {
            Some(handler) => handler.handle(pattern, payload).await,
            None => Err(CommandError::UnknownPattern(pattern.to_string())),
        };
        match result {
            Ok(data) => ServiceResponse::ok(data),
            Err(e) => {
                warn!(pattern, error = %e, "Command failed");
                ServiceResponse::failure(e.to_string())
            }
        }
    }

    /// Consume `queue` until the returned handle is cancelled.
    pub async fn start(self, queue: &str) -> Result<SubscriptionHandle, BusError> {
        let router = Arc::new(self);
        let bus = router.bus.clone();
        bus.subscribe(queue, move |payload: Value, ack: Acknowledger| {
            let router = router.clone();
            async move { router.on_delivery(payload, ack).await }
        })
        .await
    }

    async fn on_delivery(&self, payload: Value, ack: Acknowledger) -> Result<(), BusError> {
        let info = ack.info().clone();
        let response = self.dispatch(&info.routing_key, payload).await;

        match (&info.reply_to, &info.correlation_id) {
            (Some(reply_to), Some(correlation_id)) => {
                if let Err(e) = self.bus.reply(reply_to, correlation_id, &response).await {
                    BUS_DELIVERIES
                        .with_label_values(&[info.queue.as_str(), "nack"])
                        .inc();
                    ack.nack().await?;
                    return Err(e);
                }
                debug!(
                    routing_key = %info.routing_key,
                    correlation_id = %correlation_id,
                    success = response.success,
                    "Reply sent"
                );
            }
            (Some(_), None) => {
                warn!(routing_key = %info.routing_key, "Request without correlation id, reply dropped")
            }
            _ => debug!(routing_key = %info.routing_key, success = response.success, "Event handled"),
        }

        ack.ack().await?;
        BUS_DELIVERIES
            .with_label_values(&[info.queue.as_str(), "ack"])
            .inc();
        Ok(())
    }
}
