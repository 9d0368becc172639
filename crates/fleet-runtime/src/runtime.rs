//! # Fleet Runtime
//!
//! Owns the process-wide resources and starts them in order.
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration
//! 2. Connect the bus client, declare exchanges/queues/bindings
//! 3. Connect the stream client, ensure topics
//! 4. Build the monitor with a bus alert publisher
//! 5. Attach the monitor to the metrics topic
//! 6. Start the command router on the monitor queue
//!
//! ## Shutdown Sequence
//!
//! Router subscription, then stream consumers and producer, then the bus.

use crate::config::RuntimeConfig;
use crate::gateway::GatewayClient;
use crate::monitor_handler::{MonitorCommandHandler, MONITOR_PATTERNS};
use crate::router::CommandRouter;
use crate::topology::TopologyPlan;
use anyhow::{Context, Result};
use fleet_monitor::{attach_to_stream, BusAlertPublisher, MonitorService};
use shared_bus::{BusClient, BusConnector, SubscriptionHandle};
use shared_stream::{LogBroker, StreamClient, StreamClientConfig};
use shared_types::topology::{queues, topics};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Process-wide resources: one bus client, one stream client, the monitor.
pub struct FleetRuntime {
    config: RuntimeConfig,
    bus: Arc<BusClient>,
    stream: Arc<StreamClient>,
    monitor: Arc<MonitorService>,
    commands: Mutex<Option<SubscriptionHandle>>,
}

impl FleetRuntime {
    /// Connect both transports and start consuming.
    pub async fn start(
        config: RuntimeConfig,
        connector: &dyn BusConnector,
        log_broker: Arc<dyn LogBroker>,
    ) -> Result<Self> {
        config.validate().context("Invalid runtime configuration")?;

        let bus = Arc::new(
            BusClient::connect(connector, &config.bus_url)
                .await
                .context("Failed to connect to message bus")?
                .with_rpc_timeout(config.rpc_timeout),
        );

        let plan = TopologyPlan::standard(&config.alerts_exchange)
            .with_topic(&config.metrics_topic, topics::VM_METRICS_PARTITIONS);
        plan.declare_bus(&bus)
            .await
            .context("Failed to declare bus topology")?;

        let stream = Arc::new(
            StreamClient::connect(log_broker, &config.stream_brokers, StreamClientConfig::default())
                .await
                .context("Failed to connect to stream brokers")?,
        );
        plan.declare_stream(&stream)
            .await
            .context("Failed to create stream topics")?;

        let publisher = Arc::new(BusAlertPublisher::with_route(
            bus.clone(),
            config.alerts_exchange.clone(),
            config.alerts_routing_key.clone(),
        ));
        let monitor = Arc::new(
            MonitorService::new(config.monitor_config(), publisher)
                .context("Failed to build monitor")?,
        );

        attach_to_stream(
            monitor.clone(),
            &stream,
            &config.metrics_topic,
            &config.consumer_group,
        )
        .await
        .context("Failed to subscribe to metrics topic")?;

        let handler = Arc::new(MonitorCommandHandler::new(
            monitor.clone(),
            stream.clone(),
            config.metrics_topic.clone(),
        ));
        let commands = CommandRouter::new(bus.clone())
            .register(MONITOR_PATTERNS, handler)
            .start(queues::MONITOR_EVENTS)
            .await
            .context("Failed to start command router")?;

        info!(
            metrics_topic = %config.metrics_topic,
            consumer_group = %config.consumer_group,
            queue = queues::MONITOR_EVENTS,
            "Fleet runtime started"
        );

        Ok(Self {
            config,
            bus,
            stream,
            monitor,
            commands: Mutex::new(Some(commands)),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bus(&self) -> Arc<BusClient> {
        self.bus.clone()
    }

    pub fn stream(&self) -> Arc<StreamClient> {
        self.stream.clone()
    }

    pub fn monitor(&self) -> Arc<MonitorService> {
        self.monitor.clone()
    }

    /// Gateway client sharing this runtime's bus connection.
    pub fn gateway(&self) -> GatewayClient {
        GatewayClient::new(self.bus.clone())
    }

    /// Stop consuming and release both transports. Safe to call twice.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Some(commands) = self.commands.lock().await.take() {
            if let Err(e) = commands.cancel().await {
                warn!(error = %e, "Failed to cancel command subscription");
            }
        }
        if let Err(e) = self.stream.close().await {
            warn!(error = %e, "Failed to close stream client");
        }
        if let Err(e) = self.bus.close().await {
            warn!(error = %e, "Failed to close bus client");
        }

        info!("Shutdown complete");
    }
}
