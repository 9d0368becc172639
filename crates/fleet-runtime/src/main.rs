//! # fleetops Runtime
//!
//! Runs the monitor behind the topic bus and the metrics stream until
//! Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Initialize logging and metrics
//! 3. Pick transports
//! 4. Start the runtime (see [`fleet_runtime::FleetRuntime`])
//! 5. Wait for Ctrl+C, then shut down

use anyhow::{Context, Result};
use fleet_runtime::{FleetRuntime, RuntimeConfig};
use fleet_telemetry::init_telemetry;
use shared_bus::InMemoryBroker;
use shared_stream::{InMemoryLogBroker, LogBroker};
use std::sync::Arc;
use tracing::{info, warn};

fn log_broker(config: &RuntimeConfig) -> Result<Arc<dyn LogBroker>> {
    if config.uses_memory_stream() {
        return Ok(Arc::new(InMemoryLogBroker::new()));
    }

    #[cfg(feature = "kafka")]
    return Ok(Arc::new(shared_stream::KafkaLogBroker::new()));

    #[cfg(not(feature = "kafka"))]
    anyhow::bail!(
        "KAFKA_BROKER={} needs a build with the `kafka` feature",
        config.stream_brokers.join(",")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;
    let _telemetry = init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  fleetops runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    // Only the in-process bus transport is built in.
    let bus = InMemoryBroker::new();
    if !config.bus_url.starts_with("memory://") {
        warn!(url = %config.bus_url, "No network bus transport available, using in-process broker");
    }
    let stream = log_broker(&config)?;

    let runtime = FleetRuntime::start(config, &bus, stream).await?;

    info!("Runtime is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await;
    Ok(())
}
