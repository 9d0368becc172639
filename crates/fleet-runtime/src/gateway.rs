//! # Gateway RPC Client
//!
//! Calls a service command over the bus and always comes back with a
//! [`ServiceResponse`]: transport failures and timeouts become failure
//! responses so callers handle one shape.

use fleet_telemetry::{HistogramTimer, RPC_CALLS, RPC_DURATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_bus::{BusClient, BusError};
use shared_types::topology::exchanges;
use shared_types::ServiceResponse;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Request/reply client used by the gateway in front of the services.
#[derive(Clone)]
pub struct GatewayClient {
    bus: Arc<BusClient>,
    exchange: String,
    timeout: Option<Duration>,
}

impl GatewayClient {
    /// Client on the `services` exchange using the bus client's RPC timeout.
    pub fn new(bus: Arc<BusClient>) -> Self {
        Self {
            bus,
            exchange: exchanges::SERVICES.to_string(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send `request` to the service answering `pattern`.
    pub async fn send<Req, T>(&self, pattern: &str, request: &Req) -> ServiceResponse<T>
    where
        Req: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let _timer = HistogramTimer::new(&RPC_DURATION);
        let result: Result<ServiceResponse<T>, BusError> = self
            .bus
            .rpc(&self.exchange, pattern, request, self.timeout)
            .await;

        let (outcome, response) = match result {
            Ok(response) if response.success => ("success", response),
            Ok(response) => ("failure", response),
            Err(BusError::Timeout { timeout, .. }) => (
                "timeout",
                ServiceResponse::failure(format!(
                    "Service did not respond to {pattern} within {}ms",
                    timeout.as_millis()
                )),
            ),
            Err(e) => {
                warn!(pattern, error = %e, "Gateway call failed");
                ("error", ServiceResponse::failure(e.to_string()))
            }
        };
        RPC_CALLS.with_label_values(&[pattern, outcome]).inc();
        response
    }
}
