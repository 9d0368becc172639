//! # Topology Declaration
//!
//! Which exchanges exist, which queues bind to them under which patterns and
//! which stream topics are provisioned. Declaring is idempotent, so every
//! service declares the whole plan at startup.
//!
//! ```text
//! services ──auth.*────────► auth.events
//!          ──infra.*───────► infrastructure.events ◄──infrastructure.*── events
//!          ──agents.*──────► agents.events
//!          ──monitor.*─────► monitor.events ◄──monitoring.*── monitoring
//! alerts   ──alert.#───────► alert.triggered
//! ```

use shared_bus::{BusClient, BusError, ExchangeKind};
use shared_stream::{StreamClient, StreamError};
use shared_types::topology::{exchanges, queues, routing, topics};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDecl {
    pub name: String,
    pub kind: ExchangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDecl {
    pub exchange: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDecl {
    pub name: String,
    pub bindings: Vec<BindingDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDecl {
    pub name: String,
    pub partitions: u32,
}

/// Everything declared at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopologyPlan {
    pub exchanges: Vec<ExchangeDecl>,
    pub queues: Vec<QueueDecl>,
    pub topics: Vec<TopicDecl>,
}

fn bind(exchange: &str, pattern: &str) -> BindingDecl {
    BindingDecl {
        exchange: exchange.to_string(),
        pattern: pattern.to_string(),
    }
}

fn queue(name: &str, bindings: Vec<BindingDecl>) -> QueueDecl {
    QueueDecl {
        name: name.to_string(),
        bindings,
    }
}

impl TopologyPlan {
    /// The inter-service topology. Alert events go to `alerts_exchange`.
    pub fn standard(alerts_exchange: &str) -> Self {
        let mut plan = Self::default();
        for name in exchanges::ALL {
            plan = plan.with_exchange(name, ExchangeKind::Topic);
        }
        if !exchanges::ALL.contains(&alerts_exchange) {
            plan = plan.with_exchange(alerts_exchange, ExchangeKind::Topic);
        }

        plan.queues = vec![
            queue(queues::AUTH_EVENTS, vec![bind(exchanges::SERVICES, routing::AUTH)]),
            queue(
                queues::INFRASTRUCTURE_EVENTS,
                vec![
                    bind(exchanges::SERVICES, routing::INFRA_COMMANDS),
                    bind(exchanges::EVENTS, routing::INFRASTRUCTURE),
                ],
            ),
            queue(queues::AGENTS_EVENTS, vec![bind(exchanges::SERVICES, routing::AGENTS)]),
            queue(
                queues::MONITOR_EVENTS,
                vec![
                    bind(exchanges::SERVICES, routing::MONITOR_COMMANDS),
                    bind(exchanges::MONITORING, routing::MONITORING),
                ],
            ),
            queue(queues::ALERT_TRIGGERED, vec![bind(alerts_exchange, routing::ALERTS)]),
        ];

        plan.topics = [
            topics::VM_METRICS,
            topics::VM_METRICS_PROCESSED,
            topics::ALERTS,
            topics::LOGS,
            topics::SYSTEM_HEALTH,
        ]
        .into_iter()
        .map(|name| TopicDecl {
            name: name.to_string(),
            partitions: topics::partitions_for(name),
        })
        .collect();
        plan
    }

    pub fn with_exchange(mut self, name: &str, kind: ExchangeKind) -> Self {
        self.exchanges.push(ExchangeDecl {
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn with_topic(mut self, name: &str, partitions: u32) -> Self {
        if !self.topics.iter().any(|t| t.name == name) {
            self.topics.push(TopicDecl {
                name: name.to_string(),
                partitions,
            });
        }
        self
    }

    /// Declare exchanges, then queues, then bindings.
    ///
    /// # Errors
    ///
    /// The first declaration error, typically
    /// [`BusError::DeclarationConflict`].
    pub async fn declare_bus(&self, bus: &BusClient) -> Result<(), BusError> {
        for exchange in &self.exchanges {
            bus.declare_exchange(&exchange.name, exchange.kind).await?;
        }
        for queue in &self.queues {
            bus.declare_queue(&queue.name).await?;
            for binding in &queue.bindings {
                bus.bind_queue(&queue.name, &binding.exchange, &binding.pattern)
                    .await?;
            }
        }
        info!(
            exchanges = self.exchanges.len(),
            queues = self.queues.len(),
            "Bus topology declared"
        );
        Ok(())
    }

    /// Create every stream topic that does not exist yet.
    pub async fn declare_stream(&self, stream: &StreamClient) -> Result<(), StreamError> {
        for topic in &self.topics {
            stream.create_topic(&topic.name, topic.partitions).await?;
        }
        info!(topics = self.topics.len(), "Stream topics ensured");
        Ok(())
    }
}
