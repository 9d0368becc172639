//! # Bus Client
//!
//! The single bus resource a service owns: one connection, one channel.
//! Construct it once at startup with [`BusClient::connect`] and pass it to
//! whatever needs to publish, subscribe or call other services.
//!
//! ## Request/Reply
//!
//! ```text
//! rpc()                          broker                     responder
//!   │ declare reply queue (exclusive, auto-delete)
//!   │ register correlation id
//!   │ consume reply queue ───────────┐
//!   │ publish(reply_to, corr_id) ──► exchange ──► queue ──► handler
//!   │                                │                         │
//!   │ ◄── pump: complete(corr_id) ◄──┴──── reply(reply_to) ◄───┘
//!   │ cancel consumer, delete queue, drop table entry
//! ```

use crate::error::BusError;
use crate::message::{
    ConsumeOptions, ExchangeKind, MessageProperties, OutboundMessage, PublishOptions,
    PublishStatus, QueueInfo, QueueOptions,
};
use crate::pending::{CorrelationId, PendingReplies};
use crate::subscriber::{spawn_subscription, Acknowledger, SubscriptionHandle};
use crate::transport::{BusChannel, BusConnector, ConsumerStream};
use crate::{DEFAULT_PREFETCH, DEFAULT_RPC_TIMEOUT};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Topic bus client owning one channel.
pub struct BusClient {
    channel: RwLock<Option<Arc<dyn BusChannel>>>,
    pending: Arc<PendingReplies>,
    rpc_timeout: Duration,
}

impl BusClient {
    /// Open a connection and its channel.
    ///
    /// # Errors
    ///
    /// [`BusError::Connection`] on an invalid URL, an unreachable broker or
    /// refused credentials. No retry is attempted.
    pub async fn connect(connector: &dyn BusConnector, url: &str) -> Result<Self, BusError> {
        let channel = connector.connect(url).await.map_err(|e| {
            warn!(error = %e, "Failed to connect to message bus");
            e
        })?;
        info!("Connected to message bus");
        Ok(Self {
            channel: RwLock::new(Some(channel)),
            pending: Arc::new(PendingReplies::new()),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    /// Default timeout for [`BusClient::rpc`] calls.
    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.channel.read().as_ref().is_some_and(|c| c.is_open())
    }

    /// Number of RPC calls still waiting for a reply.
    pub fn pending_rpcs(&self) -> usize {
        self.pending.pending_count()
    }

    fn channel(&self) -> Result<Arc<dyn BusChannel>, BusError> {
        match self.channel.read().as_ref() {
            Some(channel) if channel.is_open() => Ok(channel.clone()),
            _ => Err(BusError::NotConnected),
        }
    }

    /// Declare a durable exchange.
    pub async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BusError> {
        self.declare_exchange_with(name, kind, true).await
    }

    pub async fn declare_exchange_with(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BusError> {
        self.channel()?.declare_exchange(name, kind, durable).await?;
        debug!(exchange = name, kind = %kind, durable, "Exchange declared");
        Ok(())
    }

    /// Declare a durable queue.
    pub async fn declare_queue(&self, name: &str) -> Result<QueueInfo, BusError> {
        self.declare_queue_with(name, QueueOptions::default()).await
    }

    pub async fn declare_queue_with(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BusError> {
        let info = self.channel()?.declare_queue(name, options).await?;
        debug!(
            queue = %info.name,
            messages = info.message_count,
            consumers = info.consumer_count,
            "Queue declared"
        );
        Ok(info)
    }

    pub async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<(), BusError> {
        self.channel()?.bind_queue(queue, exchange, pattern).await?;
        debug!(queue, exchange, pattern, "Queue bound");
        Ok(())
    }

    pub async fn delete_queue(&self, name: &str) -> Result<(), BusError> {
        self.channel()?.delete_queue(name).await
    }

    /// Publish a persistent JSON message.
    ///
    /// Returns once the transport has accepted the message. Under write
    /// pressure this waits for the drain signal.
    pub async fn publish<T: Serialize + Sync + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
    ) -> Result<(), BusError> {
        self.publish_with(exchange, routing_key, message, PublishOptions::default())
            .await
    }

    pub async fn publish_with<T: Serialize + Sync + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
        options: PublishOptions,
    ) -> Result<(), BusError> {
        let body =
            serde_json::to_vec(message).map_err(|e| BusError::Serialization(e.to_string()))?;
        let channel = self.channel()?;
        let outbound = OutboundMessage {
            properties: MessageProperties {
                content_type: Some(JSON_CONTENT_TYPE.to_string()),
                correlation_id: options.correlation_id,
                reply_to: options.reply_to,
                timestamp: Some(now_millis()),
                persistent: options.persistent,
            },
            body,
        };

        match channel.publish(exchange, routing_key, outbound)? {
            PublishStatus::Accepted => {}
            PublishStatus::BufferFull => {
                debug!(exchange, routing_key, "Write buffer full, waiting for drain");
                channel.drained().await?;
            }
        }
        debug!(exchange, routing_key, "Message published");
        Ok(())
    }

    /// Consume `queue` one message at a time.
    ///
    /// `handler` receives the decoded payload and an [`Acknowledger`] and
    /// must settle the delivery. See [`crate::subscriber`] for what happens
    /// when it does not.
    pub async fn subscribe<T, F, Fut, E>(
        &self,
        queue: &str,
        handler: F,
    ) -> Result<SubscriptionHandle, BusError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, Acknowledger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let channel = self.channel()?;
        channel.set_prefetch(DEFAULT_PREFETCH).await?;
        let stream = channel.consume(queue, ConsumeOptions::default()).await?;
        info!(queue, consumer_tag = %stream.consumer_tag, "Subscribed to queue");
        Ok(spawn_subscription(channel, queue.to_string(), stream, handler))
    }

    /// Call a responder and wait for its reply.
    ///
    /// `timeout` falls back to the client's configured RPC timeout. The
    /// private reply queue and the correlation entry are removed on every
    /// exit path.
    ///
    /// # Errors
    ///
    /// [`BusError::Timeout`] when no reply arrives in time,
    /// [`BusError::Deserialization`] when the reply does not decode as `R`.
    pub async fn rpc<Req, R>(
        &self,
        exchange: &str,
        routing_key: &str,
        request: &Req,
        timeout: Option<Duration>,
    ) -> Result<R, BusError>
    where
        Req: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let timeout = timeout.unwrap_or(self.rpc_timeout);
        let channel = self.channel()?;

        let reply_queue = channel
            .declare_queue("", QueueOptions::reply_queue())
            .await?
            .name;
        let (correlation_id, reply_rx) = self.pending.register(routing_key);

        let stream = match channel
            .consume(
                &reply_queue,
                ConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                },
            )
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.pending.cancel(&correlation_id);
                channel.delete_queue(&reply_queue).await.ok();
                return Err(e);
            }
        };
        let consumer_tag = stream.consumer_tag.clone();
        let pump = tokio::spawn(pump_replies(stream, self.pending.clone()));

        let outcome = async {
            let options = PublishOptions {
                persistent: false,
                correlation_id: Some(correlation_id.to_string()),
                reply_to: Some(reply_queue.clone()),
            };
            self.publish_with(exchange, routing_key, request, options)
                .await?;

            match tokio::time::timeout(timeout, reply_rx).await {
                Ok(Ok(body)) => serde_json::from_slice::<R>(&body)
                    .map_err(|e| BusError::Deserialization(e.to_string())),
                Ok(Err(_)) => Err(BusError::NotConnected),
                Err(_) => Err(BusError::Timeout {
                    routing_key: routing_key.to_string(),
                    timeout,
                }),
            }
        }
        .await;

        self.pending.cancel(&correlation_id);
        pump.abort();
        if let Err(e) = channel.cancel(&consumer_tag).await {
            debug!(queue = %reply_queue, error = %e, "Reply consumer cancel failed");
        }
        if let Err(e) = channel.delete_queue(&reply_queue).await {
            debug!(queue = %reply_queue, error = %e, "Reply queue delete failed");
        }

        match &outcome {
            Ok(_) => debug!(exchange, routing_key, correlation_id = %correlation_id, "RPC completed"),
            Err(e) => warn!(exchange, routing_key, correlation_id = %correlation_id, error = %e, "RPC failed"),
        }
        outcome
    }

    /// Answer an RPC request: publish straight to its reply queue with the
    /// caller's correlation ID.
    pub async fn reply<T: Serialize + Sync + ?Sized>(
        &self,
        reply_to: &str,
        correlation_id: &str,
        response: &T,
    ) -> Result<(), BusError> {
        let options = PublishOptions {
            persistent: false,
            correlation_id: Some(correlation_id.to_string()),
            reply_to: None,
        };
        self.publish_with("", reply_to, response, options).await
    }

    /// Close the channel, then the connection. Safe to call repeatedly and
    /// after a broker-side teardown.
    pub async fn close(&self) -> Result<(), BusError> {
        let channel = self.channel.write().take();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!(error = %e, "Error while closing bus channel");
            }
            info!("Bus connection closed");
        }
        Ok(())
    }
}

async fn pump_replies(mut stream: ConsumerStream, pending: Arc<PendingReplies>) {
    while let Some(delivery) = stream.next().await {
        match delivery
            .properties
            .correlation_id
            .as_deref()
            .map(CorrelationId::parse)
        {
            Some(Ok(id)) => {
                pending.complete(id, delivery.body);
            }
            _ => debug!(
                routing_key = %delivery.routing_key,
                "Ignoring reply without a valid correlation id"
            ),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
