//! # Bus Transport Ports
//!
//! The seam between [`crate::BusClient`] and a concrete broker connection.
//! A connector opens one connection with one channel; every topology,
//! publish and consume operation goes through that channel.

use crate::error::BusError;
use crate::message::{
    ConsumeOptions, Delivery, DeliveryTag, ExchangeKind, OutboundMessage, PublishStatus,
    QueueInfo, QueueOptions,
};
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Opens broker connections.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Open a connection and its channel.
    ///
    /// # Errors
    ///
    /// [`BusError::Connection`] when the broker is unreachable, the URL is
    /// invalid, or the credentials are refused.
    async fn connect(&self, url: &str) -> Result<Arc<dyn BusChannel>, BusError>;
}

/// A live consumer registration.
pub struct ConsumerStream {
    pub consumer_tag: String,
    /// Ends when the consumer is cancelled, its queue is deleted or the
    /// channel closes.
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
}

impl Stream for ConsumerStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        self.deliveries.poll_recv(cx)
    }
}

/// One channel on one connection.
///
/// Operations on a closed channel fail with [`BusError::NotConnected`].
#[async_trait]
pub trait BusChannel: Send + Sync {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BusError>;

    /// Declare a queue. An empty name asks the broker to generate one.
    async fn declare_queue(&self, name: &str, options: QueueOptions)
        -> Result<QueueInfo, BusError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str)
        -> Result<(), BusError>;

    async fn delete_queue(&self, name: &str) -> Result<(), BusError>;

    /// Limit unacknowledged deliveries for consumers created afterwards.
    async fn set_prefetch(&self, count: u16) -> Result<(), BusError>;

    /// Hand a message to the transport's write buffer.
    ///
    /// The message is always accepted when `Ok` is returned; `BufferFull`
    /// only signals that the caller should wait for [`BusChannel::drained`].
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<PublishStatus, BusError>;

    /// Resolves once the write buffer is below its high-water mark.
    async fn drained(&self) -> Result<(), BusError>;

    async fn consume(&self, queue: &str, options: ConsumeOptions)
        -> Result<ConsumerStream, BusError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BusError>;

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BusError>;

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BusError>;

    /// Close the channel, then its connection. Unacknowledged deliveries
    /// are returned to their queues.
    async fn close(&self) -> Result<(), BusError>;

    fn is_open(&self) -> bool;
}
