//! # Subscription Loop
//!
//! Runs one consumer per subscription in its own task. Each delivery is
//! decoded and handed to the application handler together with an
//! [`Acknowledger`]; the handler decides the outcome.
//!
//! ## Settlement Rules
//!
//! | Outcome | Action |
//! |---------|--------|
//! | handler calls `ack()` | message removed from the queue |
//! | handler calls `nack()` | message requeued, redelivered later |
//! | payload fails to decode | nack with requeue |
//! | handler returns `Err` or panics | nack with requeue |
//! | handler returns `Ok` without settling | nack with requeue |
//!
//! Nothing is discarded, so a poison message is redelivered indefinitely.

use crate::error::BusError;
use crate::message::{Delivery, DeliveryTag};
use crate::transport::{BusChannel, ConsumerStream};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Routing metadata of the delivery being handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl DeliveryInfo {
    fn new(queue: &str, delivery: &Delivery) -> Self {
        Self {
            queue: queue.to_string(),
            exchange: delivery.exchange.clone(),
            routing_key: delivery.routing_key.clone(),
            redelivered: delivery.redelivered,
            correlation_id: delivery.properties.correlation_id.clone(),
            reply_to: delivery.properties.reply_to.clone(),
        }
    }
}

struct AckState {
    channel: Arc<dyn BusChannel>,
    tag: DeliveryTag,
    info: DeliveryInfo,
    settled: AtomicBool,
}

/// Settles one delivery. Only the first `ack`/`nack` takes effect.
#[derive(Clone)]
pub struct Acknowledger {
    state: Arc<AckState>,
}

impl Acknowledger {
    fn new(channel: Arc<dyn BusChannel>, tag: DeliveryTag, info: DeliveryInfo) -> Self {
        Self {
            state: Arc::new(AckState {
                channel,
                tag,
                info,
                settled: AtomicBool::new(false),
            }),
        }
    }

    /// Mark the message as permanently handled.
    pub async fn ack(&self) -> Result<(), BusError> {
        if self.state.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.channel.ack(self.state.tag).await
    }

    /// Reject the message. It goes back to the head of its queue and is
    /// redelivered; there is no discard.
    pub async fn nack(&self) -> Result<(), BusError> {
        if self.state.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.channel.nack(self.state.tag, true).await
    }

    pub fn is_settled(&self) -> bool {
        self.state.settled.load(Ordering::SeqCst)
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        self.state.tag
    }

    pub fn info(&self) -> &DeliveryInfo {
        &self.state.info
    }
}

/// Handle to a running subscription.
pub struct SubscriptionHandle {
    queue: String,
    consumer_tag: String,
    channel: Arc<dyn BusChannel>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// True once the consume loop has ended (cancelled or channel closed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the consumer and wait for the in-flight message, if any.
    pub async fn cancel(self) -> Result<(), BusError> {
        let result = self.channel.cancel(&self.consumer_tag).await;
        if let Err(e) = self.task.await {
            warn!(queue = %self.queue, error = %e, "Subscription task ended abnormally");
        }
        match result {
            Err(BusError::NotConnected) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Start the consume loop for an already registered consumer.
pub(crate) fn spawn_subscription<T, F, Fut, E>(
    channel: Arc<dyn BusChannel>,
    queue: String,
    stream: ConsumerStream,
    handler: F,
) -> SubscriptionHandle
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T, Acknowledger) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let ConsumerStream {
        consumer_tag,
        mut deliveries,
    } = stream;

    let task = {
        let channel = channel.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            debug!(queue = %queue, "Subscription started");
            while let Some(delivery) = deliveries.recv().await {
                let info = DeliveryInfo::new(&queue, &delivery);
                let acker = Acknowledger::new(channel.clone(), delivery.tag, info);

                let payload: T = match serde_json::from_slice(&delivery.body) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(
                            queue = %queue,
                            routing_key = %delivery.routing_key,
                            error = %e,
                            "Failed to decode message, requeueing"
                        );
                        if !requeue(&acker, &queue).await {
                            break;
                        }
                        continue;
                    }
                };

                let handler_ack = acker.clone();
                let handler = &handler;
                let outcome = AssertUnwindSafe(async move { handler(payload, handler_ack).await })
                    .catch_unwind()
                    .await;

                let settled_ok = match outcome {
                    Ok(Ok(())) if acker.is_settled() => true,
                    Ok(Ok(())) => {
                        warn!(queue = %queue, tag = %delivery.tag, "Handler returned without settling, requeueing");
                        requeue(&acker, &queue).await
                    }
                    Ok(Err(e)) => {
                        warn!(queue = %queue, tag = %delivery.tag, error = %e, "Handler failed, requeueing");
                        requeue(&acker, &queue).await
                    }
                    Err(_) => {
                        error!(queue = %queue, tag = %delivery.tag, "Handler panicked, requeueing");
                        requeue(&acker, &queue).await
                    }
                };
                if !settled_ok {
                    break;
                }
            }
            debug!(queue = %queue, "Subscription ended");
        })
    };

    SubscriptionHandle {
        queue,
        consumer_tag,
        channel,
        task,
    }
}

/// Nack with requeue. Returns false when the channel is gone.
async fn requeue(acker: &Acknowledger, queue: &str) -> bool {
    match acker.nack().await {
        Ok(()) => true,
        Err(BusError::NotConnected) => {
            debug!(queue, "Channel closed while requeueing");
            false
        }
        Err(e) => {
            warn!(queue, error = %e, "Requeue failed");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use crate::message::{ConsumeOptions, MessageProperties, OutboundMessage, QueueOptions};
    use crate::transport::BusConnector;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn setup() -> (InMemoryBroker, Arc<dyn BusChannel>) {
        let broker = InMemoryBroker::new();
        let channel = broker.connect("memory://localhost").await.unwrap();
        channel
            .declare_queue("work", QueueOptions::default())
            .await
            .unwrap();
        channel.set_prefetch(1).await.unwrap();
        (broker, channel)
    }

    fn json(body: &str) -> OutboundMessage {
        OutboundMessage {
            properties: MessageProperties::default(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_acknowledger_settles_once() {
        let (broker, channel) = setup().await;
        channel.publish("", "work", json("1")).unwrap();
        let mut stream = channel
            .consume("work", ConsumeOptions::default())
            .await
            .unwrap();
        let delivery = stream.deliveries.recv().await.unwrap();

        let acker = Acknowledger::new(
            channel.clone(),
            delivery.tag,
            DeliveryInfo::new("work", &delivery),
        );
        acker.ack().await.unwrap();
        acker.nack().await.unwrap();
        assert!(acker.is_settled());
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.queue_depth("work"), Some(0));
    }

    #[tokio::test]
    async fn test_handler_nack_requeues_for_redelivery() {
        let (broker, channel) = setup().await;
        channel.publish("", "work", json("5")).unwrap();
        let stream = channel
            .consume("work", ConsumeOptions::default())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let handle = spawn_subscription(channel.clone(), "work".into(), stream, move |_: u32, ack: Acknowledger| {
            let tx = tx.clone();
            async move {
                let redelivered = ack.info().redelivered;
                tx.send(redelivered).ok();
                if redelivered {
                    ack.ack().await
                } else {
                    ack.nack().await
                }
            }
        });

        assert_eq!(timeout(Duration::from_millis(200), rx.recv()).await.unwrap(), Some(false));
        assert_eq!(timeout(Duration::from_millis(200), rx.recv()).await.unwrap(), Some(true));
        handle.cancel().await.unwrap();
        assert_eq!(broker.queue_depth("work"), Some(0));
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_requeued() {
        let (broker, channel) = setup().await;
        channel.publish("", "work", json("not json")).unwrap();
        let stream = channel
            .consume("work", ConsumeOptions::default())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let handle = spawn_subscription(channel.clone(), "work".into(), stream, move |n: u32, ack: Acknowledger| {
            let tx = tx.clone();
            async move {
                tx.send(n).ok();
                ack.ack().await
            }
        });

        // Let the loop spin on the poison message, then cancel it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel().await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(broker.queue_depth("work"), Some(1));
    }

    #[tokio::test]
    async fn test_handler_error_requeues_then_succeeds() {
        let (broker, channel) = setup().await;
        channel.publish("", "work", json("7")).unwrap();
        let stream = channel
            .consume("work", ConsumeOptions::default())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let handle = spawn_subscription(channel.clone(), "work".into(), stream, move |_: u32, ack: Acknowledger| {
            let tx = tx.clone();
            async move {
                let redelivered = ack.info().redelivered;
                tx.send(redelivered).ok();
                if redelivered {
                    ack.ack().await.map_err(|e| e.to_string())
                } else {
                    Err("transient".to_string())
                }
            }
        });

        let first = timeout(Duration::from_millis(200), rx.recv()).await.unwrap();
        let second = timeout(Duration::from_millis(200), rx.recv()).await.unwrap();
        assert_eq!(first, Some(false));
        assert_eq!(second, Some(true));

        handle.cancel().await.unwrap();
        assert_eq!(broker.queue_depth("work"), Some(0));
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_the_loop() {
        let (_broker, channel) = setup().await;
        channel.publish("", "work", json("1")).unwrap();
        channel.publish("", "work", json("2")).unwrap();
        let stream = channel
            .consume("work", ConsumeOptions::default())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let handle = spawn_subscription(channel.clone(), "work".into(), stream, move |n: u32, ack: Acknowledger| {
            let tx = tx.clone();
            async move {
                if n == 1 && !ack.info().redelivered {
                    panic!("boom");
                }
                tx.send(n).ok();
                ack.ack().await
            }
        });

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(timeout(Duration::from_millis(200), rx.recv()).await.unwrap().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
        assert!(!handle.is_finished());
        handle.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsettled_handler_result_requeues() {
        let (broker, channel) = setup().await;
        channel.publish("", "work", json("1")).unwrap();
        let stream = channel
            .consume("work", ConsumeOptions::default())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let handle = spawn_subscription(channel.clone(), "work".into(), stream, move |_: u32, ack: Acknowledger| {
            let tx = tx.clone();
            async move {
                tx.send(ack.info().redelivered).ok();
                if ack.info().redelivered {
                    ack.ack().await?;
                }
                Ok::<(), BusError>(())
            }
        });

        assert_eq!(timeout(Duration::from_millis(200), rx.recv()).await.unwrap(), Some(false));
        assert_eq!(timeout(Duration::from_millis(200), rx.recv()).await.unwrap(), Some(true));
        handle.cancel().await.unwrap();
        assert_eq!(broker.queue_depth("work"), Some(0));
    }
}
