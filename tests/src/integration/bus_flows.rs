//! # Topic Bus Flows
//!
//! Routing through the well-known exchanges, settlement of deliveries and
//! request/reply, driven through [`BusClient`] against one shared
//! [`InMemoryBroker`].

use super::eventually;
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_bus::{Acknowledger, BusClient, BusError, ExchangeKind, InMemoryBroker};
use shared_types::topology::{exchanges, queues, routing};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

async fn connect(broker: &InMemoryBroker) -> Arc<BusClient> {
    Arc::new(
        BusClient::connect(broker, "memory://localhost")
            .await
            .unwrap(),
    )
}

// =============================================================================
// ROUTING
// =============================================================================

#[tokio::test]
async fn test_topic_wildcards_route_per_word() {
    let broker = InMemoryBroker::new();
    let bus = connect(&broker).await;
    bus.declare_exchange(exchanges::EVENTS, ExchangeKind::Topic)
        .await
        .unwrap();
    bus.declare_queue("one-word").await.unwrap();
    bus.declare_queue("any-depth").await.unwrap();
    bus.bind_queue("one-word", exchanges::EVENTS, routing::INFRASTRUCTURE)
        .await
        .unwrap();
    bus.bind_queue("any-depth", exchanges::EVENTS, "infrastructure.#")
        .await
        .unwrap();

    bus.publish(exchanges::EVENTS, "infrastructure.created", &json!({}))
        .await
        .unwrap();
    bus.publish(
        exchanges::EVENTS,
        routing::INFRASTRUCTURE_VM_STATUS,
        &json!({ "status": "offline" }),
    )
    .await
    .unwrap();
    bus.publish(exchanges::EVENTS, "infrastructure", &json!({}))
        .await
        .unwrap();

    assert_eq!(broker.queue_depth("one-word"), Some(1));
    assert_eq!(broker.queue_depth("any-depth"), Some(3));
}

#[tokio::test]
async fn test_fanout_copies_to_every_queue_and_default_exchange_targets_one() {
    let broker = InMemoryBroker::new();
    let bus = connect(&broker).await;
    bus.declare_exchange(exchanges::NOTIFICATIONS, ExchangeKind::Fanout)
        .await
        .unwrap();
    for queue in ["email", "sms"] {
        bus.declare_queue(queue).await.unwrap();
        bus.bind_queue(queue, exchanges::NOTIFICATIONS, "")
            .await
            .unwrap();
    }

    bus.publish(exchanges::NOTIFICATIONS, "ignored.key", &json!({ "n": 1 }))
        .await
        .unwrap();
    bus.publish("", "sms", &json!({ "n": 2 })).await.unwrap();

    assert_eq!(broker.queue_depth("email"), Some(1));
    assert_eq!(broker.queue_depth("sms"), Some(2));
}

#[tokio::test]
async fn test_unroutable_message_is_dropped_silently() {
    let broker = InMemoryBroker::new();
    let bus = connect(&broker).await;
    bus.declare_exchange(exchanges::MONITORING, ExchangeKind::Topic)
        .await
        .unwrap();

    assert!(bus
        .publish(exchanges::MONITORING, "monitoring.cpu", &json!({}))
        .await
        .is_ok());
    assert!(broker.queue_names().is_empty());
}

// =============================================================================
// SETTLEMENT
// =============================================================================

#[tokio::test]
async fn test_failed_handler_gets_redelivery() {
    let broker = InMemoryBroker::new();
    let bus = connect(&broker).await;
    bus.declare_queue(queues::VM_CREATED).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let redelivered = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let attempts = attempts.clone();
        let redelivered = redelivered.clone();
        bus.subscribe(queues::VM_CREATED, move |_event: Value, ack: Acknowledger| {
            let attempts = attempts.clone();
            let redelivered = redelivered.clone();
            async move {
                redelivered.lock().push(ack.info().redelivered);
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err("database unavailable".to_string());
                }
                ack.ack().await.map_err(|e| e.to_string())
            }
        })
        .await
        .unwrap()
    };

    bus.publish("", queues::VM_CREATED, &json!({ "vm_id": "vm-1" }))
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(2), || attempts.load(Ordering::SeqCst) == 2).await);
    assert!(
        eventually(Duration::from_secs(2), || broker.unacked_count() == 0
            && broker.queue_depth(queues::VM_CREATED) == Some(0))
        .await
    );
    assert_eq!(*redelivered.lock(), vec![false, true]);

    handle.cancel().await.unwrap();
}

#[tokio::test]
async fn test_prefetch_one_serializes_deliveries() {
    let broker = InMemoryBroker::new();
    let bus = connect(&broker).await;
    bus.declare_queue(queues::TASK_COMPLETED).await.unwrap();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let handle = {
        let (in_flight, peak, done) = (in_flight.clone(), peak.clone(), done.clone());
        bus.subscribe(queues::TASK_COMPLETED, move |_task: Value, ack: Acknowledger| {
            let (in_flight, peak, done) = (in_flight.clone(), peak.clone(), done.clone());
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                ack.ack().await
            }
        })
        .await
        .unwrap()
    };

    for n in 0..5 {
        bus.publish("", queues::TASK_COMPLETED, &json!({ "task": n }))
            .await
            .unwrap();
    }

    assert!(eventually(Duration::from_secs(2), || done.load(Ordering::SeqCst) == 5).await);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    handle.cancel().await.unwrap();
}

#[tokio::test]
async fn test_publish_waits_out_flow_control() {
    let broker = InMemoryBroker::new();
    let bus = connect(&broker).await;
    bus.declare_queue(queues::METRICS_COLLECTED).await.unwrap();

    broker.set_flow_blocked(true);
    let publisher = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.publish("", queues::METRICS_COLLECTED, &json!({ "batch": 1 }))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!publisher.is_finished());

    broker.set_flow_blocked(false);
    timeout(Duration::from_secs(1), publisher)
        .await
        .expect("publish should resume after drain")
        .unwrap()
        .unwrap();
    assert_eq!(broker.queue_depth(queues::METRICS_COLLECTED), Some(1));
}

// =============================================================================
// REQUEST / REPLY
// =============================================================================

#[tokio::test]
async fn test_rpc_reply_matched_by_correlation_id() {
    let broker = InMemoryBroker::new();
    let caller = connect(&broker).await;
    let responder = connect(&broker).await;
    responder
        .declare_exchange(exchanges::SERVICES, ExchangeKind::Topic)
        .await
        .unwrap();
    responder.declare_queue(queues::AUTH_EVENTS).await.unwrap();
    responder
        .bind_queue(queues::AUTH_EVENTS, exchanges::SERVICES, routing::AUTH)
        .await
        .unwrap();

    let handle = {
        let bus = responder.clone();
        responder
            .subscribe(queues::AUTH_EVENTS, move |request: Value, ack: Acknowledger| {
                let bus = bus.clone();
                async move {
                    let info = ack.info().clone();
                    if let (Some(reply_to), Some(correlation_id)) =
                        (info.reply_to, info.correlation_id)
                    {
                        let user = request["user"].clone();
                        bus.reply(&reply_to, &correlation_id, &json!({ "user": user, "valid": true }))
                            .await?;
                    }
                    ack.ack().await
                }
            })
            .await
            .unwrap()
    };

    let alice_req = json!({ "user": "alice" });
    let bob_req = json!({ "user": "bob" });
    let (alice, bob) = tokio::join!(
        caller.rpc::<_, Value>(exchanges::SERVICES, "auth.validate_token", &alice_req, None),
        caller.rpc::<_, Value>(exchanges::SERVICES, "auth.validate_token", &bob_req, None),
    );
    assert_eq!(alice.unwrap()["user"], "alice");
    assert_eq!(bob.unwrap()["user"], "bob");
    assert_eq!(caller.pending_rpcs(), 0);

    handle.cancel().await.unwrap();
}

#[tokio::test]
async fn test_rpc_timeout_cleans_up_reply_queue() {
    let broker = InMemoryBroker::new();
    let bus = connect(&broker).await;
    bus.declare_exchange(exchanges::SERVICES, ExchangeKind::Topic)
        .await
        .unwrap();
    bus.declare_queue(queues::INFRASTRUCTURE_EVENTS).await.unwrap();
    bus.bind_queue(
        queues::INFRASTRUCTURE_EVENTS,
        exchanges::SERVICES,
        routing::INFRA_COMMANDS,
    )
    .await
    .unwrap();

    let err = bus
        .rpc::<_, Value>(
            exchanges::SERVICES,
            "infra.get_vm",
            &json!({ "vm_id": "vm-1" }),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BusError::Timeout { .. }));
    assert_eq!(bus.pending_rpcs(), 0);
    assert_eq!(
        broker.queue_names(),
        vec![queues::INFRASTRUCTURE_EVENTS.to_string()]
    );
    // The request itself stays queued for a responder that comes up later.
    assert_eq!(broker.queue_depth(queues::INFRASTRUCTURE_EVENTS), Some(1));
}

#[tokio::test]
async fn test_broker_teardown_fails_later_calls() {
    let broker = InMemoryBroker::new();
    let bus = connect(&broker).await;
    bus.declare_queue(queues::USER_CREATED).await.unwrap();

    broker.disconnect_all();

    assert!(bus
        .publish("", queues::USER_CREATED, &json!({}))
        .await
        .is_err());
    assert!(bus.close().await.is_ok());
    assert!(!bus.is_connected());
}
