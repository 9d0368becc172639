//! # Pending Replies
//!
//! Correlates request/reply traffic on the bus. Each outstanding request
//! registers a correlation ID and gets a oneshot receiver; the reply-queue
//! pump completes the entry when a message with that ID arrives.
//!
//! Entries are removed on completion, on timeout and on cancellation, so a
//! reply that shows up late finds nothing and is discarded.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier pairing a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct PendingReply {
    sender: oneshot::Sender<Vec<u8>>,
    created_at: Instant,
    routing_key: String,
}

/// Counters for the pending table.
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_abandoned: AtomicU64,
}

/// Outstanding requests keyed by correlation ID.
#[derive(Default)]
pub struct PendingReplies {
    pending: DashMap<CorrelationId, PendingReply>,
    stats: PendingStats,
}

impl PendingReplies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the receiver its reply body lands on.
    pub fn register(&self, routing_key: &str) -> (CorrelationId, oneshot::Receiver<Vec<u8>>) {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            correlation_id,
            PendingReply {
                sender: tx,
                created_at: Instant::now(),
                routing_key: routing_key.to_string(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(correlation_id = %correlation_id, routing_key, "Registered pending reply");
        (correlation_id, rx)
    }

    /// Deliver a reply body. Returns false for unknown or expired IDs.
    pub fn complete(&self, correlation_id: CorrelationId, body: Vec<u8>) -> bool {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            warn!(correlation_id = %correlation_id, "Reply for unknown or expired correlation ID");
            return false;
        };

        let elapsed = pending.created_at.elapsed();
        if pending.sender.send(body).is_ok() {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                routing_key = pending.routing_key,
                response_time_ms = elapsed.as_millis(),
                "Completed pending reply"
            );
            true
        } else {
            self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Drop an entry whose caller gave up waiting.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let removed = self.pending.remove(correlation_id).is_some();
        if removed {
            self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_complete() {
        let table = PendingReplies::new();
        let (id, rx) = table.register("auth.login");
        assert!(table.is_pending(&id));

        assert!(table.complete(id, b"{}".to_vec()));
        assert_eq!(rx.await.unwrap(), b"{}");
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn test_late_reply_is_discarded() {
        let table = PendingReplies::new();
        let (id, _rx) = table.register("auth.login");

        assert!(table.cancel(&id));
        assert!(!table.complete(id, b"late".to_vec()));
        assert_eq!(table.stats().total_completed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_dropped_receiver_counts_as_abandoned() {
        let table = PendingReplies::new();
        let (id, rx) = table.register("infra.get_vms");
        drop(rx);

        assert!(!table.complete(id, Vec::new()));
        assert_eq!(table.stats().total_abandoned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_correlation_id_parse_roundtrip() {
        let id = CorrelationId::new();
        assert_eq!(CorrelationId::parse(&id.to_string()).unwrap(), id);
        assert!(CorrelationId::parse("not-a-uuid").is_err());
    }
}
