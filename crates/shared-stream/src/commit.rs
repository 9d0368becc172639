//! # Offset Commit Policy
//!
//! Offsets are committed automatically every `interval` or once
//! `threshold` processed records are uncommitted, whichever comes first.
//! Only offsets of records whose callback has returned are committed, so a
//! crash reprocesses at most the uncommitted tail (at-least-once).

use std::collections::BTreeMap;
use std::time::Duration;

/// When the consume loop commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    pub interval: Duration,
    pub threshold: usize,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            threshold: 100,
        }
    }
}

/// Processed-but-uncommitted offsets of one consumer.
#[derive(Debug, Default)]
pub(crate) struct OffsetTracker {
    next_offsets: BTreeMap<i32, i64>,
    uncommitted: usize,
}

impl OffsetTracker {
    /// Record that `offset` on `partition` has been processed. Returns true
    /// once `threshold` records are waiting for a commit.
    pub(crate) fn processed(&mut self, partition: i32, offset: i64, threshold: usize) -> bool {
        let next = self.next_offsets.entry(partition).or_insert(offset + 1);
        *next = (*next).max(offset + 1);
        self.uncommitted += 1;
        self.uncommitted >= threshold
    }

    pub(crate) fn uncommitted(&self) -> usize {
        self.uncommitted
    }

    /// Offsets to commit, if anything was processed since the last commit.
    pub(crate) fn pending(&self) -> Option<Vec<(i32, i64)>> {
        if self.uncommitted == 0 {
            return None;
        }
        Some(self.next_offsets.iter().map(|(p, o)| (*p, *o)).collect())
    }

    pub(crate) fn committed(&mut self) {
        self.uncommitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_triggers_commit() {
        let mut tracker = OffsetTracker::default();
        for offset in 0..99 {
            assert!(!tracker.processed(0, offset, 100));
        }
        assert!(tracker.processed(1, 0, 100));
        assert_eq!(tracker.pending(), Some(vec![(0, 99), (1, 1)]));
    }

    #[test]
    fn test_nothing_pending_after_commit() {
        let mut tracker = OffsetTracker::default();
        assert_eq!(tracker.pending(), None);

        tracker.processed(2, 7, 100);
        assert_eq!(tracker.uncommitted(), 1);
        tracker.committed();
        assert_eq!(tracker.pending(), None);

        tracker.processed(2, 8, 100);
        assert_eq!(tracker.pending(), Some(vec![(2, 9)]));
    }

    #[test]
    fn test_default_policy() {
        let policy = CommitPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.threshold, 100);
    }
}
