//! Short-lived seen-set of idempotency keys.
//!
//! The seen-set only saves store round trips for retries and overlapping windows. The
//! store's set-or-ignore insert enforces the same contract permanently, so an entry
//! that expired or never made it here still cannot produce a second copy of an event.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tally_core::{IdempotencyKey, UsageEvent};

/// Seen-set with time-based expiry.
pub struct IdempotencyManager {
    seen: DashMap<IdempotencyKey, DateTime<Utc>>,
    retention: chrono::Duration,
}

/// Events of a batch split by novelty.
#[derive(Debug, Default)]
pub struct Partition {
    /// Events not seen before, one per key.
    pub fresh: Vec<UsageEvent>,
    /// Events dropped as already seen or repeated within the batch.
    pub duplicates: usize,
}

impl IdempotencyManager {
    /// Create a seen-set keeping keys for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::hours(48)),
        }
    }

    /// Split a batch into unseen events and duplicates.
    ///
    /// Keys are not recorded here; call [`mark_seen`](Self::mark_seen) once the fresh
    /// events are persisted, so a failed write is retried in full.
    #[must_use]
    pub fn partition(&self, events: Vec<UsageEvent>) -> Partition {
        let now = Utc::now();
        let mut batch = HashSet::with_capacity(events.len());
        let mut partition = Partition::default();

        for event in events {
            let key = event.idempotency_key();
            let already_seen = self
                .seen
                .get(&key)
                .is_some_and(|seen_at| now - *seen_at < self.retention);
            if already_seen || !batch.insert(key) {
                partition.duplicates += 1;
            } else {
                partition.fresh.push(event);
            }
        }
        partition
    }

    /// Record persisted events as seen.
    pub fn mark_seen<'a>(&self, events: impl IntoIterator<Item = &'a UsageEvent>) {
        let now = Utc::now();
        for event in events {
            self.seen.insert(event.idempotency_key(), now);
        }
    }

    /// Drop expired keys. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let before = self.seen.len();
        self.seen.retain(|_, seen_at| *seen_at > cutoff);
        before.saturating_sub(self.seen.len())
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no keys are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
