//! In-process event store.
//!
//! Gives the same per-key atomicity as the shared store, but only within one
//! process. Suitable for tests, demos and single-instance deployments.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{AdmitOutcome, AdmitRequest, EventStore, WindowSnapshot};
use super::clock::Timestamp;
use crate::error::Result;

/// Minimum time between sweeps of expired records.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Timestamps for one key, kept sorted ascending.
#[derive(Debug, Default)]
struct WindowRecord {
    entries: Vec<Timestamp>,
    expires_at: Option<Timestamp>,
}

impl WindowRecord {
    /// Expired once `now` is strictly past the deadline, as with Redis keys.
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    fn trim(&mut self, cutoff: Timestamp) {
        let stale = self.entries.partition_point(|ts| *ts < cutoff);
        self.entries.drain(..stale);
    }

    fn insert(&mut self, at: Timestamp) {
        let pos = self.entries.partition_point(|ts| *ts <= at);
        self.entries.insert(pos, at);
    }

    fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            count: self.entries.len() as u64,
            oldest: self.entries.first().copied(),
        }
    }
}

/// An [`EventStore`] held in process memory.
///
/// Each operation runs under the map's entry lock for its key, so operations
/// on one key are serialized. Records of identifiers that stop sending are
/// swept as their expiry passes, at most once per sweep interval.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    records: DashMap<String, WindowRecord>,
    next_sweep: AtomicI64,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record whose expiry is strictly before `now`.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }

    /// Purge expired records if the sweep interval has elapsed.
    ///
    /// Must not be called while holding a guard into `records`.
    fn sweep_if_due(&self, now: Timestamp) {
        let due = self.next_sweep.load(Ordering::Acquire);
        if now.as_micros() < due {
            return;
        }

        let next = now.saturating_add(SWEEP_INTERVAL).as_micros();
        if self
            .next_sweep
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let removed = self.purge_expired(now);
        if removed > 0 {
            debug!(removed, remaining = self.records.len(), "Swept expired records");
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn trim_and_admit(&self, key: &str, request: AdmitRequest) -> Result<AdmitOutcome> {
        self.sweep_if_due(request.now);
        let mut record = self.records.entry(key.to_string()).or_default();

        if record.is_expired(request.now) {
            record.entries.clear();
        }
        record.trim(request.cutoff);

        let count_before = record.entries.len() as u64;
        let admitted = count_before < request.max_requests;
        if admitted {
            record.insert(request.now);
        }
        record.expires_at = Some(
            request
                .now
                .saturating_add(Duration::from_millis(request.ttl_millis)),
        );

        let outcome = AdmitOutcome {
            count_before,
            admitted,
            oldest: record.entries.first().copied(),
        };
        let empty = record.entries.is_empty();
        drop(record);

        if empty {
            self.records.remove_if(key, |_, r| r.entries.is_empty());
        }

        trace!(key = %key, count = count_before, admitted, "In-memory admit");
        Ok(outcome)
    }

    async fn trim_and_count(
        &self,
        key: &str,
        now: Timestamp,
        cutoff: Timestamp,
    ) -> Result<WindowSnapshot> {
        self.sweep_if_due(now);
        let snapshot = match self.records.get_mut(key) {
            Some(mut record) => {
                if record.is_expired(now) {
                    record.entries.clear();
                }
                record.trim(cutoff);
                record.snapshot()
            }
            None => return Ok(WindowSnapshot::default()),
        };

        if snapshot.count == 0 {
            self.records.remove_if(key, |_, r| r.entries.is_empty());
        }
        Ok(snapshot)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }
}
