//! Event store contract shared by all window operations.
//!
//! A store holds, per key, an ordered set of event timestamps. The
//! correctness of the whole limiter rests on [`EventStore::trim_and_admit`]
//! running as one indivisible step per key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::clock::Timestamp;
use super::identifier::Identifier;
use crate::error::Result;

/// Default namespace for store keys.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit:";
/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Input to the atomic admission primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitRequest {
    /// Score of the event to insert if admitted
    pub now: Timestamp,
    /// Entries scored strictly below this are trimmed
    pub cutoff: Timestamp,
    /// Insert only while the trimmed count is below this
    pub max_requests: u64,
    /// Expiry applied to the whole record, in milliseconds
    pub ttl_millis: u64,
}

/// Result of the atomic admission primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitOutcome {
    /// Entries left after trimming, before any insert
    pub count_before: u64,
    /// Whether an entry was inserted at `now`
    pub admitted: bool,
    /// Oldest surviving entry after the operation
    pub oldest: Option<Timestamp>,
}

/// A read-only view of a trimmed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSnapshot {
    /// Entries inside the window
    pub count: u64,
    /// Oldest entry inside the window
    pub oldest: Option<Timestamp>,
}

/// A shared, ordered event store keyed by string.
///
/// Implementations must serialize operations on the same key. They must
/// never emulate `trim_and_admit` with separate round trips.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically trim entries older than `cutoff`, count, insert at `now`
    /// if the count is below `max_requests`, and refresh the record expiry.
    async fn trim_and_admit(&self, key: &str, request: AdmitRequest) -> Result<AdmitOutcome>;

    /// Trim entries older than `cutoff` and count what remains. Never inserts.
    ///
    /// A record whose expiry lies strictly before `now` counts as empty, the
    /// same as in `trim_and_admit`.
    async fn trim_and_count(
        &self,
        key: &str,
        now: Timestamp,
        cutoff: Timestamp,
    ) -> Result<WindowSnapshot>;

    /// Delete the record for `key`. Deleting a missing record succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Client-side handle on an [`EventStore`].
///
/// Maps identifiers to namespaced keys and bounds every call with a timeout.
/// A timed-out call surfaces as `StoreUnavailable`.
pub struct StoreClient<S> {
    store: Arc<S>,
    key_prefix: String,
    timeout: Duration,
}

impl<S> Clone for StoreClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key_prefix: self.key_prefix.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: EventStore> StoreClient<S> {
    /// Create a client with the default key prefix and timeout.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The store key for an identifier.
    pub fn key_for(&self, identifier: &Identifier) -> String {
        identifier.store_key(&self.key_prefix)
    }

    pub(crate) async fn trim_and_admit(
        &self,
        identifier: &Identifier,
        request: AdmitRequest,
    ) -> Result<AdmitOutcome> {
        let key = self.key_for(identifier);
        self.bounded(&key, self.store.trim_and_admit(&key, request))
            .await
    }

    pub(crate) async fn trim_and_count(
        &self,
        identifier: &Identifier,
        now: Timestamp,
        cutoff: Timestamp,
    ) -> Result<WindowSnapshot> {
        let key = self.key_for(identifier);
        self.bounded(&key, self.store.trim_and_count(&key, now, cutoff))
            .await
    }

    pub(crate) async fn delete(&self, identifier: &Identifier) -> Result<()> {
        let key = self.key_for(identifier);
        self.bounded(&key, self.store.delete(&key)).await
    }

    async fn bounded<T, F>(&self, key: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(inner) => inner,
            Err(elapsed) => Err(elapsed.into()),
        };

        if let Err(ref e) = result {
            warn!(
                key = %key,
                timeout_ms = self.timeout.as_millis() as u64,
                error = %e,
                "Event store call failed"
            );
        }
        result
    }
}
