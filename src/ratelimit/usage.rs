//! Read-only window introspection.

use std::sync::Arc;
use std::time::Duration;

use super::backend::{EventStore, StoreClient};
use super::clock::{Clock, Timestamp};
use super::evaluator::reset_at;
use super::identifier::Identifier;
use super::policy::LimitPolicy;
use crate::error::Result;

/// Current state of an identifier's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Requests recorded inside the window
    pub count: u64,
    /// When the oldest recorded request leaves the window
    pub reset_at: Timestamp,
    /// Time from now until `reset_at`
    pub reset_in: Duration,
}

/// Reports window usage without recording anything.
///
/// Calling it never changes an admission outcome, however often it runs.
pub struct UsageReporter<S> {
    client: StoreClient<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for UsageReporter<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: EventStore> UsageReporter<S> {
    /// Create a reporter over a store client.
    pub fn new(client: StoreClient<S>, clock: Arc<dyn Clock>) -> Self {
        Self { client, clock }
    }

    /// Number of requests in the window ending now.
    pub async fn count(&self, identifier: &Identifier, window: Duration) -> Result<u64> {
        Ok(self.usage(identifier, window).await?.count)
    }

    /// Count and time-to-reset for the window ending now.
    pub async fn usage(&self, identifier: &Identifier, window: Duration) -> Result<Usage> {
        let policy = LimitPolicy::new(0, window)?;
        let now = self.clock.now();

        let snapshot = self
            .client
            .trim_and_count(identifier, now, now.saturating_sub(window))
            .await?;
        let reset_at = reset_at(snapshot.oldest, now, &policy);

        Ok(Usage {
            count: snapshot.count,
            reset_at,
            reset_in: reset_at.duration_since(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuotaError;
    use crate::ratelimit::backend::AdmitRequest;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::memory::InMemoryEventStore;

    async fn record(store: &InMemoryEventStore, at: f64) {
        let now = Timestamp::from_secs_f64(at);
        store
            .trim_and_admit(
                "rate_limit:user",
                AdmitRequest {
                    now,
                    cutoff: now.saturating_sub(Duration::from_secs(10)),
                    max_requests: 100,
                    ttl_millis: 10_000,
                },
            )
            .await
            .unwrap();
    }

    fn reporter(
        store: &Arc<InMemoryEventStore>,
        clock: &ManualClock,
    ) -> UsageReporter<InMemoryEventStore> {
        UsageReporter::new(StoreClient::new(Arc::clone(store)), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_usage_counts_and_reports_reset() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = ManualClock::new(Timestamp::from_secs_f64(5.0));
        record(&store, 2.0).await;
        record(&store, 4.0).await;

        let usage = reporter(&store, &clock)
            .usage(&Identifier::new("user").unwrap(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(usage.count, 2);
        assert_eq!(usage.reset_at, Timestamp::from_secs_f64(12.0));
        assert_eq!(usage.reset_in, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_usage_is_idempotent() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = ManualClock::new(Timestamp::from_secs_f64(5.0));
        record(&store, 4.0).await;
        let reporter = reporter(&store, &clock);
        let user = Identifier::new("user").unwrap();

        for _ in 0..10 {
            assert_eq!(reporter.count(&user, Duration::from_secs(10)).await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_usage_drains_to_zero() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = ManualClock::new(Timestamp::from_secs_f64(0.0));
        record(&store, 0.0).await;
        record(&store, 1.0).await;
        let reporter = reporter(&store, &clock);
        let user = Identifier::new("user").unwrap();
        let window = Duration::from_secs(10);

        let mut last = reporter.count(&user, window).await.unwrap();
        assert_eq!(last, 2);
        for _ in 0..12 {
            clock.advance(Duration::from_millis(1000));
            let now = reporter.count(&user, window).await.unwrap();
            assert!(now <= last);
            last = now;
        }
        assert_eq!(last, 0);
    }

    #[tokio::test]
    async fn test_usage_for_unknown_identifier() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = ManualClock::new(Timestamp::from_secs_f64(5.0));

        let usage = reporter(&store, &clock)
            .usage(&Identifier::new("ghost").unwrap(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(usage.count, 0);
        assert_eq!(usage.reset_in, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_zero_window_rejected() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = ManualClock::default();

        let err = reporter(&store, &clock)
            .count(&Identifier::new("user").unwrap(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::Configuration(_)));
    }
}
