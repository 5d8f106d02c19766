//! Sliding-window admission.

use std::sync::Arc;

use tracing::{debug, trace};

use super::backend::{AdmitRequest, EventStore, StoreClient};
use super::clock::{Clock, Timestamp};
use super::decision::Decision;
use super::identifier::Identifier;
use super::policy::LimitPolicy;
use crate::error::Result;

/// Decides admit or deny for one request against its sliding window.
///
/// Holds no quota state of its own. Concurrent calls for the same identifier
/// are serialized by the store's atomic admission primitive; calls for
/// different identifiers share nothing.
pub struct WindowEvaluator<S> {
    client: StoreClient<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for WindowEvaluator<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: EventStore> WindowEvaluator<S> {
    /// Create an evaluator over a store client.
    pub fn new(client: StoreClient<S>, clock: Arc<dyn Clock>) -> Self {
        Self { client, clock }
    }

    /// Evaluate one request for `identifier` under `policy`.
    ///
    /// An admitted request is recorded at the current time. A denied request
    /// leaves the window untouched, so a saturated identifier drains purely
    /// with time no matter how often it retries.
    pub async fn evaluate(
        &self,
        identifier: &Identifier,
        policy: &LimitPolicy,
    ) -> Result<Decision> {
        let now = self.clock.now();
        let request = AdmitRequest {
            now,
            cutoff: now.saturating_sub(policy.window()),
            max_requests: policy.max_requests(),
            ttl_millis: policy.ttl_millis(),
        };

        let outcome = self.client.trim_and_admit(identifier, request).await?;
        let reset_at = reset_at(outcome.oldest, now, policy);

        let decision = if outcome.admitted {
            Decision {
                allowed: true,
                limit: policy.max_requests(),
                remaining: policy
                    .max_requests()
                    .saturating_sub(outcome.count_before + 1),
                reset_at,
                retry_after: None,
            }
        } else {
            debug!(
                identifier = %identifier,
                count = outcome.count_before,
                limit = policy.max_requests(),
                "Rate limit exceeded"
            );
            Decision {
                allowed: false,
                limit: policy.max_requests(),
                remaining: 0,
                reset_at,
                retry_after: Some(reset_at.duration_since(now)),
            }
        };

        trace!(
            identifier = %identifier,
            allowed = decision.allowed,
            remaining = decision.remaining,
            reset_at = %decision.reset_at,
            "Window evaluated"
        );

        Ok(decision)
    }
}

/// When the oldest surviving entry leaves the window, or a full window from
/// now if there is none.
pub(crate) fn reset_at(
    oldest: Option<Timestamp>,
    now: Timestamp,
    policy: &LimitPolicy,
) -> Timestamp {
    oldest.unwrap_or(now).saturating_add(policy.window())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::memory::InMemoryEventStore;
    use std::time::Duration;

    type Fixture = (
        WindowEvaluator<InMemoryEventStore>,
        ManualClock,
        Arc<InMemoryEventStore>,
    );

    fn setup(start: f64) -> Fixture {
        let clock = ManualClock::new(Timestamp::from_secs_f64(start));
        let store = Arc::new(InMemoryEventStore::new());
        let evaluator = WindowEvaluator::new(
            StoreClient::new(Arc::clone(&store)),
            Arc::new(clock.clone()),
        );
        (evaluator, clock, store)
    }

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_remaining_counts_down_then_denies() {
        let (evaluator, clock, _) = setup(1_000.0);
        let policy = LimitPolicy::from_secs_f64(10, 60.0).unwrap();
        let client = id("client");

        for expected in (0..10).rev() {
            let decision = evaluator.evaluate(&client, &policy).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.limit, 10);
            assert_eq!(decision.remaining, expected);
            assert_eq!(decision.retry_after, None);
        }

        clock.advance(Duration::from_secs(1));
        let decision = evaluator.evaluate(&client, &policy).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, Timestamp::from_secs_f64(1_060.0));
        assert_eq!(decision.retry_after, Some(Duration::from_secs(59)));
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let (evaluator, clock, _) = setup(0.0);
        let policy = LimitPolicy::from_secs_f64(5, 1.0).unwrap();
        let client = id("client");

        for _ in 0..5 {
            assert!(evaluator.evaluate(&client, &policy).await.unwrap().allowed);
        }
        assert!(!evaluator.evaluate(&client, &policy).await.unwrap().allowed);

        clock.advance(Duration::from_millis(1100));
        let decision = evaluator.evaluate(&client, &policy).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let (evaluator, _, _) = setup(0.0);
        let policy = LimitPolicy::from_secs_f64(1, 60.0).unwrap();

        assert!(evaluator.evaluate(&id("a"), &policy).await.unwrap().allowed);
        assert!(!evaluator.evaluate(&id("a"), &policy).await.unwrap().allowed);
        assert!(evaluator.evaluate(&id("b"), &policy).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_sliding_not_fixed_window() {
        let (evaluator, clock, _) = setup(0.0);
        let policy = LimitPolicy::from_secs_f64(2, 10.0).unwrap();
        let client = id("client");

        // t=0 and t=6 fill the window.
        assert!(evaluator.evaluate(&client, &policy).await.unwrap().allowed);
        clock.advance(Duration::from_secs(6));
        assert!(evaluator.evaluate(&client, &policy).await.unwrap().allowed);

        // t=9: still full, reset tied to the t=0 entry.
        clock.advance(Duration::from_secs(3));
        let decision = evaluator.evaluate(&client, &policy).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reset_at, Timestamp::from_secs_f64(10.0));
        assert_eq!(decision.retry_after, Some(Duration::from_secs(1)));

        // t=10: the t=0 entry sits exactly on the cutoff and is kept.
        clock.advance(Duration::from_secs(1));
        assert!(!evaluator.evaluate(&client, &policy).await.unwrap().allowed);

        // Just past t=10 it is trimmed; the t=6 entry still counts.
        clock.advance(Duration::from_micros(1));
        let decision = evaluator.evaluate(&client, &policy).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, Timestamp::from_secs_f64(16.0));
    }

    #[tokio::test]
    async fn test_reset_at_for_empty_window() {
        let (evaluator, _, _) = setup(100.0);
        let policy = LimitPolicy::from_secs_f64(3, 30.0).unwrap();

        let decision = evaluator.evaluate(&id("x"), &policy).await.unwrap();
        assert_eq!(decision.reset_at, Timestamp::from_secs_f64(130.0));
    }

    #[tokio::test]
    async fn test_zero_limit_always_denies() {
        let (evaluator, _, store) = setup(0.0);
        let policy = LimitPolicy::from_secs_f64(0, 60.0).unwrap();

        let decision = evaluator.evaluate(&id("x"), &policy).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, Timestamp::from_secs_f64(60.0));
        assert_eq!(decision.retry_after, Some(Duration::from_secs(60)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_denial_does_not_consume_window() {
        let (evaluator, clock, store) = setup(0.0);
        let policy = LimitPolicy::from_secs_f64(1, 5.0).unwrap();
        let client = id("client");

        assert!(evaluator.evaluate(&client, &policy).await.unwrap().allowed);

        // Hammer the limiter while saturated.
        for _ in 0..20 {
            clock.advance(Duration::from_millis(200));
            assert!(!evaluator.evaluate(&client, &policy).await.unwrap().allowed);
        }

        // Only the admitted entry was ever stored, so the window drains on time.
        assert_eq!(
            store
                .trim_and_count("rate_limit:client", clock.now(), Timestamp::EPOCH)
                .await
                .unwrap()
                .count,
            1
        );
        clock.advance(Duration::from_millis(1001));
        assert!(evaluator.evaluate(&client, &policy).await.unwrap().allowed);
    }
}
