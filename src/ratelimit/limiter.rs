//! The rate limiter facade consumed by request-handling layers.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::backend::{EventStore, StoreClient, DEFAULT_KEY_PREFIX, DEFAULT_STORE_TIMEOUT};
use super::clock::{Clock, SystemClock};
use super::decision::Decision;
use super::evaluator::WindowEvaluator;
use super::identifier::{Identifier, IdentifierStrategy, RequestContext};
use super::policy::{LimitPolicy, PolicyOverrides};
use super::reset::ResetController;
use super::usage::{Usage, UsageReporter};
use crate::error::{QuotaError, Result};

/// What to do when the store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request
    Open,
    /// Deny the request
    #[default]
    Closed,
}

/// Result of [`RateLimiter::admit`].
///
/// `Degraded` means the store was unavailable and the configured
/// [`FailurePolicy`] decided the outcome; it is never confused with a
/// rate-limited `Decided` denial.
#[derive(Debug)]
pub enum Admission {
    /// The window was evaluated
    Decided(Decision),
    /// The store was unavailable
    Degraded {
        /// Outcome chosen by the failure policy
        allowed: bool,
        /// The store error
        error: QuotaError,
    },
}

impl Admission {
    /// Whether the request should proceed.
    pub fn is_allowed(&self) -> bool {
        match self {
            Admission::Decided(decision) => decision.allowed,
            Admission::Degraded { allowed, .. } => *allowed,
        }
    }

    /// The decision, if the window was evaluated.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Admission::Decided(decision) => Some(decision),
            Admission::Degraded { .. } => None,
        }
    }
}

/// Sliding-window rate limiter over a shared event store.
///
/// Holds only immutable configuration; every piece of quota state lives in
/// the store, so any number of instances may share one store.
pub struct RateLimiter<S> {
    evaluator: WindowEvaluator<S>,
    usage: UsageReporter<S>,
    reset: ResetController<S>,
    defaults: LimitPolicy,
    strategy: IdentifierStrategy,
    failure_policy: FailurePolicy,
}

impl<S: EventStore> RateLimiter<S> {
    /// Create a rate limiter with default settings.
    pub fn new(store: Arc<S>) -> Self {
        let client = StoreClient::new(store);
        Self::assemble(
            client,
            Arc::new(SystemClock),
            LimitPolicy::default(),
            IdentifierStrategy::default(),
            FailurePolicy::default(),
        )
    }

    /// Start building a rate limiter.
    pub fn builder(store: Arc<S>) -> RateLimiterBuilder<S> {
        RateLimiterBuilder::new(store)
    }

    fn assemble(
        client: StoreClient<S>,
        clock: Arc<dyn Clock>,
        defaults: LimitPolicy,
        strategy: IdentifierStrategy,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            evaluator: WindowEvaluator::new(client.clone(), Arc::clone(&clock)),
            usage: UsageReporter::new(client.clone(), clock),
            reset: ResetController::new(client),
            defaults,
            strategy,
            failure_policy,
        }
    }

    /// The default policy applied when no override is given.
    pub fn defaults(&self) -> &LimitPolicy {
        &self.defaults
    }

    /// The configured behaviour on store unavailability.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// The identifier derivation strategy.
    pub fn strategy(&self) -> &IdentifierStrategy {
        &self.strategy
    }

    /// Derive the identifier for a request.
    pub fn resolve_identifier(&self, ctx: &RequestContext) -> Result<Identifier> {
        self.strategy.resolve(ctx)
    }

    /// Check a request against its quota.
    ///
    /// Resolves the identifier, applies `overrides` over the defaults, and
    /// evaluates the window. Store failures are returned as
    /// `StoreUnavailable`, never folded into a decision.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        overrides: Option<&PolicyOverrides>,
    ) -> Result<Decision> {
        let policy = self.policy_for(overrides)?;
        let identifier = self.resolve_identifier(ctx)?;
        self.evaluator.evaluate(&identifier, &policy).await
    }

    /// Check a request for an already-known identifier.
    pub async fn check_identifier(
        &self,
        identifier: &Identifier,
        overrides: Option<&PolicyOverrides>,
    ) -> Result<Decision> {
        let policy = self.policy_for(overrides)?;
        self.evaluator.evaluate(identifier, &policy).await
    }

    /// Check a request and apply the failure policy if the store is down.
    ///
    /// Configuration and identifier errors are still returned as errors.
    pub async fn admit(
        &self,
        ctx: &RequestContext,
        overrides: Option<&PolicyOverrides>,
    ) -> Result<Admission> {
        self.apply_failure_policy(self.check(ctx, overrides).await)
    }

    /// [`admit`](Self::admit) for an already-known identifier.
    pub async fn admit_identifier(
        &self,
        identifier: &Identifier,
        overrides: Option<&PolicyOverrides>,
    ) -> Result<Admission> {
        self.apply_failure_policy(self.check_identifier(identifier, overrides).await)
    }

    fn apply_failure_policy(&self, result: Result<Decision>) -> Result<Admission> {
        match result {
            Ok(decision) => Ok(Admission::Decided(decision)),
            Err(error) if error.is_store_unavailable() => {
                let allowed = self.failure_policy == FailurePolicy::Open;
                warn!(
                    error = %error,
                    failure_policy = ?self.failure_policy,
                    allowed,
                    "Store unavailable, applying failure policy"
                );
                Ok(Admission::Degraded { allowed, error })
            }
            Err(error) => Err(error),
        }
    }

    /// Current usage for `identifier` over `window`, or the default window.
    pub async fn usage(&self, identifier: &Identifier, window: Option<Duration>) -> Result<Usage> {
        self.usage
            .usage(identifier, window.unwrap_or(self.defaults.window()))
            .await
    }

    /// Clear the window for `identifier`.
    pub async fn reset(&self, identifier: &Identifier) -> Result<()> {
        self.reset.reset(identifier).await
    }

    fn policy_for(&self, overrides: Option<&PolicyOverrides>) -> Result<LimitPolicy> {
        match overrides {
            Some(overrides) => overrides.apply(&self.defaults),
            None => Ok(self.defaults),
        }
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    defaults: LimitPolicy,
    strategy: IdentifierStrategy,
    failure_policy: FailurePolicy,
    key_prefix: String,
    timeout: Duration,
}

impl<S: EventStore> RateLimiterBuilder<S> {
    fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            defaults: LimitPolicy::default(),
            strategy: IdentifierStrategy::default(),
            failure_policy: FailurePolicy::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Default policy for calls without overrides.
    pub fn defaults(mut self, defaults: LimitPolicy) -> Self {
        self.defaults = defaults;
        self
    }

    /// Identifier derivation strategy.
    pub fn strategy(mut self, strategy: IdentifierStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Behaviour when the store is unavailable.
    pub fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Namespace for store keys.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bound on every store call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and build the limiter.
    pub fn build(self) -> Result<RateLimiter<S>> {
        self.defaults.validate_as_default()?;
        if self.timeout.is_zero() {
            return Err(QuotaError::Configuration(
                "store timeout must be positive".to_string(),
            ));
        }

        let client = StoreClient::new(self.store)
            .with_key_prefix(self.key_prefix)
            .with_timeout(self.timeout);

        Ok(RateLimiter::assemble(
            client,
            self.clock,
            self.defaults,
            self.strategy,
            self.failure_policy,
        ))
    }
}
