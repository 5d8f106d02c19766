//! Sliding-window rate limiting over a shared event store.

mod backend;
mod clock;
mod decision;
mod evaluator;
mod identifier;
mod limiter;
mod memory;
mod policy;
mod redis_store;
mod reset;
mod usage;

pub use backend::{
    AdmitOutcome, AdmitRequest, EventStore, StoreClient, WindowSnapshot, DEFAULT_KEY_PREFIX,
    DEFAULT_STORE_TIMEOUT,
};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use decision::{
    Decision, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
pub use evaluator::WindowEvaluator;
pub use identifier::{
    Identifier, IdentifierFn, IdentifierStrategy, RequestContext, MAX_IDENTIFIER_LEN,
};
pub use limiter::{Admission, FailurePolicy, RateLimiter, RateLimiterBuilder};
pub use memory::InMemoryEventStore;
pub use policy::{
    window_from_secs, LimitPolicy, PolicyOverrides, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW,
};
pub use redis_store::{sanitize_url, RedisEventStore};
pub use reset::ResetController;
pub use usage::{Usage, UsageReporter};
