//! Limit policies and per-call overrides.

use std::time::Duration;

use crate::error::{QuotaError, Result};

/// Default maximum requests per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 100;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// The quota being enforced: at most `max_requests` in any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    max_requests: u64,
    window: Duration,
}

impl LimitPolicy {
    /// Create a policy.
    ///
    /// `max_requests == 0` is accepted and denies every request. A zero
    /// window is a configuration error.
    pub fn new(max_requests: u64, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(QuotaError::Configuration(
                "window must be positive".to_string(),
            ));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    /// Create a policy from a window expressed in fractional seconds.
    pub fn from_secs_f64(max_requests: u64, window_seconds: f64) -> Result<Self> {
        Self::new(max_requests, window_from_secs(window_seconds)?)
    }

    /// Maximum requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Store expiry for a record under this policy, in whole milliseconds.
    pub fn ttl_millis(&self) -> u64 {
        let micros = self.window.as_micros();
        u64::try_from(micros.div_ceil(1_000)).unwrap_or(u64::MAX).max(1)
    }

    /// Reject policies unusable as a service-wide default.
    pub fn validate_as_default(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(QuotaError::Configuration(
                "default max_requests must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Convert fractional seconds to a window duration.
pub fn window_from_secs(window_seconds: f64) -> Result<Duration> {
    if !window_seconds.is_finite() || window_seconds <= 0.0 {
        return Err(QuotaError::Configuration(format!(
            "window_seconds must be a positive number, got {}",
            window_seconds
        )));
    }
    Duration::try_from_secs_f64(window_seconds)
        .map_err(|e| QuotaError::Configuration(format!("invalid window_seconds: {}", e)))
}

/// Per-call overrides of the limiter's default policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    /// Replace the default request limit
    pub max_requests: Option<u64>,
    /// Replace the default window
    pub window: Option<Duration>,
}

impl PolicyOverrides {
    /// Override only the request limit.
    pub fn max_requests(max_requests: u64) -> Self {
        Self {
            max_requests: Some(max_requests),
            window: None,
        }
    }

    /// Override only the window.
    pub fn window(window: Duration) -> Self {
        Self {
            max_requests: None,
            window: Some(window),
        }
    }

    /// Apply the overrides on top of `base`, validating the result.
    pub fn apply(&self, base: &LimitPolicy) -> Result<LimitPolicy> {
        LimitPolicy::new(
            self.max_requests.unwrap_or(base.max_requests),
            self.window.unwrap_or(base.window),
        )
    }
}
