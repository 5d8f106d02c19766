//! Admission decisions and their conventional header rendering.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::clock::Timestamp;

/// Header carrying the request limit.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Header carrying the remaining quota.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Header carrying the reset time as unix seconds.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Header carrying the retry delay in seconds.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// The outcome of evaluating one request against its window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// The request limit that was enforced
    pub limit: u64,
    /// Requests still admissible in the current window
    pub remaining: u64,
    /// When the oldest entry in the window expires
    pub reset_at: Timestamp,
    /// How long a denied caller should wait; `None` when admitted
    pub retry_after: Option<Duration>,
}

impl Decision {
    /// `reset_at` as a UTC datetime.
    pub fn reset_at_datetime(&self) -> DateTime<Utc> {
        self.reset_at.to_datetime()
    }

    /// Retry delay rounded up to whole seconds, if denied.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }

    /// Header name/value pairs conveying this decision.
    ///
    /// `Retry-After` is only present on denial.
    pub fn rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_at.as_unix_secs_ceil().to_string()),
        ];
        if let Some(secs) = self.retry_after_secs() {
            headers.push((HEADER_RETRY_AFTER, secs.to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admitted_headers() {
        let decision = Decision {
            allowed: true,
            limit: 10,
            remaining: 7,
            reset_at: Timestamp::from_secs_f64(1_700_000_060.25),
            retry_after: None,
        };

        let headers = decision.rate_limit_headers();
        assert_eq!(
            headers,
            vec![
                (HEADER_LIMIT, "10".to_string()),
                (HEADER_REMAINING, "7".to_string()),
                (HEADER_RESET, "1700000061".to_string()),
            ]
        );
    }

    #[test]
    fn test_denied_headers_include_retry_after() {
        let decision = Decision {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: Timestamp::from_secs_f64(60.0),
            retry_after: Some(Duration::from_millis(58_200)),
        };

        assert_eq!(decision.retry_after_secs(), Some(59));
        let headers = decision.rate_limit_headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3], (HEADER_RETRY_AFTER, "59".to_string()));
    }
}
