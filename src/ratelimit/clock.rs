//! Wall-clock timestamps used to score window entries.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A wall-clock instant with microsecond resolution.
///
/// Stored as microseconds since the Unix epoch so that scores survive the
/// trip through the store without floating point rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Create a timestamp from microseconds since the Unix epoch.
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Create a timestamp from fractional seconds since the Unix epoch.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    /// Microseconds since the Unix epoch.
    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// Fractional seconds since the Unix epoch.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Whole seconds since the Unix epoch, rounded up.
    pub fn as_unix_secs_ceil(&self) -> i64 {
        self.0.div_euclid(1_000_000) + i64::from(self.0.rem_euclid(1_000_000) != 0)
    }

    /// This timestamp moved forward by `duration`.
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_micros(duration)))
    }

    /// This timestamp moved backward by `duration`.
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_micros(duration)))
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let delta = self.0.saturating_sub(earlier.0);
        if delta <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(delta as u64)
        }
    }

    /// Convert to a chrono UTC datetime.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_micros(self.0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_micros())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.as_secs_f64())
    }
}

fn duration_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Source of the current time for window evaluation.
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from(Utc::now())
    }
}

/// A manually advanced clock.
///
/// Clones share the same underlying time, so a test can hold one handle and
/// advance the clock seen by a limiter holding another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: Arc::new(AtomicI64::new(start.as_micros())),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.micros
            .fetch_add(duration_micros(duration), Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, at: Timestamp) {
        self.micros.store(at.as_micros(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_secs_f64(100.5);
        assert_eq!(t.as_micros(), 100_500_000);
        assert_eq!(t.saturating_add(Duration::from_millis(500)).as_secs_f64(), 101.0);
        assert_eq!(t.saturating_sub(Duration::from_secs(1)).as_micros(), 99_500_000);
    }

    #[test]
    fn test_duration_since_never_negative() {
        let early = Timestamp::from_micros(1_000);
        let late = Timestamp::from_micros(3_500);
        assert_eq!(late.duration_since(early), Duration::from_micros(2_500));
        assert_eq!(early.duration_since(late), Duration::ZERO);
    }

    #[test]
    fn test_unix_secs_rounds_up() {
        assert_eq!(Timestamp::from_secs_f64(10.0).as_unix_secs_ceil(), 10);
        assert_eq!(Timestamp::from_secs_f64(10.000001).as_unix_secs_ceil(), 11);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(Timestamp::from_secs_f64(50.0));
        let handle = clock.clone();

        handle.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Timestamp::from_secs_f64(51.5));

        handle.set(Timestamp::EPOCH);
        assert_eq!(clock.now(), Timestamp::EPOCH);
    }

    #[test]
    fn test_system_clock_matches_chrono() {
        let before = Utc::now().timestamp_micros();
        let now = SystemClock.now().as_micros();
        let after = Utc::now().timestamp_micros();
        assert!(before <= now && now <= after);
    }
}
