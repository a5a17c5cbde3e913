//! Clock abstraction (injectable for testing)

use chrono::{DateTime, Utc};

/// Provides the current wall-clock time.
///
/// TTL expiry, heartbeat renewal, and the janitor's staleness checks
/// all read time through this trait so they can be driven
/// deterministically in tests.
pub trait Clock: Send + Sync {
    /// Current time as a UTC timestamp.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64 {
        self.now().timestamp_millis().max(0) as u64
    }

    /// Current time as seconds since the Unix epoch.
    fn now_unix(&self) -> i64 {
        self.now().timestamp()
    }
}

/// The default [`Clock`] implementation backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
