//! LLM debug capture
//!
//! When `GOMIND_LLM_DEBUG_ENABLED` is set, every oracle prompt/response
//! pair is kept in a bounded in-memory side store so failed planning or
//! resolution episodes can be inspected after the fact. Successful and
//! failed calls carry separate TTLs (`GOMIND_LLM_DEBUG_TTL` /
//! `GOMIND_LLM_DEBUG_ERROR_TTL`); expired entries are dropped lazily on
//! read and on insert.

use capstan_kernel::clock::Clock;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One captured oracle exchange.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedCall {
    /// Which component issued the call (`planner`, `resolver`, ...).
    pub component: String,
    /// The full prompt as sent.
    pub prompt: String,
    /// The completion content, or the error display on failure.
    pub response: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Capture instant, epoch milliseconds.
    pub captured_at_ms: u64,
}

/// Bounded TTL store of captured oracle calls.
pub struct LlmDebugCapture {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    error_ttl: Duration,
    max_entries: usize,
    entries: Mutex<VecDeque<CapturedCall>>,
}

impl LlmDebugCapture {
    /// Create a capture store with the configured TTLs.
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, error_ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            error_ttl,
            max_entries: 256,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Override the entry bound.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Record one exchange.
    pub fn record(
        &self,
        component: &str,
        prompt: &str,
        response: &str,
        success: bool,
    ) {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        Self::evict(&mut entries, now, self.ttl, self.error_ttl);
        if entries.len() == self.max_entries {
            entries.pop_front();
        }
        entries.push_back(CapturedCall {
            component: component.to_string(),
            prompt: prompt.to_string(),
            response: response.to_string(),
            success,
            captured_at_ms: now,
        });
    }

    /// Snapshot of live (unexpired) captures, oldest first.
    pub fn snapshot(&self) -> Vec<CapturedCall> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        Self::evict(&mut entries, now, self.ttl, self.error_ttl);
        entries.iter().cloned().collect()
    }

    fn evict(entries: &mut VecDeque<CapturedCall>, now: u64, ttl: Duration, error_ttl: Duration) {
        entries.retain(|call| {
            let limit = if call.success { ttl } else { error_ttl };
            now.saturating_sub(call.captured_at_ms) < limit.as_millis() as u64
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct TestClock(AtomicU64);

    impl TestClock {
        fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.0.load(Ordering::SeqCst) as i64).unwrap()
        }
    }

    #[test]
    fn success_and_error_ttls_differ() {
        let clock = Arc::new(TestClock(AtomicU64::new(1_000_000)));
        let capture = LlmDebugCapture::new(
            clock.clone(),
            Duration::from_secs(10),
            Duration::from_secs(100),
        );
        capture.record("planner", "p1", "ok", true);
        capture.record("planner", "p2", "boom", false);

        clock.advance(50_000);
        let live = capture.snapshot();
        assert_eq!(live.len(), 1);
        assert!(!live[0].success);

        clock.advance(60_000);
        assert!(capture.snapshot().is_empty());
    }

    #[test]
    fn capacity_bound_evicts_oldest() {
        let clock = Arc::new(TestClock(AtomicU64::new(0)));
        let capture = LlmDebugCapture::new(
            clock,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        )
        .with_max_entries(2);
        capture.record("resolver", "a", "1", true);
        capture.record("resolver", "b", "2", true);
        capture.record("resolver", "c", "3", true);
        let live = capture.snapshot();
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].prompt, "b");
    }
}
