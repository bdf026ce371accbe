//! Bounded diagnostic log.
//!
//! A newest-first sequence of tagged messages capped at a fixed number
//! of entries, mirrored to `tracing`. Purely observational; never
//! load-bearing for correctness.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Default number of retained entries.
pub const DEFAULT_DIAG_CAPACITY: usize = 50;

/// One diagnostic entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagEvent {
    /// Wall-clock time of the event.
    pub at: DateTime<Utc>,
    /// Milliseconds since the log was created.
    pub elapsed_ms: u64,
    /// Subsystem tag (`conn`, `track`, `announced`, `sub`, `audio`, ...).
    pub tag: &'static str,
    /// Human-readable message.
    pub message: String,
}

struct DiagInner {
    started: Instant,
    capacity: usize,
    entries: Mutex<VecDeque<DiagEvent>>,
}

/// Shared handle to the diagnostic log.
#[derive(Clone)]
pub struct DiagLog {
    inner: Arc<DiagInner>,
}

impl Default for DiagLog {
    fn default() -> Self {
        Self::new(DEFAULT_DIAG_CAPACITY)
    }
}

impl DiagLog {
    /// Create a log retaining the `capacity` most recent entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DiagInner {
                started: Instant::now(),
                capacity,
                entries: Mutex::new(VecDeque::with_capacity(capacity)),
            }),
        }
    }

    /// Append an entry, dropping the oldest past capacity.
    pub fn record(&self, tag: &'static str, message: impl Into<String>) {
        let message = message.into();
        let elapsed_ms = u64::try_from(self.inner.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(target: "sc.diag", tag, elapsed_ms, "{message}");

        let event = DiagEvent {
            at: Utc::now(),
            elapsed_ms,
            tag,
            message,
        };

        let mut entries = self.inner.entries.lock();
        entries.push_front(event);
        entries.truncate(self.inner.capacity);
    }

    /// Snapshot of entries, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DiagEvent> {
        self.inner.entries.lock().iter().cloned().collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot_newest_first() {
        let log = DiagLog::new(10);
        log.record("conn", "first");
        log.record("track", "second");

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "second");
        assert_eq!(entries[0].tag, "track");
        assert_eq!(entries[1].message, "first");
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = DiagLog::new(3);
        for i in 0..5 {
            log.record("conn", format!("msg {i}"));
        }

        let entries = log.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "msg 4");
        assert_eq!(entries[2].message, "msg 2");
    }

    #[test]
    fn test_default_capacity_is_fifty() {
        let log = DiagLog::default();
        for i in 0..60 {
            log.record("conn", format!("msg {i}"));
        }
        assert_eq!(log.len(), 50);
    }

    #[test]
    fn test_empty_log() {
        let log = DiagLog::new(5);
        assert!(log.is_empty());
        assert_eq!(log.snapshot(), Vec::new());
    }
}
