//! Session metrics.
//!
//! Counters and gauges are emitted through the `metrics` facade with
//! the `sc_` prefix; an atomic snapshot type backs synchronous reads
//! (UI polling, tests) without going through a recorder.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Currently tracked remote participants.
    pub active_participants: usize,
    /// Total participants ever subscribed.
    pub participants_joined: u64,
    /// Total participants torn down.
    pub participants_left: u64,
    /// Total announce-feed events processed (after self-filtering).
    pub announce_events: u64,
    /// Total sessions joined.
    pub sessions_joined: u64,
}

/// Shared session metrics.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    active_participants: AtomicUsize,
    participants_joined: AtomicU64,
    participants_left: AtomicU64,
    announce_events: AtomicU64,
    sessions_joined: AtomicU64,
}

impl SessionMetrics {
    /// Create shared metrics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a participant subscription.
    pub fn participant_joined(&self) {
        self.participants_joined.fetch_add(1, Ordering::Relaxed);
        let active = self.active_participants.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("sc_participants_joined_total").increment(1);
        gauge!("sc_active_participants").set(usize_to_f64(active));
    }

    /// Record a participant teardown.
    pub fn participant_left(&self) {
        self.participants_left.fetch_add(1, Ordering::Relaxed);
        let active = self
            .active_participants
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            })
            .unwrap_or(0)
            .saturating_sub(1);
        counter!("sc_participants_left_total").increment(1);
        gauge!("sc_active_participants").set(usize_to_f64(active));
    }

    /// Record one announce-feed event.
    pub fn announce_event(&self) {
        self.announce_events.fetch_add(1, Ordering::Relaxed);
        counter!("sc_announce_events_total").increment(1);
    }

    /// Record a session join.
    pub fn session_joined(&self) {
        self.sessions_joined.fetch_add(1, Ordering::Relaxed);
        counter!("sc_sessions_joined_total").increment(1);
    }

    /// Current number of tracked participants.
    #[must_use]
    pub fn active_participants(&self) -> usize {
        self.active_participants.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_participants: self.active_participants.load(Ordering::Relaxed),
            participants_joined: self.participants_joined.load(Ordering::Relaxed),
            participants_left: self.participants_left.load(Ordering::Relaxed),
            announce_events: self.announce_events.load(Ordering::Relaxed),
            sessions_joined: self.sessions_joined.load(Ordering::Relaxed),
        }
    }
}

#[allow(clippy::cast_precision_loss)] // participant counts are far below 2^52
fn usize_to_f64(v: usize) -> f64 {
    v as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_counts() {
        let metrics = SessionMetrics::new();
        metrics.participant_joined();
        metrics.participant_joined();
        metrics.participant_left();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_participants, 1);
        assert_eq!(snapshot.participants_joined, 2);
        assert_eq!(snapshot.participants_left, 1);
    }

    #[test]
    fn test_participant_left_saturates_at_zero() {
        let metrics = SessionMetrics::new();
        metrics.participant_left();
        assert_eq!(metrics.active_participants(), 0);
    }

    #[test]
    fn test_announce_and_session_counters() {
        let metrics = SessionMetrics::new();
        metrics.announce_event();
        metrics.announce_event();
        metrics.session_joined();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.announce_events, 2);
        assert_eq!(snapshot.sessions_joined, 1);
    }
}
