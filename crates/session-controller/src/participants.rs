//! Remote participant subscriptions.
//!
//! One entry per tracked remote broadcast, created on an activation
//! update and torn down on deactivation in a fixed order: audio route,
//! audio decoder, audio source, video decoder, video source, broadcast
//! handle. Subscription is all-or-nothing; if no connection is live
//! when an activation arrives, no partial entry is created.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::diag::DiagLog;
use crate::effect::EffectScope;
use crate::errors::SessionError;
use crate::metrics::SessionMetrics;
use crate::path::BroadcastPath;
use crate::signal::Signal;
use crate::traits::{AudioRoute, RelayConnection, SubscriptionParts, VideoFrame};

/// Point-in-time view of one tracked participant.
#[derive(Clone, Debug)]
pub struct ParticipantSnapshot {
    /// Broadcast path of the participant.
    pub path: BroadcastPath,
    /// Most recent smoothed audio level in [0, 1].
    pub audio_level: f32,
    /// Latest decoded video frame, if any.
    pub video_frame: Option<VideoFrame>,
}

struct ParticipantEntry {
    path: BroadcastPath,
    parts: SubscriptionParts,
    routing: EffectScope,
    route: Signal<Option<Arc<dyn AudioRoute>>>,
    level: Signal<f32>,
}

struct RegistryInner {
    established: Signal<Option<Arc<dyn RelayConnection>>>,
    speaker_enabled: Signal<bool>,
    local_path: Signal<Option<BroadcastPath>>,
    entries: RwLock<Vec<ParticipantEntry>>,
    accepting: AtomicBool,
    diag: DiagLog,
    metrics: Arc<SessionMetrics>,
}

/// Tracks one subscription per active remote participant.
#[derive(Clone)]
pub struct ParticipantRegistry {
    inner: Arc<RegistryInner>,
}

impl ParticipantRegistry {
    /// Create an empty registry. Starts accepting activations.
    #[must_use]
    pub fn new(
        established: Signal<Option<Arc<dyn RelayConnection>>>,
        speaker_enabled: Signal<bool>,
        local_path: Signal<Option<BroadcastPath>>,
        diag: DiagLog,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                established,
                speaker_enabled,
                local_path,
                entries: RwLock::new(Vec::new()),
                accepting: AtomicBool::new(true),
                diag,
                metrics,
            }),
        }
    }

    /// Gate activations. While not accepting, `on_active` is a no-op;
    /// closes the window where a late announce could resubscribe a
    /// participant mid-teardown.
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Subscribe to a newly active remote broadcast. Idempotent for
    /// already-tracked paths.
    pub fn on_active(&self, path: BroadcastPath) {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::SeqCst) {
            debug!(target: "sc.participant", path = %path, "not accepting, ignoring activation");
            return;
        }
        if inner.local_path.get().as_ref() == Some(&path) {
            debug!(target: "sc.participant", path = %path, "ignoring local broadcast");
            return;
        }
        if inner.entries.read().iter().any(|e| e.path == path) {
            debug!(target: "sc.participant", path = %path, "already tracked");
            return;
        }
        let Some(conn) = inner.established.get() else {
            let e = SessionError::Discovery(format!("activation for {path} with no connection"));
            inner.diag.record(e.diag_tag(), e.to_string());
            warn!(target: "sc.participant", path = %path, "activation with no connection");
            return;
        };

        let parts = conn.subscribe(&path);
        parts.video.set_enabled(true);
        parts.audio.set_enabled(true);

        let route: Signal<Option<Arc<dyn AudioRoute>>> = Signal::new(None);
        let level = Signal::new(0.0f32);
        let mut routing = EffectScope::new();

        {
            let root_sig = parts.audio.audio_root();
            let route_sig = route.clone();
            let diag = inner.diag.clone();
            let short = path.short().to_string();
            routing.effect(move |ctx| {
                let Some(root) = ctx.get(&root_sig) else {
                    return;
                };
                let wired = root.route();
                route_sig.replace(Some(Arc::clone(&wired)));
                diag.record("audio", format!("audio route wired for ...{short}"));

                let route_sig = route_sig.clone();
                ctx.on_cleanup(move || {
                    wired.disconnect();
                    route_sig.replace(None);
                });
            });
        }

        {
            let speaker = inner.speaker_enabled.clone();
            let route_sig = route.clone();
            let diag = inner.diag.clone();
            let short = path.short().to_string();
            routing.effect(move |ctx| {
                let speaker_on = ctx.get(&speaker);
                let Some(wired) = ctx.get(&route_sig) else {
                    return;
                };
                let gain = if speaker_on { 1.0 } else { 0.0 };
                wired.set_gain(gain);
                diag.record("audio", format!("gain {gain} for ...{short}"));
            });
        }

        {
            let bytes = parts.audio.bytes_received();
            let diag = inner.diag.clone();
            let short = path.short().to_string();
            let mut last_logged: u64 = 0;
            routing.effect(move |ctx| {
                let total = ctx.get(&bytes);
                if total == 0 {
                    return;
                }
                // Rate-limit to one entry per 1024 received bytes.
                if last_logged == 0 || total >= last_logged + 1024 {
                    last_logged = total;
                    diag.record("audio", format!("...{short}: {total} audio bytes received"));
                }
            });
        }

        info!(target: "sc.participant", path = %path, "subscribed");
        inner
            .diag
            .record("sub", format!("subscribed to ...{}", path.short()));
        inner.metrics.participant_joined();

        inner.entries.write().push(ParticipantEntry {
            path,
            parts,
            routing,
            route,
            level,
        });
    }

    /// Tear down the subscription for a deactivated broadcast. No-op
    /// for untracked paths.
    pub async fn on_inactive(&self, path: &BroadcastPath) {
        let entry = {
            let mut entries = self.inner.entries.write();
            entries
                .iter()
                .position(|e| e.path == *path)
                .map(|i| entries.remove(i))
        };
        let Some(entry) = entry else {
            debug!(target: "sc.participant", path = %path, "deactivation for untracked path");
            return;
        };

        self.dispose(entry).await;
        info!(target: "sc.participant", path = %path, "unsubscribed");
        self.inner
            .diag
            .record("sub", format!("unsubscribed from ...{}", path.short()));
        self.inner.metrics.participant_left();
    }

    /// Tear down every tracked participant in registration order.
    pub async fn teardown_all(&self) {
        let entries: Vec<ParticipantEntry> = {
            let mut guard = self.inner.entries.write();
            guard.drain(..).collect()
        };
        for entry in entries {
            let path = entry.path.clone();
            self.dispose(entry).await;
            self.inner.metrics.participant_left();
            debug!(target: "sc.participant", path = %path, "torn down");
        }
    }

    // Fixed teardown order; the routing scope disconnects the audio
    // route before any pipeline is closed.
    async fn dispose(&self, entry: ParticipantEntry) {
        entry.routing.close().await;
        entry.parts.audio.close();
        entry.parts.audio_source.close();
        entry.parts.video.close();
        entry.parts.video_source.close();
        entry.parts.broadcast.close();
    }

    /// Whether `path` is currently tracked.
    #[must_use]
    pub fn contains(&self, path: &BroadcastPath) -> bool {
        self.inner.entries.read().iter().any(|e| e.path == *path)
    }

    /// Number of tracked participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Whether no participants are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Tracked paths in registration order.
    #[must_use]
    pub fn paths(&self) -> Vec<BroadcastPath> {
        self.inner.entries.read().iter().map(|e| e.path.clone()).collect()
    }

    /// Snapshot of every participant in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ParticipantSnapshot> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|e| ParticipantSnapshot {
                path: e.path.clone(),
                audio_level: e.level.get(),
                video_frame: e.parts.video.frame().get(),
            })
            .collect()
    }

    /// Per-participant level signals and current routes, for the audio
    /// monitor.
    #[must_use]
    pub(crate) fn metering(&self) -> Vec<(Signal<f32>, Option<Arc<dyn AudioRoute>>)> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|e| (e.level.clone(), e.route.get()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use sc_test_utils::MockRelay;
    use session_controller::diag::DiagLog;
    use session_controller::metrics::SessionMetrics;
    use session_controller::participants::ParticipantRegistry;
    use session_controller::path::BroadcastPath;
    use session_controller::signal::Signal;
    use session_controller::traits::RelayConnection;
    use std::time::Duration;

    struct Fixture {
        relay: Arc<MockRelay>,
        speaker: Signal<bool>,
        local_path: Signal<Option<BroadcastPath>>,
        diag: DiagLog,
        registry: ParticipantRegistry,
    }

    fn fixture() -> Fixture {
        let relay = MockRelay::new();
        let conn: Arc<dyn RelayConnection> = relay.clone();
        let established: Signal<Option<Arc<dyn RelayConnection>>> = Signal::new(Some(conn));
        let speaker = Signal::new(true);
        let local_path: Signal<Option<BroadcastPath>> = Signal::new(None);
        let diag = DiagLog::default();
        let registry = ParticipantRegistry::new(
            established,
            speaker.clone(),
            local_path.clone(),
            diag.clone(),
            SessionMetrics::new(),
        );
        Fixture {
            relay,
            speaker,
            local_path,
            diag,
            registry,
        }
    }

    fn remote(id: &str) -> BroadcastPath {
        BroadcastPath::room_prefix("room1").join(id)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_on_active_subscribes_and_enables_pipelines() {
        let fx = fixture();
        fx.registry.on_active(remote("xyz999"));

        assert_eq!(fx.registry.len(), 1);
        assert!(fx.registry.contains(&remote("xyz999")));
        let controls = fx.relay.remote(&remote("xyz999"));
        assert!(controls.audio_enabled());
        assert!(controls.video_enabled());
    }

    #[tokio::test]
    async fn test_on_active_is_idempotent() {
        let fx = fixture();
        fx.registry.on_active(remote("xyz999"));
        fx.registry.on_active(remote("xyz999"));

        assert_eq!(fx.registry.len(), 1);
        assert_eq!(fx.relay.subscription_count(&remote("xyz999")), 1);
    }

    #[tokio::test]
    async fn test_on_active_skips_local_path() {
        let fx = fixture();
        fx.local_path.set(Some(remote("abc123")));
        fx.registry.on_active(remote("abc123"));

        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_on_active_without_connection_creates_nothing() {
        let relay = MockRelay::new();
        let _ = relay;
        let established: Signal<Option<Arc<dyn RelayConnection>>> = Signal::new(None);
        let registry = ParticipantRegistry::new(
            established,
            Signal::new(true),
            Signal::new(None),
            DiagLog::default(),
            SessionMetrics::new(),
        );

        registry.on_active(remote("xyz999"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_on_active_ignored_while_not_accepting() {
        let fx = fixture();
        fx.registry.set_accepting(false);
        fx.registry.on_active(remote("xyz999"));
        assert!(fx.registry.is_empty());

        fx.registry.set_accepting(true);
        fx.registry.on_active(remote("xyz999"));
        assert_eq!(fx.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_on_inactive_removes_and_closes_in_order() {
        let fx = fixture();
        let path = remote("xyz999");
        fx.registry.on_active(path.clone());
        fx.relay.remote(&path).provide_audio_root();
        settle().await;

        fx.registry.on_inactive(&path).await;
        assert!(fx.registry.is_empty());

        let events = fx.relay.teardown_events();
        let expected: Vec<String> = [
            "route",
            "audio",
            "audio_source",
            "video",
            "video_source",
            "broadcast",
        ]
        .iter()
        .map(|kind| format!("{kind}:{path}"))
        .collect();
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn test_on_inactive_untracked_is_noop() {
        let fx = fixture();
        fx.registry.on_inactive(&remote("ghost")).await;
        assert!(fx.registry.is_empty());
        assert!(fx.relay.teardown_events().is_empty());
    }

    #[tokio::test]
    async fn test_speaker_toggle_drives_gain_without_rewiring() {
        let fx = fixture();
        let path = remote("xyz999");
        fx.registry.on_active(path.clone());
        let controls = fx.relay.remote(&path);
        controls.provide_audio_root();
        settle().await;

        assert_eq!(controls.gains(), vec![1.0]);

        fx.speaker.set(false);
        settle().await;
        assert_eq!(controls.gains(), vec![1.0, 0.0]);

        fx.speaker.set(true);
        settle().await;
        assert_eq!(controls.gains(), vec![1.0, 0.0, 1.0]);
        assert_eq!(controls.routes_created(), 1);
    }

    #[tokio::test]
    async fn test_byte_diagnostics_are_rate_limited() {
        let fx = fixture();
        let path = remote("xyz999");
        fx.registry.on_active(path.clone());
        let controls = fx.relay.remote(&path);
        settle().await;

        let byte_entries = |diag: &DiagLog| {
            diag.snapshot()
                .into_iter()
                .filter(|e| e.message.contains("audio bytes received"))
                .count()
        };

        controls.set_bytes_received(10);
        settle().await;
        assert_eq!(byte_entries(&fx.diag), 1);

        // Under the 1024-byte increment, no new entry
        controls.set_bytes_received(600);
        settle().await;
        assert_eq!(byte_entries(&fx.diag), 1);

        controls.set_bytes_received(1200);
        settle().await;
        assert_eq!(byte_entries(&fx.diag), 2);
    }

    #[tokio::test]
    async fn test_teardown_all_drains_everything() {
        let fx = fixture();
        fx.registry.on_active(remote("aaa111"));
        fx.registry.on_active(remote("bbb222"));
        settle().await;

        fx.registry.teardown_all().await;
        assert!(fx.registry.is_empty());

        let events = fx.relay.teardown_events();
        // Two full teardown sequences, first registered first.
        assert_eq!(events.len(), 10);
        assert!(events[0].ends_with(&remote("aaa111").to_string()));
        assert!(events[5].ends_with(&remote("bbb222").to_string()));
    }

    #[tokio::test]
    async fn test_snapshot_reports_paths_in_order() {
        let fx = fixture();
        fx.registry.on_active(remote("aaa111"));
        fx.registry.on_active(remote("bbb222"));

        let snapshot = fx.registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].path, remote("aaa111"));
        assert_eq!(snapshot[1].path, remote("bbb222"));
        assert_eq!(snapshot[0].audio_level, 0.0);
    }
}
