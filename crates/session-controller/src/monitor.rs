//! Audio level metering.
//!
//! A single sampling task reads the waveform of the local route and of
//! every participant route on a fixed interval, computes RMS levels,
//! and publishes them as signals. Metering is read-only: it never
//! creates or tears down routes except the one local tap it owns.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::instrument;

use crate::participants::ParticipantRegistry;
use crate::signal::Signal;
use crate::traits::{AudioRoot, AudioRoute};

/// Samples read per route per tick.
const WAVEFORM_WINDOW: usize = 1024;

/// Periodic RMS meter over the local and remote audio routes.
pub struct AudioMonitor {
    local_level: Signal<f32>,
    remote_level: Signal<f32>,
    token: CancellationToken,
    task: JoinHandle<()>,
    // Stops the sampler if the monitor is dropped without `close`.
    _cancel_guard: DropGuard,
}

impl AudioMonitor {
    /// Start metering. `local_root` is the capture-side audio graph
    /// root; remote routes come from the registry each tick.
    #[must_use]
    pub fn new(
        interval_ms: u64,
        local_root: Signal<Option<Arc<dyn AudioRoot>>>,
        registry: ParticipantRegistry,
    ) -> Self {
        let local_level = Signal::new(0.0f32);
        let remote_level = Signal::new(0.0f32);
        let token = CancellationToken::new();

        let task = tokio::spawn(run(
            interval_ms,
            local_root,
            registry,
            local_level.clone(),
            remote_level.clone(),
            token.clone(),
        ));

        Self {
            local_level,
            remote_level,
            _cancel_guard: token.clone().drop_guard(),
            token,
            task,
        }
    }

    /// Smoothed local microphone level in [0, 1].
    #[must_use]
    pub fn local_level(&self) -> Signal<f32> {
        self.local_level.clone()
    }

    /// Loudest remote participant level in [0, 1].
    #[must_use]
    pub fn remote_level(&self) -> Signal<f32> {
        self.remote_level.clone()
    }

    /// Stop the meter and release the local tap.
    pub async fn close(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

#[instrument(skip_all, name = "audio_monitor")]
async fn run(
    interval_ms: u64,
    local_root: Signal<Option<Arc<dyn AudioRoot>>>,
    registry: ParticipantRegistry,
    local_level: Signal<f32>,
    remote_level: Signal<f32>,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut root_rx = local_root.watch();
    let mut local_route: Option<Arc<dyn AudioRoute>> =
        root_rx.borrow_and_update().clone().map(|root| root.route());
    let mut buf = vec![0.0f32; WAVEFORM_WINDOW];

    loop {
        tokio::select! {
            () = token.cancelled() => {
                if let Some(route) = local_route.take() {
                    route.disconnect();
                }
                return;
            }
            changed = root_rx.changed() => {
                if changed.is_err() {
                    if let Some(route) = local_route.take() {
                        route.disconnect();
                    }
                    return;
                }
                if let Some(route) = local_route.take() {
                    route.disconnect();
                }
                local_route = root_rx.borrow_and_update().clone().map(|root| root.route());
            }
            _ = interval.tick() => {
                local_level.set(measure(local_route.as_deref(), &mut buf));

                let mut loudest = 0.0f32;
                for (level, route) in registry.metering() {
                    let value = measure(route.as_deref(), &mut buf);
                    level.set(value);
                    if value > loudest {
                        loudest = value;
                    }
                }
                remote_level.set(loudest);
            }
        }
    }
}

fn measure(route: Option<&dyn AudioRoute>, buf: &mut [f32]) -> f32 {
    match route {
        Some(route) => {
            let n = route.waveform(buf);
            rms(buf.get(..n).unwrap_or(&[]))
        }
        None => 0.0,
    }
}

/// Root-mean-square of a waveform window, clamped to [0, 1] and
/// rounded to three decimals so equal-level ticks compare equal.
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let value = mean.sqrt().clamp(0.0, 1.0);
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use sc_test_utils::{MockAudioRoot, MockRelay};
    use session_controller::diag::DiagLog;
    use session_controller::metrics::SessionMetrics;
    use session_controller::monitor::AudioMonitor;
    use session_controller::participants::ParticipantRegistry;
    use session_controller::path::BroadcastPath;
    use session_controller::signal::Signal;
    use session_controller::traits::{AudioRoot, RelayConnection};

    fn registry_with(relay: &Arc<MockRelay>) -> ParticipantRegistry {
        let conn: Arc<dyn RelayConnection> = relay.clone();
        ParticipantRegistry::new(
            Signal::new(Some(conn)),
            Signal::new(true),
            Signal::new(None),
            DiagLog::default(),
            SessionMetrics::new(),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let samples = vec![0.5f32; 1024];
        assert!((rms(&samples) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_empty_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_rounds_to_three_decimals() {
        let samples = vec![0.123_456f32; 64];
        assert!((rms(&samples) - 0.123).abs() < 1e-6);
    }

    #[test]
    fn test_rms_clamps_to_one() {
        let samples = vec![2.0f32; 64];
        assert_eq!(rms(&samples), 1.0);
    }

    #[tokio::test]
    async fn test_local_level_follows_capture_root() {
        let relay = MockRelay::new();
        let registry = registry_with(&relay);
        let local_root: Signal<Option<Arc<dyn AudioRoot>>> = Signal::new(None);
        let monitor = AudioMonitor::new(10, local_root.clone(), registry);

        settle().await;
        assert_eq!(monitor.local_level().get(), 0.0);

        let root = MockAudioRoot::standalone();
        root.set_waveform(vec![0.5; WAVEFORM_WINDOW]);
        local_root.replace(Some(root as Arc<dyn AudioRoot>));
        settle().await;
        assert!((monitor.local_level().get() - 0.5).abs() < 1e-6);

        monitor.close().await;
    }

    #[tokio::test]
    async fn test_remote_level_is_loudest_participant() {
        let relay = MockRelay::new();
        let registry = registry_with(&relay);
        let quiet = BroadcastPath::room_prefix("room1").join("quiet");
        let loud = BroadcastPath::room_prefix("room1").join("loud");
        registry.on_active(quiet.clone());
        registry.on_active(loud.clone());

        let quiet_root = relay.remote(&quiet).provide_audio_root();
        quiet_root.set_waveform(vec![0.2; WAVEFORM_WINDOW]);
        let loud_root = relay.remote(&loud).provide_audio_root();
        loud_root.set_waveform(vec![0.8; WAVEFORM_WINDOW]);

        let monitor = AudioMonitor::new(10, Signal::new(None), registry.clone());
        settle().await;

        assert!((monitor.remote_level().get() - 0.8).abs() < 1e-6);
        let snapshot = registry.snapshot();
        assert!((snapshot[0].audio_level - 0.2).abs() < 1e-6);
        assert!((snapshot[1].audio_level - 0.8).abs() < 1e-6);

        monitor.close().await;
    }

    #[tokio::test]
    async fn test_levels_drop_when_routes_go_away() {
        let relay = MockRelay::new();
        let registry = registry_with(&relay);
        let path = BroadcastPath::room_prefix("room1").join("xyz999");
        registry.on_active(path.clone());
        let root = relay.remote(&path).provide_audio_root();
        root.set_waveform(vec![0.6; WAVEFORM_WINDOW]);

        let monitor = AudioMonitor::new(10, Signal::new(None), registry.clone());
        settle().await;
        assert!(monitor.remote_level().get() > 0.0);

        registry.on_inactive(&path).await;
        settle().await;
        assert_eq!(monitor.remote_level().get(), 0.0);

        monitor.close().await;
    }

    #[tokio::test]
    async fn test_drop_without_close_stops_sampler() {
        let relay = MockRelay::new();
        let registry = registry_with(&relay);
        let root = MockAudioRoot::standalone();
        let local_root: Signal<Option<Arc<dyn AudioRoot>>> =
            Signal::new(Some(root.clone() as Arc<dyn AudioRoot>));

        let monitor = AudioMonitor::new(10, local_root, registry);
        settle().await;
        assert_eq!(root.routes_created(), 1);

        drop(monitor);
        settle().await;
        assert!(root.all_routes_disconnected());
    }

    #[tokio::test]
    async fn test_close_releases_local_tap() {
        let relay = MockRelay::new();
        let registry = registry_with(&relay);
        let root = MockAudioRoot::standalone();
        let local_root: Signal<Option<Arc<dyn AudioRoot>>> =
            Signal::new(Some(root.clone() as Arc<dyn AudioRoot>));

        let monitor = AudioMonitor::new(10, local_root, registry);
        settle().await;
        assert_eq!(root.routes_created(), 1);

        monitor.close().await;
        assert!(root.all_routes_disconnected());
    }
}
