//! Session lifecycle.
//!
//! `Session` is the single entry point: join a room, toggle tracks,
//! observe participants and levels, leave. It owns the connection
//! manager, local publisher, discovery listener, participant registry,
//! and audio monitor, and wires the announce feed into the registry
//! through one ordered event pump so activations and deactivations are
//! applied in feed order.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, instrument, warn};
use url::Url;

use crate::announce::AnnounceListener;
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::diag::{DiagEvent, DiagLog};
use crate::errors::SessionError;
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::monitor::AudioMonitor;
use crate::participants::{ParticipantRegistry, ParticipantSnapshot};
use crate::path::BroadcastPath;
use crate::publisher::LocalPublisher;
use crate::signal::Signal;
use crate::traits::{AnnounceUpdate, MediaCapture, Transport};

/// Buffered announce updates between the listener and the pump.
const ANNOUNCE_CHANNEL_BUFFER: usize = 256;

/// High-level session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not in a room.
    Left,
    /// Join in progress.
    Joining,
    /// In a room.
    Joined,
}

/// Parameters of the current join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinConfig {
    /// Resolved relay address: the relay URL with the room prefix
    /// appended.
    pub relay_url: Url,
    /// Room name.
    pub room: String,
}

/// A multi-party media session.
pub struct Session {
    state: Signal<SessionState>,
    join_config: Signal<Option<JoinConfig>>,
    participant_id: String,
    speaker_enabled: Signal<bool>,
    connection: ConnectionManager,
    publisher: LocalPublisher,
    announce: AnnounceListener,
    registry: ParticipantRegistry,
    monitor: AudioMonitor,
    pump_token: CancellationToken,
    pump_task: JoinHandle<()>,
    // Cancels the pump if the session is dropped without `close`.
    _pump_guard: DropGuard,
    diag: DiagLog,
    metrics: Arc<SessionMetrics>,
}

impl Session {
    /// Create a session over `transport` and `capture`. The session
    /// starts in [`SessionState::Left`] with microphone, camera, and
    /// speaker output all off; devices are only acquired when a track
    /// is toggled on.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        capture: Arc<dyn MediaCapture>,
        config: Config,
    ) -> Self {
        let diag = DiagLog::new(config.diag_capacity);
        let metrics = SessionMetrics::new();
        let speaker_enabled = Signal::new(false);

        let connection = ConnectionManager::new(transport, diag.clone());
        let publisher = LocalPublisher::new(
            connection.established(),
            capture,
            config.display_name.clone(),
            diag.clone(),
        );
        let registry = ParticipantRegistry::new(
            connection.established(),
            speaker_enabled.clone(),
            publisher.path(),
            diag.clone(),
            Arc::clone(&metrics),
        );

        let (events_tx, events_rx) = mpsc::channel(ANNOUNCE_CHANNEL_BUFFER);
        let announce = AnnounceListener::new(
            connection.established(),
            publisher.path(),
            events_tx,
            diag.clone(),
            Arc::clone(&metrics),
        );

        let monitor = AudioMonitor::new(
            config.monitor_interval_ms,
            publisher.audio_root(),
            registry.clone(),
        );

        let pump_token = CancellationToken::new();
        let pump_task = tokio::spawn(pump(events_rx, registry.clone(), pump_token.clone()));

        Self {
            state: Signal::new(SessionState::Left),
            join_config: Signal::new(None),
            participant_id: config.participant_id,
            speaker_enabled,
            connection,
            publisher,
            announce,
            registry,
            monitor,
            _pump_guard: pump_token.clone().drop_guard(),
            pump_token,
            pump_task,
            diag,
            metrics,
        }
    }

    /// Join a room. If already joined, leaves the current room first.
    ///
    /// The transport dials the relay at the room prefix, not at the
    /// bare relay URL. Validation failures leave every component
    /// untouched.
    pub async fn join(&mut self, relay: &str, room: &str) -> Result<(), SessionError> {
        let relay = relay.trim();
        let room = room.trim();
        if relay.is_empty() {
            let e = SessionError::Validation("relay URL must not be empty".to_string());
            self.diag.record(e.diag_tag(), e.to_string());
            return Err(e);
        }
        if room.is_empty() {
            let e = SessionError::Validation("room must not be empty".to_string());
            self.diag.record(e.diag_tag(), e.to_string());
            return Err(e);
        }
        let prefix = BroadcastPath::room_prefix(room);
        let address = resolve_relay_url(relay, &prefix).map_err(|e| {
            self.diag.record(e.diag_tag(), e.to_string());
            e
        })?;

        if self.state.get() == SessionState::Joined {
            self.leave().await;
        }
        self.state.set(SessionState::Joining);

        let local_path = prefix.join(&self.participant_id);
        info!(target: "sc.session", room, address = %address, path = %local_path, "joining");

        self.join_config.set(Some(JoinConfig {
            relay_url: address.clone(),
            room: room.to_string(),
        }));
        self.registry.set_accepting(true);
        self.connection.set_address(Some(address));
        self.connection.set_enabled(true);
        self.publisher.set_path(Some(local_path));
        self.publisher.set_enabled(true);
        self.diag.record("conn", "connection + broadcast enabled");

        self.state.set(SessionState::Joined);
        self.metrics.session_joined();
        self.announce.start(prefix).await;
        Ok(())
    }

    /// Leave the current room. Idempotent; safe when never joined.
    ///
    /// Teardown is the exact reverse of join: discovery stops first so
    /// no new activations arrive, then publishing and the connection
    /// come down, then every remote subscription is drained.
    #[instrument(skip_all, name = "session_leave")]
    pub async fn leave(&mut self) {
        let was_joined = self.state.get() != SessionState::Left;

        self.announce.stop().await;
        self.registry.set_accepting(false);
        self.publisher.set_audio_enabled(false);
        self.publisher.set_video_enabled(false);
        self.publisher.set_enabled(false);
        self.connection.set_address(None);
        self.connection.set_enabled(false);
        self.registry.teardown_all().await;

        self.join_config.set(None);
        self.state.set(SessionState::Left);
        if was_joined {
            info!(target: "sc.session", "left");
            self.diag.record("conn", "disconnected");
        }
    }

    /// Toggle the microphone track. Returns the new state.
    pub fn toggle_local_audio(&self) -> bool {
        let enabled = self.publisher.audio_enabled().update(|v| !v);
        self.diag
            .record("track", format!("mic {}", if enabled { "ON" } else { "OFF" }));
        enabled
    }

    /// Toggle the camera track. Returns the new state.
    pub fn toggle_local_video(&self) -> bool {
        let enabled = self.publisher.video_enabled().update(|v| !v);
        self.diag.record(
            "track",
            format!("camera {}", if enabled { "ON" } else { "OFF" }),
        );
        enabled
    }

    /// Toggle remote audio output. Returns the new state. Routes stay
    /// wired; only their gain changes.
    pub fn toggle_speaker(&self) -> bool {
        let enabled = self.speaker_enabled.update(|v| !v);
        self.diag.record(
            "track",
            format!("speaker {}", if enabled { "ON" } else { "OFF" }),
        );
        enabled
    }

    /// Session state signal.
    #[must_use]
    pub fn state(&self) -> Signal<SessionState> {
        self.state.clone()
    }

    /// Parameters of the current join, `None` when left.
    #[must_use]
    pub fn join_config(&self) -> Signal<Option<JoinConfig>> {
        self.join_config.clone()
    }

    /// Transport connection status.
    #[must_use]
    pub fn connection_status(&self) -> Signal<ConnectionStatus> {
        self.connection.status()
    }

    /// Local participant id.
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Snapshot of tracked participants in subscription order.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantSnapshot> {
        self.registry.snapshot()
    }

    /// Diagnostic log entries, newest first.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<DiagEvent> {
        self.diag.snapshot()
    }

    /// Smoothed local microphone level in [0, 1].
    #[must_use]
    pub fn local_level(&self) -> Signal<f32> {
        self.monitor.local_level()
    }

    /// Loudest remote participant level in [0, 1].
    #[must_use]
    pub fn remote_level(&self) -> Signal<f32> {
        self.monitor.remote_level()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Leave and dispose every component.
    pub async fn close(mut self) {
        self.leave().await;

        self.pump_token.cancel();
        if let Err(e) = self.pump_task.await {
            warn!(target: "sc.session", error = %e, "event pump panicked");
        }
        self.monitor.close().await;
        self.publisher.close().await;
        self.connection.close().await;
    }
}

/// Resolve the address the transport dials: the relay URL with the
/// room prefix appended as path segments.
fn resolve_relay_url(relay: &str, prefix: &BroadcastPath) -> Result<Url, SessionError> {
    let mut base = Url::parse(relay)
        .map_err(|e| SessionError::Validation(format!("invalid relay URL {relay}: {e}")))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(prefix.as_str())
        .map_err(|e| SessionError::Validation(format!("cannot resolve {prefix} on {relay}: {e}")))
}

/// Applies announce updates to the registry in feed order.
#[instrument(skip_all, name = "announce_pump")]
async fn pump(
    mut events: mpsc::Receiver<AnnounceUpdate>,
    registry: ParticipantRegistry,
    token: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            () = token.cancelled() => return,
            update = events.recv() => update,
        };
        match update {
            Some(update) if update.active => registry.on_active(update.path),
            Some(update) => registry.on_inactive(&update.path).await,
            None => return,
        }
    }
}
