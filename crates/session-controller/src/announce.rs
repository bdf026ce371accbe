//! Announce-driven discovery.
//!
//! Listens to the relay's announce feed for the room prefix and
//! forwards remote activation changes to the session's event pump. The
//! local broadcast path is filtered out here so the controller never
//! subscribes to itself, regardless of whether the local announce
//! arrives before or after publishing started.
//!
//! Terminal states stick: once the feed ends or errors the listener
//! stays down until the next `start`. A transport reconnect alone does
//! not re-arm discovery; rejoining does.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::diag::DiagLog;
use crate::effect::EffectScope;
use crate::metrics::SessionMetrics;
use crate::path::BroadcastPath;
use crate::signal::Signal;
use crate::traits::{AnnounceUpdate, RelayConnection};

/// Discovery listener state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    /// Not started.
    Idle,
    /// Started, waiting for a connection to appear.
    WaitingForConnection,
    /// Feed open, processing updates.
    Listening,
    /// Feed ended or listener stopped. Terminal until restarted.
    Stopped,
    /// Feed failed. Terminal until restarted.
    Errored,
}

/// Watches the announce feed and forwards remote updates.
pub struct AnnounceListener {
    established: Signal<Option<Arc<dyn RelayConnection>>>,
    local_path: Signal<Option<BroadcastPath>>,
    events: mpsc::Sender<AnnounceUpdate>,
    state: Signal<ListenerState>,
    scope: Option<EffectScope>,
    diag: DiagLog,
    metrics: Arc<SessionMetrics>,
}

impl AnnounceListener {
    /// Create a listener. Updates surviving the self-filter are sent to
    /// `events` in feed order.
    #[must_use]
    pub fn new(
        established: Signal<Option<Arc<dyn RelayConnection>>>,
        local_path: Signal<Option<BroadcastPath>>,
        events: mpsc::Sender<AnnounceUpdate>,
        diag: DiagLog,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            established,
            local_path,
            events,
            state: Signal::new(ListenerState::Idle),
            scope: None,
            diag,
            metrics,
        }
    }

    /// Listener state signal.
    #[must_use]
    pub fn state(&self) -> Signal<ListenerState> {
        self.state.clone()
    }

    /// Start discovery for `prefix`. Stops any previous run first.
    pub async fn start(&mut self, prefix: BroadcastPath) {
        self.stop().await;
        self.state.set(ListenerState::Idle);

        info!(target: "sc.announce", prefix = %prefix, "starting discovery");

        let mut scope = EffectScope::new();
        let established = self.established.clone();
        let local_path = self.local_path.clone();
        let events = self.events.clone();
        let state = self.state.clone();
        let diag = self.diag.clone();
        let metrics = Arc::clone(&self.metrics);
        scope.effect(move |ctx| {
            // Terminal states are not re-armed by connection changes.
            if matches!(
                ctx.peek(&state),
                ListenerState::Stopped | ListenerState::Errored
            ) {
                return;
            }

            let Some(conn) = ctx.get(&established) else {
                // Losing the connection mid-listen is terminal; a later
                // connection must not silently reopen discovery.
                if ctx.peek(&state) == ListenerState::Listening {
                    state.set(ListenerState::Errored);
                    diag.record("announced", "connection lost while listening");
                    warn!(target: "sc.announce", "connection lost while listening");
                } else {
                    state.set(ListenerState::WaitingForConnection);
                    diag.record("announced", "waiting for connection...");
                }
                return;
            };

            state.set(ListenerState::Listening);
            diag.record("announced", "connection available, starting listener");

            let mut feed = conn.announced(&prefix);
            let local_path = local_path.clone();
            let events = events.clone();
            let state = state.clone();
            let diag = diag.clone();
            let metrics = Arc::clone(&metrics);
            ctx.spawn(move |cancel| async move {
                diag.record("announced", "loop started");
                loop {
                    let update = tokio::select! {
                        () = cancel.cancelled() => {
                            feed.close();
                            return;
                        }
                        update = feed.next() => update,
                    };

                    match update {
                        Ok(Some(update)) => {
                            metrics.announce_event();

                            // Self-filter against the path as published
                            // at arrival time, not at start time.
                            if local_path.get().as_ref() == Some(&update.path) {
                                debug!(
                                    target: "sc.announce",
                                    path = %update.path,
                                    "ignoring local broadcast"
                                );
                                continue;
                            }

                            let verb = if update.active { "ACTIVE" } else { "INACTIVE" };
                            diag.record(
                                "announced",
                                format!("REMOTE {verb}: ...{}", update.path.short()),
                            );

                            tokio::select! {
                                () = cancel.cancelled() => {
                                    feed.close();
                                    return;
                                }
                                sent = events.send(update) => {
                                    if sent.is_err() {
                                        // Pump is gone; session teardown
                                        // races ahead of cancellation.
                                        return;
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            state.set(ListenerState::Stopped);
                            diag.record("announced", "loop ended");
                            return;
                        }
                        Err(e) => {
                            state.set(ListenerState::Errored);
                            diag.record("announced", format!("loop error: {e}"));
                            warn!(target: "sc.announce", error = %e, "announce feed failed");
                            return;
                        }
                    }
                }
            });
        });

        self.scope = Some(scope);
    }

    /// Stop discovery. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.close().await;
            self.state.set(ListenerState::Stopped);
        }
    }
}
