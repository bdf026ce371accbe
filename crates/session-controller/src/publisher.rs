//! Local broadcast publishing and capture.
//!
//! Three independent effects: one publishes the local broadcast
//! whenever a connection, path, and enable flag line up, and two own
//! the capture devices for the audio and video tracks. Capture
//! acquisition failures are capability errors local to their track;
//! the other track and the broadcast itself keep going.

use std::sync::Arc;
use tracing::{info, warn};

use crate::diag::DiagLog;
use crate::effect::{EffectCtx, EffectScope};
use crate::path::BroadcastPath;
use crate::signal::Signal;
use crate::traits::{
    AudioRoot, MediaCapture, PublishMeta, RelayConnection, VideoFrame,
};

/// Publishes the local broadcast and owns local capture.
pub struct LocalPublisher {
    enabled: Signal<bool>,
    path: Signal<Option<BroadcastPath>>,
    audio_enabled: Signal<bool>,
    video_enabled: Signal<bool>,
    display_name: Signal<String>,
    audio_root: Signal<Option<Arc<dyn AudioRoot>>>,
    video_frame: Signal<Option<VideoFrame>>,
    scope: EffectScope,
}

impl LocalPublisher {
    /// Create a publisher bound to `established` and `capture`. Starts
    /// disabled with both tracks off.
    #[must_use]
    pub fn new(
        established: Signal<Option<Arc<dyn RelayConnection>>>,
        capture: Arc<dyn MediaCapture>,
        display_name: String,
        diag: DiagLog,
    ) -> Self {
        let enabled = Signal::new(false);
        let path: Signal<Option<BroadcastPath>> = Signal::new(None);
        let audio_enabled = Signal::new(false);
        let video_enabled = Signal::new(false);
        let display_name = Signal::new(display_name);
        let audio_root: Signal<Option<Arc<dyn AudioRoot>>> = Signal::new(None);
        let video_frame: Signal<Option<VideoFrame>> = Signal::new(None);

        let mut scope = EffectScope::new();

        {
            let enabled = enabled.clone();
            let path = path.clone();
            let display_name = display_name.clone();
            let diag = diag.clone();
            scope.effect(move |ctx| {
                if !ctx.get(&enabled) {
                    return;
                }
                let Some(path) = ctx.get(&path) else {
                    return;
                };
                let Some(conn) = ctx.get(&established) else {
                    return;
                };

                let meta = PublishMeta {
                    display_name: ctx.get(&display_name),
                };
                match conn.publish(&path, &meta) {
                    Ok(handle) => {
                        info!(target: "sc.publisher", path = %path, "publishing local broadcast");
                        diag.record("pub", format!("publishing ...{}", path.short()));
                        ctx.on_cleanup(move || handle.close());
                    }
                    Err(e) => {
                        diag.record("pub", format!("publish failed: {e}"));
                        warn!(target: "sc.publisher", error = %e, "publish failed");
                    }
                }
            });
        }

        {
            let enabled = enabled.clone();
            let audio_enabled = audio_enabled.clone();
            let audio_root = audio_root.clone();
            let capture = Arc::clone(&capture);
            let diag = diag.clone();
            scope.effect(move |ctx| {
                if !ctx.get(&enabled) || !ctx.get(&audio_enabled) {
                    return;
                }
                match capture.open_audio() {
                    Ok(track) => {
                        mirror(ctx, &track.audio_root(), &audio_root);
                        let audio_root = audio_root.clone();
                        ctx.on_cleanup(move || {
                            audio_root.replace(None);
                            track.close();
                        });
                    }
                    Err(e) => {
                        diag.record(e.diag_tag(), format!("microphone unavailable: {e}"));
                        warn!(target: "sc.publisher", error = %e, "audio capture failed");
                    }
                }
            });
        }

        {
            let enabled = enabled.clone();
            let video_enabled = video_enabled.clone();
            let video_frame = video_frame.clone();
            scope.effect(move |ctx| {
                if !ctx.get(&enabled) || !ctx.get(&video_enabled) {
                    return;
                }
                match capture.open_video() {
                    Ok(track) => {
                        mirror(ctx, &track.frame(), &video_frame);
                        let video_frame = video_frame.clone();
                        ctx.on_cleanup(move || {
                            video_frame.replace(None);
                            track.close();
                        });
                    }
                    Err(e) => {
                        diag.record(e.diag_tag(), format!("camera unavailable: {e}"));
                        warn!(target: "sc.publisher", error = %e, "video capture failed");
                    }
                }
            });
        }

        Self {
            enabled,
            path,
            audio_enabled,
            video_enabled,
            display_name,
            audio_root,
            video_frame,
            scope,
        }
    }

    /// Enable or disable publishing.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    /// Set the local publish path.
    pub fn set_path(&self, path: Option<BroadcastPath>) {
        self.path.set(path);
    }

    /// Enable or disable the microphone track.
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.set(enabled);
    }

    /// Enable or disable the camera track.
    pub fn set_video_enabled(&self, enabled: bool) {
        self.video_enabled.set(enabled);
    }

    /// Update the published display name.
    pub fn set_display_name(&self, name: String) {
        self.display_name.set(name);
    }

    /// Local publish path signal. This is the path the discovery
    /// listener filters out.
    #[must_use]
    pub fn path(&self) -> Signal<Option<BroadcastPath>> {
        self.path.clone()
    }

    /// Whether the microphone track is enabled.
    #[must_use]
    pub fn audio_enabled(&self) -> Signal<bool> {
        self.audio_enabled.clone()
    }

    /// Whether the camera track is enabled.
    #[must_use]
    pub fn video_enabled(&self) -> Signal<bool> {
        self.video_enabled.clone()
    }

    /// Audio graph root of the captured microphone, `None` while the
    /// track is off.
    #[must_use]
    pub fn audio_root(&self) -> Signal<Option<Arc<dyn AudioRoot>>> {
        self.audio_root.clone()
    }

    /// Latest captured camera frame.
    #[must_use]
    pub fn video_frame(&self) -> Signal<Option<VideoFrame>> {
        self.video_frame.clone()
    }

    /// Dispose the publisher, closing the broadcast and both capture
    /// devices.
    pub async fn close(self) {
        self.scope.close().await;
    }
}

/// Mirror `source` into `out` until the owning effect re-runs.
fn mirror<T: Clone + Send + Sync + 'static>(ctx: &mut EffectCtx, source: &Signal<T>, out: &Signal<T>) {
    let mut rx = source.watch();
    let out = out.clone();
    ctx.spawn(move |cancel| async move {
        loop {
            let value = rx.borrow_and_update().clone();
            out.replace(value);
            tokio::select! {
                () = cancel.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    });
}
