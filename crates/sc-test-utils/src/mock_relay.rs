//! Mock transport and relay connection.
//!
//! `MockTransport` hands out `MockRelay` connections and keeps every
//! one it created, so tests can script announce feeds, inspect
//! publishes, drive remote media, and assert teardown ordering.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use url::Url;

use session_controller::errors::SessionError;
use session_controller::path::BroadcastPath;
use session_controller::signal::Signal;
use session_controller::traits::{
    AnnounceFeed, AnnounceUpdate, AudioPipeline, AudioRoot, BroadcastHandle, MediaSource,
    PublishHandle, PublishMeta, RelayConnection, SubscriptionParts, Transport, VideoFrame,
    VideoPipeline,
};

use crate::mock_audio::MockAudioRoot;
use crate::recorder::TeardownRecorder;

/// Scriptable mock transport.
#[derive(Clone, Default)]
pub struct MockTransport {
    fail_with: Option<String>,
    connections: Arc<Mutex<Vec<Arc<MockRelay>>>>,
}

impl MockTransport {
    /// A transport whose every connect succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every connect fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// This transport as a trait object.
    pub fn as_dyn(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Number of successful connects.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// The `index`-th relay handed out, in connect order.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `index + 1` connects happened.
    pub fn connection(&self, index: usize) -> Arc<MockRelay> {
        self.connections
            .lock()
            .get(index)
            .cloned()
            .unwrap_or_else(|| panic!("no connection at index {index}"))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &Url) -> Result<Arc<dyn RelayConnection>, SessionError> {
        if let Some(message) = &self.fail_with {
            return Err(SessionError::Transport(message.clone()));
        }
        let relay = MockRelay::new();
        relay.inner.address.lock().replace(address.clone());
        self.connections.lock().push(Arc::clone(&relay));
        Ok(relay)
    }
}

enum AnnounceItem {
    Update(AnnounceUpdate),
    End,
    Error(String),
}

struct RelayInner {
    address: Mutex<Option<Url>>,
    closed: AtomicBool,
    drop_tx: watch::Sender<bool>,
    drop_reason: Mutex<Option<String>>,
    announce_tx: Mutex<Option<mpsc::UnboundedSender<AnnounceItem>>>,
    announced_prefixes: Mutex<Vec<BroadcastPath>>,
    published: Mutex<Vec<Arc<MockPublishHandle>>>,
    subscriptions: Mutex<Vec<BroadcastPath>>,
    remotes: Mutex<HashMap<BroadcastPath, Arc<MockRemoteControls>>>,
    recorder: TeardownRecorder,
}

/// Scriptable mock relay connection.
pub struct MockRelay {
    inner: RelayInner,
}

impl MockRelay {
    /// A fresh, open relay connection.
    pub fn new() -> Arc<Self> {
        let (drop_tx, _) = watch::channel(false);
        Arc::new(Self {
            inner: RelayInner {
                address: Mutex::new(None),
                closed: AtomicBool::new(false),
                drop_tx,
                drop_reason: Mutex::new(None),
                announce_tx: Mutex::new(None),
                announced_prefixes: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                remotes: Mutex::new(HashMap::new()),
                recorder: TeardownRecorder::new(),
            },
        })
    }

    /// Whether the controller released this connection.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Address this relay was dialed at, if it came from a
    /// [`MockTransport`].
    pub fn address(&self) -> Option<Url> {
        self.inner.address.lock().clone()
    }

    /// Simulate the transport dropping the connection. `None` is a
    /// clean close, `Some(reason)` an error.
    pub fn drop_connection(&self, reason: Option<String>) {
        *self.inner.drop_reason.lock() = reason;
        let _ = self.inner.drop_tx.send(true);
    }

    /// Push one announce update into the current feed.
    ///
    /// # Panics
    ///
    /// Panics if no announce feed is open.
    pub fn announce(&self, path: BroadcastPath, active: bool) {
        self.send_announce(AnnounceItem::Update(AnnounceUpdate { path, active }));
    }

    /// End the current announce feed.
    pub fn end_announce(&self) {
        self.send_announce(AnnounceItem::End);
    }

    /// Fail the current announce feed.
    pub fn fail_announce(&self, message: &str) {
        self.send_announce(AnnounceItem::Error(message.to_string()));
    }

    fn send_announce(&self, item: AnnounceItem) {
        let guard = self.inner.announce_tx.lock();
        let tx = guard.as_ref().expect("no announce feed open");
        tx.send(item).expect("announce feed receiver dropped");
    }

    /// Prefixes `announced` was called with, in call order.
    pub fn announced_prefixes(&self) -> Vec<BroadcastPath> {
        self.inner.announced_prefixes.lock().clone()
    }

    /// Every publish handle created, in call order.
    pub fn published(&self) -> Vec<Arc<MockPublishHandle>> {
        self.inner.published.lock().clone()
    }

    /// Number of `subscribe` calls for `path`.
    pub fn subscription_count(&self, path: &BroadcastPath) -> usize {
        self.inner
            .subscriptions
            .lock()
            .iter()
            .filter(|p| *p == path)
            .count()
    }

    /// Controls for the subscribed remote at `path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` was never subscribed.
    pub fn remote(&self, path: &BroadcastPath) -> Arc<MockRemoteControls> {
        self.inner
            .remotes
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_else(|| panic!("no subscription for {path}"))
    }

    /// Close/disconnect events across all subscriptions, in call
    /// order, as `"kind:path"` strings.
    pub fn teardown_events(&self) -> Vec<String> {
        self.inner.recorder.events()
    }
}

#[async_trait]
impl RelayConnection for MockRelay {
    fn announced(&self, prefix: &BroadcastPath) -> Box<dyn AnnounceFeed> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.announce_tx.lock() = Some(tx);
        self.inner.announced_prefixes.lock().push(prefix.clone());
        Box::new(ScriptedAnnounceFeed { rx, closed: false })
    }

    fn publish(
        &self,
        path: &BroadcastPath,
        meta: &PublishMeta,
    ) -> Result<Box<dyn PublishHandle>, SessionError> {
        let handle = Arc::new(MockPublishHandle {
            path: path.clone(),
            meta: meta.clone(),
            closed: AtomicBool::new(false),
        });
        self.inner.published.lock().push(Arc::clone(&handle));
        Ok(Box::new(PublishedHandle(handle)))
    }

    fn subscribe(&self, path: &BroadcastPath) -> SubscriptionParts {
        self.inner.subscriptions.lock().push(path.clone());
        let controls = Arc::new(MockRemoteControls {
            path: path.clone(),
            recorder: self.inner.recorder.clone(),
            video_enabled: AtomicBool::new(false),
            audio_enabled: AtomicBool::new(false),
            frame: Signal::new(None),
            audio_root: Signal::new(None),
            bytes_received: Signal::new(0),
            gains: Arc::new(Mutex::new(Vec::new())),
            root: Mutex::new(None),
        });
        self.inner
            .remotes
            .lock()
            .insert(path.clone(), Arc::clone(&controls));

        SubscriptionParts {
            broadcast: Box::new(CloseProbe::new(&self.inner.recorder, "broadcast", path)),
            video_source: Box::new(CloseProbe::new(&self.inner.recorder, "video_source", path)),
            video: Box::new(MockVideoPipeline {
                controls: Arc::clone(&controls),
                probe: CloseProbe::new(&self.inner.recorder, "video", path),
            }),
            audio_source: Box::new(CloseProbe::new(&self.inner.recorder, "audio_source", path)),
            audio: Box::new(MockAudioPipeline {
                controls,
                probe: CloseProbe::new(&self.inner.recorder, "audio", path),
            }),
        }
    }

    async fn closed(&self) -> Option<String> {
        let mut rx = self.inner.drop_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Relay dropped entirely; report a clean close.
                return None;
            }
        }
        self.inner.drop_reason.lock().clone()
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

struct ScriptedAnnounceFeed {
    rx: mpsc::UnboundedReceiver<AnnounceItem>,
    closed: bool,
}

#[async_trait]
impl AnnounceFeed for ScriptedAnnounceFeed {
    async fn next(&mut self) -> Result<Option<AnnounceUpdate>, SessionError> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(AnnounceItem::Update(update)) => Ok(Some(update)),
            Some(AnnounceItem::End) | None => Ok(None),
            Some(AnnounceItem::Error(message)) => Err(SessionError::Discovery(message)),
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }
}

/// A recorded publish of the local broadcast.
pub struct MockPublishHandle {
    path: BroadcastPath,
    meta: PublishMeta,
    closed: AtomicBool,
}

impl MockPublishHandle {
    /// Path the broadcast was published under.
    pub fn path(&self) -> BroadcastPath {
        self.path.clone()
    }

    /// Metadata it was published with.
    pub fn meta(&self) -> PublishMeta {
        self.meta.clone()
    }

    /// Whether the publish was stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// PublishHandle is a session-controller trait, so the boxed handle is
// a local newtype over the recorded state.
struct PublishedHandle(Arc<MockPublishHandle>);

impl PublishHandle for PublishedHandle {
    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

/// Test-side controls for one subscribed remote broadcast.
pub struct MockRemoteControls {
    path: BroadcastPath,
    recorder: TeardownRecorder,
    video_enabled: AtomicBool,
    audio_enabled: AtomicBool,
    frame: Signal<Option<VideoFrame>>,
    audio_root: Signal<Option<Arc<dyn AudioRoot>>>,
    bytes_received: Signal<u64>,
    gains: Arc<Mutex<Vec<f32>>>,
    root: Mutex<Option<Arc<MockAudioRoot>>>,
}

impl MockRemoteControls {
    /// Whether the audio pipeline was enabled.
    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    /// Whether the video pipeline was enabled.
    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    /// Make the remote's audio graph root available, as a decoder
    /// would once audio data flows.
    pub fn provide_audio_root(&self) -> Arc<MockAudioRoot> {
        let root = MockAudioRoot::recorded(
            self.recorder.clone(),
            format!("route:{}", self.path),
            Arc::clone(&self.gains),
        );
        *self.root.lock() = Some(Arc::clone(&root));
        self.audio_root.replace(Some(root.clone() as Arc<dyn AudioRoot>));
        root
    }

    /// Advance the received-bytes counter.
    pub fn set_bytes_received(&self, total: u64) {
        self.bytes_received.set(total);
    }

    /// Publish a decoded video frame.
    pub fn provide_video_frame(&self, frame: VideoFrame) {
        self.frame.replace(Some(frame));
    }

    /// Gains set on this remote's routes, in call order.
    pub fn gains(&self) -> Vec<f32> {
        self.gains.lock().clone()
    }

    /// Number of routes created from this remote's audio root.
    pub fn routes_created(&self) -> usize {
        self.root.lock().as_ref().map_or(0, |r| r.routes_created())
    }
}

/// Records a single close call under `"kind:path"`.
struct CloseProbe {
    recorder: TeardownRecorder,
    label: String,
}

impl CloseProbe {
    fn new(recorder: &TeardownRecorder, kind: &str, path: &BroadcastPath) -> Self {
        Self {
            recorder: recorder.clone(),
            label: format!("{kind}:{path}"),
        }
    }

    fn hit(&self) {
        self.recorder.record(self.label.clone());
    }
}

impl BroadcastHandle for CloseProbe {
    fn close(&self) {
        self.hit();
    }
}

impl MediaSource for CloseProbe {
    fn close(&self) {
        self.hit();
    }
}

struct MockVideoPipeline {
    controls: Arc<MockRemoteControls>,
    probe: CloseProbe,
}

impl VideoPipeline for MockVideoPipeline {
    fn set_enabled(&self, enabled: bool) {
        self.controls.video_enabled.store(enabled, Ordering::SeqCst);
    }

    fn frame(&self) -> Signal<Option<VideoFrame>> {
        self.controls.frame.clone()
    }

    fn close(&self) {
        self.probe.hit();
    }
}

struct MockAudioPipeline {
    controls: Arc<MockRemoteControls>,
    probe: CloseProbe,
}

impl AudioPipeline for MockAudioPipeline {
    fn set_enabled(&self, enabled: bool) {
        self.controls.audio_enabled.store(enabled, Ordering::SeqCst);
    }

    fn audio_root(&self) -> Signal<Option<Arc<dyn AudioRoot>>> {
        self.controls.audio_root.clone()
    }

    fn bytes_received(&self) -> Signal<u64> {
        self.controls.bytes_received.clone()
    }

    fn close(&self) {
        self.probe.hit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxed_publish_handle_close_marks_recorded_state() {
        let relay = MockRelay::new();
        let path = BroadcastPath::new("anon/room1/abc123");
        let handle = relay
            .publish(&path, &PublishMeta::default())
            .expect("publish should succeed");

        assert!(!relay.published()[0].is_closed());
        handle.close();
        assert!(relay.published()[0].is_closed());
    }

    #[test]
    fn test_subscription_parts_record_closes_under_path_labels() {
        let relay = MockRelay::new();
        let path = BroadcastPath::new("anon/room1/xyz999");
        let parts = relay.subscribe(&path);

        parts.broadcast.close();
        assert_eq!(relay.teardown_events(), vec![format!("broadcast:{path}")]);
    }
}
