//! Collaborator contracts.
//!
//! The controller owns lifecycle and ordering; the actual transport,
//! capture, decode, and audio-graph machinery live behind these traits.
//! Production wires platform implementations in; tests wire in the
//! doubles from `sc-test-utils`.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use url::Url;

use crate::errors::SessionError;
use crate::path::BroadcastPath;
use crate::signal::Signal;

/// One decoded or captured video frame. Payload is opaque to the
/// controller.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw frame payload.
    pub data: Bytes,
    /// Capture timestamp in microseconds.
    pub timestamp_us: u64,
}

/// One discrete announce-feed event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnounceUpdate {
    /// Announced broadcast path.
    pub path: BroadcastPath,
    /// Whether the broadcast became active or went away.
    pub active: bool,
}

/// Presence metadata published alongside the local broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishMeta {
    /// Display name shown to other participants.
    pub display_name: String,
}

/// Everything needed to consume one remote broadcast, created together
/// by [`RelayConnection::subscribe`] and torn down piecewise by the
/// participant registry in a fixed order.
pub struct SubscriptionParts {
    /// The subscription-scoped broadcast handle; closed last.
    pub broadcast: Box<dyn BroadcastHandle>,
    /// Video track source bound to the broadcast.
    pub video_source: Box<dyn MediaSource>,
    /// Video decode pipeline fed from the source.
    pub video: Box<dyn VideoPipeline>,
    /// Audio track source bound to the broadcast.
    pub audio_source: Box<dyn MediaSource>,
    /// Audio decode pipeline fed from the source.
    pub audio: Box<dyn AudioPipeline>,
}

/// Transport factory: dials a relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection to the relay at `address`.
    async fn connect(&self, address: &Url) -> Result<Arc<dyn RelayConnection>, SessionError>;
}

/// An established relay connection.
#[async_trait]
pub trait RelayConnection: Send + Sync {
    /// Open the announce feed for every broadcast under `prefix`.
    fn announced(&self, prefix: &BroadcastPath) -> Box<dyn AnnounceFeed>;

    /// Publish the local broadcast under `path`.
    fn publish(
        &self,
        path: &BroadcastPath,
        meta: &PublishMeta,
    ) -> Result<Box<dyn PublishHandle>, SessionError>;

    /// Open a subscription to the remote broadcast at `path`.
    fn subscribe(&self, path: &BroadcastPath) -> SubscriptionParts;

    /// Resolves when the transport drops the connection. `None` is a
    /// clean close; `Some(reason)` is an error.
    async fn closed(&self) -> Option<String>;

    /// Release the connection.
    fn close(&self);
}

/// Discovery feed of `{path, active}` updates.
#[async_trait]
pub trait AnnounceFeed: Send {
    /// Next update; `Ok(None)` when the feed ends.
    async fn next(&mut self) -> Result<Option<AnnounceUpdate>, SessionError>;

    /// Cancel the in-flight request and release the feed.
    fn close(&mut self);
}

/// Handle to the local published broadcast.
pub trait PublishHandle: Send + Sync {
    /// Stop publishing.
    fn close(&self);
}

/// Handle to one subscribed remote broadcast.
pub trait BroadcastHandle: Send + Sync {
    /// Release the subscription.
    fn close(&self);
}

/// A media track source (audio or video) bound to a broadcast.
pub trait MediaSource: Send + Sync {
    /// Release the source.
    fn close(&self);
}

/// Remote video decode pipeline.
pub trait VideoPipeline: Send + Sync {
    /// Start/stop decoding.
    fn set_enabled(&self, enabled: bool);

    /// Latest decoded frame.
    fn frame(&self) -> Signal<Option<VideoFrame>>;

    /// Release the decoder.
    fn close(&self);
}

/// Remote audio decode pipeline.
pub trait AudioPipeline: Send + Sync {
    /// Start/stop decoding.
    fn set_enabled(&self, enabled: bool);

    /// Audio graph root, present once the decoder has output.
    fn audio_root(&self) -> Signal<Option<Arc<dyn AudioRoot>>>;

    /// Total audio bytes received (monotonic).
    fn bytes_received(&self) -> Signal<u64>;

    /// Release the decoder.
    fn close(&self);
}

/// Root of a platform audio graph.
pub trait AudioRoot: Send + Sync {
    /// Wire a gain-gated, analyzable route from this root to the
    /// audio output.
    fn route(&self) -> Arc<dyn AudioRoute>;
}

/// A wired audio route: gain node plus spectrum analyzer.
pub trait AudioRoute: Send + Sync {
    /// Set the route gain (0.0 mutes, 1.0 passes through).
    fn set_gain(&self, gain: f32);

    /// Copy the most recent waveform window into `buf`, samples in
    /// [-1, 1]. Returns the number of samples written.
    fn waveform(&self, buf: &mut [f32]) -> usize;

    /// Detach the route from the graph.
    fn disconnect(&self);
}

/// Local capture device access.
pub trait MediaCapture: Send + Sync {
    /// Acquire the microphone. Failure is a capability error, local to
    /// the audio track.
    fn open_audio(&self) -> Result<Box<dyn AudioCaptureTrack>, SessionError>;

    /// Acquire the camera. Failure is a capability error, local to the
    /// video track.
    fn open_video(&self) -> Result<Box<dyn VideoCaptureTrack>, SessionError>;
}

/// An acquired microphone track.
pub trait AudioCaptureTrack: Send + Sync {
    /// Audio graph root for the captured audio.
    fn audio_root(&self) -> Signal<Option<Arc<dyn AudioRoot>>>;

    /// Release the capture device.
    fn close(&self);
}

/// An acquired camera track.
pub trait VideoCaptureTrack: Send + Sync {
    /// Latest captured frame.
    fn frame(&self) -> Signal<Option<VideoFrame>>;

    /// Release the capture device.
    fn close(&self);
}
