//! Multi-party real-time media session controller.
//!
//! Coordinates one local participant's view of a room: connection
//! establishment over a pluggable transport, announce-driven discovery
//! of remote broadcasts, per-participant subscription lifecycles with
//! strict teardown ordering, audio-level metering, and mute/deaf
//! controls.
//!
//! The controller is reactive at its core: state lives in [`Signal`]s
//! and behavior in scoped effects that re-run when their inputs change
//! and clean up after themselves. Platform machinery (transport,
//! capture, decode, audio graph) sits behind the traits in [`traits`];
//! everything above them is runtime-agnostic and fully testable with
//! the doubles in `sc-test-utils`.
//!
//! Typical use:
//!
//! ```ignore
//! let mut session = Session::new(transport, capture, Config::from_env()?);
//! session.join("https://relay.example", "room1").await?;
//! // ... observe session.participants(), toggle tracks ...
//! session.leave().await;
//! session.close().await;
//! ```

pub mod announce;
pub mod config;
pub mod connection;
pub mod diag;
pub mod effect;
pub mod errors;
pub mod metrics;
pub mod monitor;
pub mod participants;
pub mod path;
pub mod publisher;
pub mod session;
pub mod signal;
pub mod traits;

pub use announce::{AnnounceListener, ListenerState};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionStatus};
pub use diag::{DiagEvent, DiagLog};
pub use effect::{EffectCtx, EffectScope};
pub use errors::SessionError;
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use monitor::AudioMonitor;
pub use participants::{ParticipantRegistry, ParticipantSnapshot};
pub use path::{BroadcastPath, ANNOUNCE_NAMESPACE};
pub use publisher::LocalPublisher;
pub use session::{JoinConfig, Session, SessionState};
pub use signal::Signal;
pub use traits::{
    AnnounceFeed, AnnounceUpdate, AudioCaptureTrack, AudioPipeline, AudioRoot, AudioRoute,
    BroadcastHandle, MediaCapture, MediaSource, PublishHandle, PublishMeta, RelayConnection,
    SubscriptionParts, Transport, VideoCaptureTrack, VideoFrame, VideoPipeline,
};
