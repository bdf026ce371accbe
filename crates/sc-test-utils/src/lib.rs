//! # SC Test Utilities
//!
//! Shared test utilities for the session controller.
//!
//! This crate provides mock implementations of the controller's
//! collaborator traits so lifecycle, discovery, and teardown behavior
//! can be tested without a real relay or any capture hardware.
//!
//! ## Modules
//!
//! - `mock_relay` - Scriptable transport, relay connection, and
//!   announce feed
//! - `mock_audio` - Audio graph roots and routes with canned waveforms
//! - `mock_capture` - Microphone and camera capture devices
//! - `recorder` - Ordered close/disconnect recording for teardown
//!   assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let transport = MockTransport::new();
//!     let capture = MockCapture::new();
//!
//!     // ... drive the controller ...
//!
//!     let relay = transport.connection(0);
//!     relay.announce(path, true);
//!     assert_eq!(relay.teardown_events(), expected);
//! }
//! ```

pub mod mock_audio;
pub mod mock_capture;
pub mod mock_relay;
pub mod recorder;

pub use mock_audio::{MockAudioRoot, MockRoute};
pub use mock_capture::{test_frame, MockAudioCaptureTrack, MockCapture, MockVideoCaptureTrack};
pub use mock_relay::{MockPublishHandle, MockRelay, MockRemoteControls, MockTransport};
pub use recorder::TeardownRecorder;
