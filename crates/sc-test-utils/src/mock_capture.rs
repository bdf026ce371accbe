//! Mock capture devices.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use session_controller::errors::SessionError;
use session_controller::signal::Signal;
use session_controller::traits::{
    AudioCaptureTrack, AudioRoot, MediaCapture, VideoCaptureTrack, VideoFrame,
};

use crate::mock_audio::MockAudioRoot;

/// A small valid frame for capture and decode tests.
pub fn test_frame() -> VideoFrame {
    VideoFrame {
        width: 320,
        height: 240,
        data: Bytes::from_static(&[0u8; 16]),
        timestamp_us: 0,
    }
}

/// Mock capture device access.
///
/// Tracks open immediately with media already flowing: the audio track
/// comes with a live graph root and the video track with one frame, so
/// tests never wait for a device to warm up.
pub struct MockCapture {
    audio_denied: Mutex<Option<String>>,
    video_denied: Mutex<Option<String>>,
    audio_tracks: Mutex<Vec<Arc<MockAudioCaptureTrack>>>,
    video_tracks: Mutex<Vec<Arc<MockVideoCaptureTrack>>>,
}

impl MockCapture {
    /// Capture where both devices are available.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            audio_denied: Mutex::new(None),
            video_denied: Mutex::new(None),
            audio_tracks: Mutex::new(Vec::new()),
            video_tracks: Mutex::new(Vec::new()),
        })
    }

    /// Make microphone acquisition fail with `message`.
    pub fn deny_audio(self: Arc<Self>, message: &str) -> Arc<Self> {
        *self.audio_denied.lock() = Some(message.to_string());
        self
    }

    /// Make camera acquisition fail with `message`.
    pub fn deny_video(self: Arc<Self>, message: &str) -> Arc<Self> {
        *self.video_denied.lock() = Some(message.to_string());
        self
    }

    /// Every audio track opened, in call order.
    pub fn audio_tracks(&self) -> Vec<Arc<MockAudioCaptureTrack>> {
        self.audio_tracks.lock().clone()
    }

    /// Every video track opened, in call order.
    pub fn video_tracks(&self) -> Vec<Arc<MockVideoCaptureTrack>> {
        self.video_tracks.lock().clone()
    }
}

impl MediaCapture for MockCapture {
    fn open_audio(&self) -> Result<Box<dyn AudioCaptureTrack>, SessionError> {
        if let Some(message) = self.audio_denied.lock().clone() {
            return Err(SessionError::Capability(message));
        }
        let root = MockAudioRoot::standalone();
        let track = Arc::new(MockAudioCaptureTrack {
            root: Arc::clone(&root),
            signal: Signal::new(Some(root as Arc<dyn AudioRoot>)),
            closed: AtomicBool::new(false),
        });
        self.audio_tracks.lock().push(Arc::clone(&track));
        Ok(Box::new(AudioTrackHandle(track)))
    }

    fn open_video(&self) -> Result<Box<dyn VideoCaptureTrack>, SessionError> {
        if let Some(message) = self.video_denied.lock().clone() {
            return Err(SessionError::Capability(message));
        }
        let track = Arc::new(MockVideoCaptureTrack {
            frame: Signal::new(Some(test_frame())),
            closed: AtomicBool::new(false),
        });
        self.video_tracks.lock().push(Arc::clone(&track));
        Ok(Box::new(VideoTrackHandle(track)))
    }
}

/// An opened mock microphone track.
pub struct MockAudioCaptureTrack {
    root: Arc<MockAudioRoot>,
    signal: Signal<Option<Arc<dyn AudioRoot>>>,
    closed: AtomicBool,
}

impl MockAudioCaptureTrack {
    /// The track's audio root, for scripting waveforms.
    pub fn root(&self) -> Arc<MockAudioRoot> {
        Arc::clone(&self.root)
    }

    /// Whether the track was released.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// The capture traits live in session-controller, so the boxed views
// handed back to the controller are local newtypes over the shared
// mock state rather than impls on `Arc` directly.
struct AudioTrackHandle(Arc<MockAudioCaptureTrack>);

impl AudioCaptureTrack for AudioTrackHandle {
    fn audio_root(&self) -> Signal<Option<Arc<dyn AudioRoot>>> {
        self.0.signal.clone()
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

/// An opened mock camera track.
pub struct MockVideoCaptureTrack {
    frame: Signal<Option<VideoFrame>>,
    closed: AtomicBool,
}

impl MockVideoCaptureTrack {
    /// Push a new captured frame.
    pub fn push_frame(&self, frame: VideoFrame) {
        self.frame.replace(Some(frame));
    }

    /// Whether the track was released.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct VideoTrackHandle(Arc<MockVideoCaptureTrack>);

impl VideoCaptureTrack for VideoTrackHandle {
    fn frame(&self) -> Signal<Option<VideoFrame>> {
        self.0.frame.clone()
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_controller::traits::MediaCapture;

    #[test]
    fn test_boxed_track_close_marks_shared_state() {
        let capture = MockCapture::new();

        let audio = capture.open_audio().expect("audio should open");
        let video = capture.open_video().expect("video should open");
        assert!(audio.audio_root().get().is_some());
        assert!(video.frame().get().is_some());

        audio.close();
        video.close();
        assert!(capture.audio_tracks()[0].is_closed());
        assert!(capture.video_tracks()[0].is_closed());
    }

    #[test]
    fn test_denied_devices_fail_independently() {
        let capture = MockCapture::new().deny_audio("mic busy");
        assert!(capture.open_audio().is_err());
        assert!(capture.open_video().is_ok());
    }
}
