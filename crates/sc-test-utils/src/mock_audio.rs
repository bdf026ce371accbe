//! Mock audio graph: roots and routes with canned waveforms.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use session_controller::traits::{AudioRoot, AudioRoute};

use crate::recorder::TeardownRecorder;

/// Mock audio graph root.
///
/// Routes created from it share the root's waveform buffer and gain
/// history, so tests can script levels and assert gain changes without
/// holding on to individual route handles.
pub struct MockAudioRoot {
    recorder: Option<TeardownRecorder>,
    label: Option<String>,
    waveform: Arc<Mutex<Vec<f32>>>,
    gains: Arc<Mutex<Vec<f32>>>,
    routes: Mutex<Vec<Arc<MockRoute>>>,
}

impl MockAudioRoot {
    /// A root not tied to any relay, for driving local-capture paths.
    pub fn standalone() -> Arc<Self> {
        Arc::new(Self {
            recorder: None,
            label: None,
            waveform: Arc::new(Mutex::new(Vec::new())),
            gains: Arc::new(Mutex::new(Vec::new())),
            routes: Mutex::new(Vec::new()),
        })
    }

    /// A root whose route disconnects are recorded under `label`.
    pub(crate) fn recorded(
        recorder: TeardownRecorder,
        label: String,
        gains: Arc<Mutex<Vec<f32>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            recorder: Some(recorder),
            label: Some(label),
            waveform: Arc::new(Mutex::new(Vec::new())),
            gains,
            routes: Mutex::new(Vec::new()),
        })
    }

    /// Set the waveform window every route of this root reports.
    pub fn set_waveform(&self, samples: Vec<f32>) {
        *self.waveform.lock() = samples;
    }

    /// Number of routes created from this root.
    pub fn routes_created(&self) -> usize {
        self.routes.lock().len()
    }

    /// Whether every created route has been disconnected.
    pub fn all_routes_disconnected(&self) -> bool {
        self.routes.lock().iter().all(|r| r.is_disconnected())
    }

    /// Gain values set across all routes, in call order.
    pub fn gains(&self) -> Vec<f32> {
        self.gains.lock().clone()
    }
}

impl AudioRoot for MockAudioRoot {
    fn route(&self) -> Arc<dyn AudioRoute> {
        let route = Arc::new(MockRoute {
            recorder: self.recorder.clone(),
            label: self.label.clone(),
            waveform: Arc::clone(&self.waveform),
            gains: Arc::clone(&self.gains),
            disconnected: AtomicBool::new(false),
        });
        self.routes.lock().push(Arc::clone(&route));
        route
    }
}

/// Mock wired audio route.
pub struct MockRoute {
    recorder: Option<TeardownRecorder>,
    label: Option<String>,
    waveform: Arc<Mutex<Vec<f32>>>,
    gains: Arc<Mutex<Vec<f32>>>,
    disconnected: AtomicBool,
}

impl MockRoute {
    /// Whether `disconnect` was called.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl AudioRoute for MockRoute {
    fn set_gain(&self, gain: f32) {
        self.gains.lock().push(gain);
    }

    fn waveform(&self, buf: &mut [f32]) -> usize {
        let samples = self.waveform.lock();
        let n = samples.len().min(buf.len());
        buf[..n].copy_from_slice(&samples[..n]);
        n
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        if let (Some(recorder), Some(label)) = (&self.recorder, &self.label) {
            recorder.record(label.clone());
        }
    }
}
