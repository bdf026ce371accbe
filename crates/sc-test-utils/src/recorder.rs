//! Ordered teardown recording.

use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, ordered log of close/disconnect calls.
///
/// Every mock handle created by a [`MockRelay`](crate::MockRelay)
/// records a `"kind:path"` entry here when closed, so tests can assert
/// the exact teardown sequence.
#[derive(Clone, Default)]
pub struct TeardownRecorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl TeardownRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// All recorded events in call order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}
