//! Observable values built on `tokio::sync::watch`.
//!
//! A [`Signal`] is a single-writer / multi-reader cell. Components own
//! their signals and mutate them; everything else reads or subscribes.
//! Effects (see [`crate::effect`]) re-run when a signal they read
//! changes.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable observable value.
///
/// Clones share the same underlying channel; writes through any clone
/// are visible to all subscribers.
#[derive(Debug)]
pub struct Signal<T> {
    sender: Arc<watch::Sender<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Create a signal holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current value (cloned out).
    #[must_use]
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Unconditionally store `value` and notify subscribers.
    ///
    /// For payloads without `PartialEq` (trait-object handles, frames);
    /// prefer [`Signal::set`] where equality is available so dependent
    /// effects are not re-run spuriously.
    pub fn replace(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Subscribe to changes. The receiver starts with the current value
    /// marked as seen.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Signal<T> {
    /// Store `value`, notifying subscribers only if it differs from the
    /// current value.
    pub fn set(&self, value: T) {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Replace the value with `f(current)` and return the new value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> T {
        let next = f(&self.sender.borrow());
        self.set(next.clone());
        next
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_current_value() {
        let signal = Signal::new(5u32);
        assert_eq!(signal.get(), 5);
        signal.set(7);
        assert_eq!(signal.get(), 7);
    }

    #[tokio::test]
    async fn test_set_equal_value_does_not_notify() {
        let signal = Signal::new(1u32);
        let mut rx = signal.watch();

        signal.set(1);
        assert!(!rx.has_changed().unwrap());

        signal.set(2);
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_replace_always_notifies() {
        let signal = Signal::new("a".to_string());
        let mut rx = signal.watch();

        signal.replace("a".to_string());
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let signal = Signal::new(0u32);
        let other = signal.clone();
        other.set(9);
        assert_eq!(signal.get(), 9);
    }

    #[tokio::test]
    async fn test_update_applies_function() {
        let signal = Signal::new(3u32);
        let next = signal.update(|v| v + 1);
        assert_eq!(next, 4);
        assert_eq!(signal.get(), 4);
    }
}
