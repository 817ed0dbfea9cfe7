//! Tracks whether the initial synchronization pass has completed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Callback run once the collection is ready.
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

/// Readiness of a collection. Moves from `Loading` to `Ready` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    #[default]
    Loading,
    Ready,
}

/// One-shot readiness signal with callback registration.
///
/// [`register`](Self::register) and [`mark_ready`](Self::mark_ready) hand
/// callbacks back instead of invoking them, so an owner holding a lock can
/// run them after releasing it. [`on_ready`](Self::on_ready) is the direct
/// form for owners without one.
#[derive(Default)]
pub struct ReadinessTracker {
    state: ReadyState,
    waiting: Vec<ReadyCallback>,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReadyState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ReadyState::Ready
    }

    /// Number of callbacks still waiting for the signal.
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Queue `callback` while loading. Once ready, the callback is returned
    /// to the caller, who must invoke it.
    pub fn register(&mut self, callback: ReadyCallback) -> Option<ReadyCallback> {
        match self.state {
            ReadyState::Ready => Some(callback),
            ReadyState::Loading => {
                self.waiting.push(callback);
                None
            }
        }
    }

    /// Register and, if already ready, invoke immediately.
    pub fn on_ready(&mut self, callback: impl FnOnce() + Send + 'static) {
        if let Some(callback) = self.register(Box::new(callback)) {
            callback();
        }
    }

    /// Transition to `Ready`, returning the callbacks to run.
    ///
    /// Only the first call returns anything.
    pub fn mark_ready(&mut self) -> Vec<ReadyCallback> {
        if self.is_ready() {
            return Vec::new();
        }
        self.state = ReadyState::Ready;
        std::mem::take(&mut self.waiting)
    }
}

impl fmt::Debug for ReadinessTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessTracker")
            .field("state", &self.state)
            .field("waiting", &self.waiting.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> ReadyCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let make = {
            let count = Arc::clone(&count);
            move || -> ReadyCallback {
                let count = Arc::clone(&count);
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        (count, make)
    }

    #[test]
    fn callbacks_registered_early_fire_once() {
        let (count, make) = counter();
        let mut tracker = ReadinessTracker::new();
        assert!(tracker.register(make()).is_none());
        assert!(tracker.register(make()).is_none());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for cb in tracker.mark_ready() {
            cb();
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // A second sentinel fires nothing
        assert!(tracker.mark_ready().is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn registering_after_ready_returns_callback() {
        let (count, make) = counter();
        let mut tracker = ReadinessTracker::new();
        tracker.mark_ready();

        let cb = tracker.register(make()).expect("callback handed back");
        cb();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.waiting(), 0);
    }

    #[test]
    fn on_ready_invokes_synchronously_when_ready() {
        let (count, make) = counter();
        let mut tracker = ReadinessTracker::new();
        tracker.on_ready(make());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for cb in tracker.mark_ready() {
            cb();
        }
        tracker.on_ready(make());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.state(), ReadyState::Ready);
    }
}
