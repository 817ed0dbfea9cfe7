//! The lock-protected collection shared by the pump, the coordinator and
//! readers.

use parking_lot::Mutex;
use tether_engine::{
    error::Result, ChangeEvent, ChangeFeed, Collection, RawNotification, ReadyCallback,
};
use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct SharedState {
    collection: Mutex<Collection>,
    /// Structural changes, queued under the collection lock
    pub(crate) feed: ChangeFeed<ChangeEvent>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run a read-only closure against the collection.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Collection) -> R) -> R {
        f(&self.collection.lock())
    }

    /// Run a mutation against the collection.
    ///
    /// Events pushed into the buffer are queued before the lock is released
    /// and delivered after, so listeners may call back into the collection.
    pub(crate) fn update<R>(
        &self,
        f: impl FnOnce(&mut Collection, &mut Vec<ChangeEvent>) -> R,
    ) -> R {
        let value = {
            let mut collection = self.collection.lock();
            let mut changes = Vec::new();
            let value = f(&mut collection, &mut changes);
            self.feed.enqueue(changes);
            value
        };
        self.feed.drain();
        value
    }

    /// Apply a notification from the transport.
    pub(crate) fn apply_raw(&self, raw: RawNotification) -> Result<()> {
        let ready = self.update(|collection, changes| {
            let applied = collection.apply_raw(raw)?;
            changes.extend(applied.changes);
            Ok::<_, tether_engine::Error>(applied.ready)
        })?;

        if !ready.is_empty() {
            debug!(callbacks = ready.len(), "collection ready");
        }
        for callback in ready {
            callback();
        }
        Ok(())
    }

    /// Register a ready callback, running it now if already ready.
    pub(crate) fn on_ready(&self, callback: ReadyCallback) {
        let immediate = self.collection.lock().register_ready(callback);
        if let Some(callback) = immediate {
            callback();
        }
    }
}
