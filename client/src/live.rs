//! `LiveCollection`: the public face of a synchronized collection.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tether_engine::{
    error::Result, ChangeEvent, KeyGenerator, ListenerId, MirrorSnapshot, Priority,
    RawNotification, ReconcileStats, Record, RecordDraft, RecordId, Target,
};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::coordinator::MutationCoordinator;
use crate::handle::CompletionHandle;
use crate::state::SharedState;
use crate::transport::{NotificationStream, TransportChannel};

/// A local, ordered, continuously synchronized copy of a remote collection.
///
/// Cheap to clone; clones share the same mirror. The notification pump stops
/// when [`close`](Self::close) is called or the last clone is dropped.
#[derive(Clone)]
pub struct LiveCollection {
    inner: Arc<Inner>,
}

struct Inner {
    state: Arc<SharedState>,
    coordinator: MutationCoordinator,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

impl LiveCollection {
    /// Subscribe to `transport` and start applying its notifications.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(transport: Arc<dyn TransportChannel>, keys: impl KeyGenerator + 'static) -> Self {
        let stream = transport.subscribe();
        let collection = Self::detached(transport, keys);

        let pump = tokio::spawn(pump(Arc::clone(&collection.inner.state), stream));
        *collection.inner.pump.lock() = Some(pump);

        info!("live collection opened");
        collection
    }

    /// A collection whose notifications are fed by hand through
    /// [`apply`](Self::apply). Mutations still go through `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn detached(transport: Arc<dyn TransportChannel>, keys: impl KeyGenerator + 'static) -> Self {
        let state = Arc::new(SharedState::new());
        let coordinator =
            MutationCoordinator::new(Arc::clone(&state), transport, Box::new(keys), Handle::current());

        Self {
            inner: Arc::new(Inner {
                state,
                coordinator,
                pump: Mutex::new(None),
            }),
        }
    }

    /// The mutation coordinator behind this collection.
    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.inner.coordinator
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn add(&self, payload: Value) -> CompletionHandle<Record> {
        self.inner.coordinator.add(payload)
    }

    pub fn add_with_priority(&self, payload: Value, priority: Priority) -> CompletionHandle<Record> {
        self.inner.coordinator.add_with_priority(payload, priority)
    }

    pub fn remove(&self, target: impl Into<Target>) -> CompletionHandle<()> {
        self.inner.coordinator.remove(target)
    }

    pub fn save(&self, target: impl Into<Target>) -> CompletionHandle<()> {
        self.inner.coordinator.save(target)
    }

    pub fn edit(&self, target: impl Into<Target>, f: impl FnOnce(&mut RecordDraft)) -> Result<()> {
        self.inner.coordinator.edit(target, f)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Copy of the record with `id`.
    pub fn get(&self, id: &str) -> Option<Record> {
        self.inner.state.read(|c| c.get(id).cloned())
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.inner.state.read(|c| c.index_of(id))
    }

    /// Copy of the record at `index`.
    pub fn at(&self, index: usize) -> Option<Record> {
        self.inner.state.read(|c| c.at(index).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.state.read(|c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.inner
            .state
            .read(|c| c.mirror().ids().map(str::to_string).collect())
    }

    /// Read-only ordered copy of the current state.
    pub fn snapshot(&self) -> MirrorSnapshot {
        self.inner.state.read(|c| c.snapshot())
    }

    pub fn stats(&self) -> ReconcileStats {
        self.inner.state.read(|c| c.stats())
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    pub fn is_ready(&self) -> bool {
        self.inner.state.read(|c| c.is_ready())
    }

    /// Run `callback` once the initial sync has finished; immediately if it
    /// already has.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.state.on_ready(Box::new(callback));
    }

    /// Wait for the initial sync to finish.
    pub async fn ready(&self) {
        let (tx, rx) = oneshot::channel();
        self.on_ready(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Listen for structural changes.
    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.state.feed.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.state.feed.unsubscribe(id);
    }

    /// Apply a notification by hand, as if the transport had delivered it.
    pub fn apply(&self, raw: RawNotification) -> Result<()> {
        self.inner.state.apply_raw(raw)
    }

    /// Stop applying remote notifications. In-flight mutations still settle.
    pub fn close(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
            info!("live collection closed");
        }
    }
}

impl std::fmt::Debug for LiveCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCollection")
            .field("len", &self.len())
            .field("ready", &self.is_ready())
            .field("listeners", &self.inner.state.feed.listeners())
            .finish_non_exhaustive()
    }
}

async fn pump(state: Arc<SharedState>, mut stream: NotificationStream) {
    while let Some(raw) = stream.recv().await {
        if let Err(err) = state.apply_raw(raw) {
            error!(error = %err, "failed to apply notification");
        }
    }
    debug!("notification stream ended");
}
