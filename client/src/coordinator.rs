//! Asynchronous half of local mutations.
//!
//! Each mutating call applies its optimistic effect synchronously, then hands
//! the remote write to a background task that settles the ticket and resolves
//! the caller's [`CompletionHandle`].

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tether_engine::{
    error::Result, Error, KeyGenerator, LocalWrite, Priority, Record, RecordBody, RecordDraft,
    Target,
};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::handle::CompletionHandle;
use crate::state::SharedState;
use crate::transport::TransportChannel;

/// Coordinates local mutations with the remote store.
pub struct MutationCoordinator {
    state: Arc<SharedState>,
    transport: Arc<dyn TransportChannel>,
    keys: Mutex<Box<dyn KeyGenerator>>,
    runtime: Handle,
}

impl MutationCoordinator {
    pub(crate) fn new(
        state: Arc<SharedState>,
        transport: Arc<dyn TransportChannel>,
        keys: Box<dyn KeyGenerator>,
        runtime: Handle,
    ) -> Self {
        Self {
            state,
            transport,
            keys: Mutex::new(keys),
            runtime,
        }
    }

    /// Add a record with no priority.
    pub fn add(&self, payload: Value) -> CompletionHandle<Record> {
        self.add_with_priority(payload, Priority::None)
    }

    /// Add a record under a fresh id.
    ///
    /// The record is visible locally before the handle resolves. On success
    /// the handle yields the record as it stands locally at that point (the
    /// echo may have refreshed it); on failure the record is withdrawn.
    pub fn add_with_priority(&self, payload: Value, priority: Priority) -> CompletionHandle<Record> {
        let body = match RecordBody::from_value(payload) {
            Ok(body) => body,
            Err(err) => return CompletionHandle::rejected(err),
        };
        if let Err(err) = priority.validate() {
            return CompletionHandle::rejected(err);
        }
        let id = self.keys.lock().next_id();

        let write = self.state.update(|collection, changes| {
            let mut write = collection.begin_add(id, priority, body)?;
            changes.append(&mut write.changes);
            Ok::<_, Error>(write)
        });
        let LocalWrite { ticket, record, .. } = match write {
            Ok(write) => write,
            Err(err) => return CompletionHandle::rejected(err),
        };

        debug!(id = %record.id, "optimistic add");
        let remote = self
            .transport
            .write(&record.id, record.to_payload(), record.priority.clone());
        let state = Arc::clone(&self.state);
        let (completer, handle) = CompletionHandle::pending(record.id.clone());

        self.runtime.spawn(async move {
            match remote.await {
                Ok(()) => {
                    let current = state.update(|collection, _| {
                        let current = collection.get(&record.id).cloned();
                        collection.complete(ticket);
                        current
                    });
                    completer.fulfill(current.unwrap_or(record));
                }
                Err(err) => {
                    warn!(id = %record.id, error = %err, "remote add failed, rolling back");
                    let rolled_back = state.update(|collection, changes| {
                        collection
                            .rollback_add(ticket)
                            .map(|mut undone| changes.append(&mut undone))
                    });
                    if let Err(rollback_err) = rolled_back {
                        error!(id = %record.id, error = %rollback_err, "rollback of add failed");
                    }
                    completer.reject(err.into_remote_write(&record.id));
                }
            }
        });

        handle
    }

    /// Remove a record.
    ///
    /// The record disappears locally at once. If the remote delete fails it
    /// is put back at its sort position, unless a later mutation of the same
    /// id has happened since.
    pub fn remove(&self, target: impl Into<Target>) -> CompletionHandle<()> {
        let target = target.into();
        let write = self.state.update(|collection, changes| {
            let mut write = collection.begin_remove(&target)?;
            changes.append(&mut write.changes);
            Ok::<_, Error>(write)
        });
        let LocalWrite { ticket, record, .. } = match write {
            Ok(write) => write,
            Err(err) => {
                debug!(target = %target, error = %err, "remove rejected locally");
                return CompletionHandle::rejected(err);
            }
        };

        debug!(id = %record.id, "optimistic remove");
        let remote = self.transport.delete(&record.id);
        let state = Arc::clone(&self.state);
        let (completer, handle) = CompletionHandle::pending(record.id.clone());

        self.runtime.spawn(async move {
            match remote.await {
                Ok(()) => {
                    state.update(|collection, _| collection.complete(ticket));
                    completer.fulfill(());
                }
                Err(err) => {
                    warn!(id = %record.id, error = %err, "remote remove failed, restoring");
                    let id = record.id.clone();
                    let restored = state.update(|collection, changes| {
                        collection
                            .rollback_remove(ticket, record)
                            .map(|mut undone| changes.append(&mut undone))
                    });
                    if let Err(rollback_err) = restored {
                        error!(id = %id, error = %rollback_err, "rollback of remove failed");
                    }
                    completer.reject(err.into_remote_write(&id));
                }
            }
        });

        handle
    }

    /// Write a record's current local state, including edits, to the remote
    /// store. A failed save leaves the mirror as it is.
    pub fn save(&self, target: impl Into<Target>) -> CompletionHandle<()> {
        let target = target.into();
        let write = self
            .state
            .update(|collection, _| collection.begin_save(&target));
        let LocalWrite { ticket, record, .. } = match write {
            Ok(write) => write,
            Err(err) => {
                debug!(target = %target, error = %err, "save rejected locally");
                return CompletionHandle::rejected(err);
            }
        };

        let remote = self
            .transport
            .write(&record.id, record.to_payload(), record.priority.clone());
        let state = Arc::clone(&self.state);
        let (completer, handle) = CompletionHandle::pending(record.id.clone());

        self.runtime.spawn(async move {
            let outcome = remote.await;
            state.update(|collection, _| collection.complete(ticket));
            match outcome {
                Ok(()) => completer.fulfill(()),
                Err(err) => {
                    warn!(id = %record.id, error = %err, "remote save failed");
                    completer.reject(err.into_remote_write(&record.id));
                }
            }
        });

        handle
    }

    /// Edit a record locally. Nothing is written until [`save`](Self::save).
    pub fn edit(&self, target: impl Into<Target>, f: impl FnOnce(&mut RecordDraft)) -> Result<()> {
        let target = target.into();
        self.state.update(|collection, changes| {
            let mut edited = collection.edit(&target, f)?;
            changes.append(&mut edited);
            Ok(())
        })
    }
}

impl std::fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("pending", &self.state.read(|c| c.pending().total()))
            .finish_non_exhaustive()
    }
}
