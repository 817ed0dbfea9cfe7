//! The boundary to the remote store.
//!
//! A transport delivers change notifications for one collection, in order,
//! and performs remote writes and deletes. Timeouts and retries are the
//! transport's business; the collection treats every failure the same way.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tether_engine::{Error, Priority, RawNotification};
use tokio::sync::mpsc;

/// Ordered stream of notifications for one collection.
pub type NotificationStream = mpsc::UnboundedReceiver<RawNotification>;

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote rejected the request: {0}")]
    Rejected(String),

    #[error("transport disconnected")]
    Disconnected,
}

impl TransportError {
    /// Convert into the engine error reported for `id`.
    pub fn into_remote_write(self, id: &str) -> Error {
        Error::remote_write(id, self)
    }
}

/// A connection to the remote store for one collection.
pub trait TransportChannel: Send + Sync + 'static {
    /// Open the notification stream.
    ///
    /// The stream starts with an `added` notification for every existing
    /// record, followed by the `ready` sentinel, then live changes.
    fn subscribe(&self) -> NotificationStream;

    /// Write the full record at `id`, creating or replacing it.
    fn write(
        &self,
        id: &str,
        payload: Value,
        priority: Priority,
    ) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Delete the record at `id`.
    fn delete(&self, id: &str) -> BoxFuture<'static, Result<(), TransportError>>;
}
