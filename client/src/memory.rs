//! In-memory authoritative remote.
//!
//! Holds the authoritative ordered collection and fans every accepted change
//! out to all subscribers, the writer included, the way a hosted backend
//! echoes a client's own writes. Used by the integration tests and the demo.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tether_engine::{
    Anchor, Notification, OrderedMirror, Priority, RawNotification, Record, RecordBody, RecordId,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::transport::{NotificationStream, TransportChannel, TransportError};

/// Sender half of a subscriber's notification stream.
pub type NotificationSender = mpsc::UnboundedSender<RawNotification>;

/// An in-process remote store.
///
/// Cheap to clone; clones share the same store and subscribers.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    inner: Arc<RemoteInner>,
}

#[derive(Debug)]
struct RemoteInner {
    /// Authoritative records. Writes broadcast while holding this lock, so
    /// every subscriber observes changes in commit order.
    store: Mutex<OrderedMirror>,
    /// Live subscriber channels, keyed by subscription id
    subscribers: DashMap<String, NotificationSender>,
    latency: Duration,
    timeout: Duration,
    failures: AtomicUsize,
    /// Request queue, started by the first write or delete. Requests commit
    /// in the order they were issued, whatever order their futures are
    /// polled in.
    queue: Mutex<Option<mpsc::UnboundedSender<Queued>>>,
}

/// A write or delete waiting for its turn to commit.
#[derive(Debug)]
struct Queued {
    request: Request,
    issued_at: Instant,
    reply: oneshot::Sender<Result<(), TransportError>>,
}

#[derive(Debug)]
enum Request {
    Write {
        id: RecordId,
        payload: Value,
        priority: Priority,
    },
    Delete {
        id: RecordId,
    },
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// An empty remote that answers immediately.
    pub fn new() -> Self {
        Self::with_timing(Duration::ZERO, ClientConfig::default().write_timeout)
    }

    /// An empty remote with simulated latency and the write timeout that
    /// bounds it.
    pub fn with_timing(latency: Duration, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                store: Mutex::new(OrderedMirror::new()),
                subscribers: DashMap::new(),
                latency,
                timeout,
                failures: AtomicUsize::new(0),
                queue: Mutex::new(None),
            }),
        }
    }

    /// A remote configured from client settings.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_timing(config.remote_latency, config.write_timeout)
    }

    /// Store a record directly, notifying current subscribers.
    pub fn seed(&self, id: impl Into<RecordId>, payload: Value, priority: Priority) -> Result<(), TransportError> {
        self.inner.commit_write(&id.into(), payload, priority)
    }

    /// Reject the next `n` writes or deletes.
    pub fn fail_next(&self, n: usize) {
        self.inner.failures.store(n, Ordering::SeqCst);
    }

    /// Copy of the authoritative records, in order.
    pub fn records(&self) -> Vec<Record> {
        self.inner.store.lock().records().to_vec()
    }

    /// Ids of the authoritative records, in order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.inner
            .store
            .lock()
            .ids()
            .map(str::to_string)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.inner.store.lock().get(id).cloned()
    }

    /// Number of subscribers still listening.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.retain(|_, sender| !sender.is_closed());
        self.inner.subscribers.len()
    }

    /// Close every notification stream.
    pub fn disconnect_all(&self) {
        self.inner.subscribers.clear();
        tracing::info!("all subscribers disconnected");
    }

    /// Queue `request` and return a future for its outcome.
    ///
    /// The queue is fixed at call time; the returned future only waits for
    /// the answer.
    fn submit(&self, request: Request) -> BoxFuture<'static, Result<(), TransportError>> {
        let (reply, outcome) = oneshot::channel();
        let queued = Queued {
            request,
            issued_at: Instant::now(),
            reply,
        };
        if self.queue_sender().send(queued).is_err() {
            return futures::future::ready(Err(TransportError::Disconnected)).boxed();
        }
        async move { outcome.await.unwrap_or(Err(TransportError::Disconnected)) }.boxed()
    }

    /// Sender of the request queue, spawning its worker on first use.
    ///
    /// Must be called from within a tokio runtime.
    fn queue_sender(&self) -> mpsc::UnboundedSender<Queued> {
        let mut queue = self.inner.queue.lock();
        if let Some(sender) = queue.as_ref().filter(|sender| !sender.is_closed()) {
            return sender.clone();
        }
        let (sender, requests) = mpsc::unbounded_channel();
        tokio::spawn(commit_in_order(Arc::downgrade(&self.inner), requests));
        *queue = Some(sender.clone());
        sender
    }
}

/// Commit queued requests one at a time, in issue order.
///
/// Each request still waits out its own latency measured from when it was
/// issued, so concurrent requests overlap their round trips. Ends once the
/// remote is dropped.
async fn commit_in_order(remote: Weak<RemoteInner>, mut requests: mpsc::UnboundedReceiver<Queued>) {
    while let Some(queued) = requests.recv().await {
        let Some(inner) = remote.upgrade() else {
            break;
        };
        let outcome = inner.process(queued.request, queued.issued_at).await;
        let _ = queued.reply.send(outcome);
    }
    tracing::debug!("remote request queue stopped");
}

impl RemoteInner {
    /// Wait out the simulated latency of a request issued at `issued_at`,
    /// consume an injected failure if any, then commit.
    async fn process(&self, request: Request, issued_at: Instant) -> Result<(), TransportError> {
        if self.latency > self.timeout {
            tokio::time::sleep_until(issued_at + self.timeout).await;
            return Err(TransportError::Timeout(self.timeout));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep_until(issued_at + self.latency).await;
        }

        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Rejected("injected failure".to_string()));
        }

        match request {
            Request::Write {
                id,
                payload,
                priority,
            } => self.commit_write(&id, payload, priority),
            Request::Delete { id } => self.commit_delete(&id),
        }
    }

    fn commit_write(&self, id: &str, payload: Value, priority: Priority) -> Result<(), TransportError> {
        let body = RecordBody::from_value(payload).map_err(rejected)?;
        priority.validate().map_err(rejected)?;
        let mut store = self.store.lock();

        let Some(current) = store.get(id).cloned() else {
            let index = store
                .insert(Record::new(id, priority.clone(), body.clone()))
                .map_err(rejected)?;
            let after = store.anchor_at(index);
            self.broadcast(Notification::Added {
                id: id.to_string(),
                priority,
                after,
                body,
            })?;
            return Ok(());
        };

        if current.body != body {
            store.replace_body(id, body.clone()).map_err(rejected)?;
            self.broadcast(Notification::Changed {
                id: id.to_string(),
                body,
            })?;
        }

        // A new priority is announced even when the position holds, so
        // subscribers keep the right sort key
        if current.priority != priority {
            let relocation = store.relocate(id, priority.clone(), None).map_err(rejected)?;
            self.broadcast(Notification::Moved {
                id: id.to_string(),
                priority,
                after: store.anchor_at(relocation.to),
                body: None,
            })?;
        }
        Ok(())
    }

    fn commit_delete(&self, id: &str) -> Result<(), TransportError> {
        let mut store = self.store.lock();
        if store.contains(id) {
            store.remove_by_id(id).map_err(rejected)?;
            self.broadcast(Notification::Removed { id: id.to_string() })?;
        }
        Ok(())
    }

    fn subscribe(&self) -> NotificationStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.store.lock();

        let mut after = None;
        for record in store.iter() {
            let replay = RawNotification::try_from(Notification::Added {
                id: record.id.clone(),
                priority: record.priority.clone(),
                after: Anchor::from_preceding(after.replace(record.id.clone())),
                body: record.body.clone(),
            });
            match replay {
                Ok(raw) => {
                    let _ = tx.send(raw);
                }
                Err(err) => tracing::error!(id = %record.id, error = %err, "record has no wire form"),
            }
        }
        let _ = tx.send(RawNotification::ready());

        let sub_id = uuid::Uuid::new_v4().to_string();
        self.subscribers.insert(sub_id.clone(), tx);
        tracing::info!(sub_id = %sub_id, records = store.len(), "subscriber registered");

        rx
    }

    /// Send a notification to every subscriber, pruning closed ones.
    ///
    /// Returns the number of subscribers that received it.
    fn broadcast(&self, notification: Notification) -> Result<usize, TransportError> {
        let raw = RawNotification::try_from(notification).map_err(rejected)?;
        let mut sent_count = 0;

        self.subscribers.retain(|sub_id, sender| {
            if sender.send(raw.clone()).is_ok() {
                sent_count += 1;
                true
            } else {
                tracing::debug!(sub_id = %sub_id, "pruning closed subscriber");
                false
            }
        });

        tracing::debug!(
            kind = %raw.kind,
            id = raw.id.as_deref().unwrap_or_default(),
            recipients = sent_count,
            "broadcast notification"
        );

        Ok(sent_count)
    }
}

fn rejected(err: tether_engine::Error) -> TransportError {
    TransportError::Rejected(err.to_string())
}

impl TransportChannel for MemoryRemote {
    fn subscribe(&self) -> NotificationStream {
        self.inner.subscribe()
    }

    fn write(
        &self,
        id: &str,
        payload: Value,
        priority: Priority,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        self.submit(Request::Write {
            id: id.to_string(),
            payload,
            priority,
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'static, Result<(), TransportError>> {
        self.submit(Request::Delete { id: id.to_string() })
    }
}
