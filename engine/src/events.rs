//! Structural change events and their ordered delivery to listeners.
//!
//! Every change the mirror goes through is described by a [`ChangeEvent`]
//! carrying the record id, the positions involved and whether the change came
//! from a local mutation or a remote notification. UI layers replay these to
//! keep a list view in step without diffing.

use crate::{record::Origin, RecordId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted { index: usize },
    Removed { index: usize },
    Moved { from: usize, to: usize },
    Changed { index: usize },
}

/// A single structural or field change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: RecordId,
    pub kind: ChangeKind,
    pub origin: Origin,
}

impl ChangeEvent {
    pub fn inserted(id: impl Into<RecordId>, index: usize, origin: Origin) -> Self {
        Self::new(id, ChangeKind::Inserted { index }, origin)
    }

    pub fn removed(id: impl Into<RecordId>, index: usize, origin: Origin) -> Self {
        Self::new(id, ChangeKind::Removed { index }, origin)
    }

    pub fn moved(id: impl Into<RecordId>, from: usize, to: usize, origin: Origin) -> Self {
        Self::new(id, ChangeKind::Moved { from, to }, origin)
    }

    pub fn changed(id: impl Into<RecordId>, index: usize, origin: Origin) -> Self {
        Self::new(id, ChangeKind::Changed { index }, origin)
    }

    fn new(id: impl Into<RecordId>, kind: ChangeKind, origin: Origin) -> Self {
        Self {
            id: id.into(),
            kind,
            origin,
        }
    }
}

/// Id returned by [`ChangeFeed::subscribe`], used to remove the listener.
pub type ListenerId = u64;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered, re-entrant delivery of events to listeners.
///
/// Producers [`enqueue`](Self::enqueue) events while holding whatever lock
/// ordered them, then call [`drain`](Self::drain) once it is released. Only
/// one drainer runs at a time, so every listener sees events in enqueue order
/// even when several threads produce concurrently. A listener may enqueue,
/// subscribe or unsubscribe from its callback: nothing is locked while it
/// runs, and its own events are delivered after the current one.
pub struct ChangeFeed<T> {
    listeners: Mutex<BTreeMap<ListenerId, Listener<T>>>,
    queue: Mutex<VecDeque<T>>,
    draining: AtomicBool,
    next_id: AtomicU64,
}

impl<T> ChangeFeed<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(BTreeMap::new()),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener. Listeners are called in registration order.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().remove(&id);
    }

    /// Number of registered listeners.
    pub fn listeners(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Queue events for the next drain.
    pub fn enqueue(&self, events: impl IntoIterator<Item = T>) {
        self.queue.lock().extend(events);
    }

    /// Number of events waiting for delivery.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Deliver queued events, unless another drainer is already running.
    ///
    /// A call that finds a drainer active returns at once; the active drainer
    /// picks up whatever was queued in the meantime. Each event goes to the
    /// listeners registered when its delivery starts.
    pub fn drain(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            while let Some(event) = self.pop() {
                let listeners: Vec<Listener<T>> =
                    self.listeners.lock().values().cloned().collect();
                for listener in listeners {
                    listener(&event);
                }
            }

            self.draining.store(false, Ordering::Release);

            // An enqueue may have landed between the last pop and the release
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }

    /// Queue one event and deliver everything queued.
    pub fn publish(&self, event: T) {
        self.enqueue([event]);
        self.drain();
    }

    fn pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }
}

impl<T> Default for ChangeFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ChangeFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("listeners", &self.listeners())
            .field("queued", &self.queued())
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(feed: &ChangeFeed<ChangeEvent>) -> Arc<Mutex<Vec<RecordId>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        feed.subscribe(move |event: &ChangeEvent| sink.lock().push(event.id.clone()));
        seen
    }

    #[test]
    fn delivers_in_enqueue_order() {
        let feed = ChangeFeed::new();
        let seen = recorder(&feed);

        feed.enqueue([
            ChangeEvent::inserted("a", 0, Origin::Remote),
            ChangeEvent::inserted("b", 1, Origin::Remote),
        ]);
        feed.enqueue([ChangeEvent::removed("a", 0, Origin::Local)]);
        assert_eq!(feed.queued(), 3);
        assert!(seen.lock().is_empty());

        feed.drain();
        assert_eq!(*seen.lock(), vec!["a", "b", "a"]);
        assert_eq!(feed.queued(), 0);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let feed = ChangeFeed::new();
        let first = recorder(&feed);
        let second = recorder(&feed);
        assert_eq!(feed.listeners(), 2);

        feed.publish(ChangeEvent::inserted("x", 0, Origin::Remote));
        feed.unsubscribe(1);
        feed.publish(ChangeEvent::removed("x", 0, Origin::Remote));

        assert_eq!(*first.lock(), vec!["x"]);
        assert_eq!(*second.lock(), vec!["x", "x"]);
        assert_eq!(feed.listeners(), 1);
    }

    #[test]
    fn reentrant_publish_is_delivered_after_current_event() {
        let feed = Arc::new(ChangeFeed::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let inner = Arc::clone(&feed);
            let seen = Arc::clone(&seen);
            feed.subscribe(move |event: &ChangeEvent| {
                seen.lock().push(event.id.clone());
                if event.id == "a" {
                    // Already draining: queued, not delivered inline
                    inner.publish(ChangeEvent::changed("follow-up", 0, Origin::Local));
                }
            });
        }

        feed.enqueue([
            ChangeEvent::inserted("a", 0, Origin::Remote),
            ChangeEvent::inserted("b", 1, Origin::Remote),
        ]);
        feed.drain();

        assert_eq!(*seen.lock(), vec!["a", "b", "follow-up"]);
    }

    #[test]
    fn listener_added_during_delivery_waits_for_next_event() {
        let feed = Arc::new(ChangeFeed::<u32>::new());
        let calls = Arc::new(AtomicU64::new(0));
        {
            let inner = Arc::clone(&feed);
            let calls = Arc::clone(&calls);
            feed.subscribe(move |n| {
                if *n == 1 {
                    let calls = Arc::clone(&calls);
                    inner.subscribe(move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });
        }

        feed.publish(1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(feed.listeners(), 2);

        feed.publish(2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_producers_never_interleave_deliveries() {
        let feed = Arc::new(ChangeFeed::<u32>::new());
        let active = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicU64::new(0));
        {
            let active = Arc::clone(&active);
            let delivered = Arc::clone(&delivered);
            feed.subscribe(move |_| {
                assert!(!active.swap(true, Ordering::SeqCst), "overlapping delivery");
                delivered.fetch_add(1, Ordering::SeqCst);
                active.store(false, Ordering::SeqCst);
            });
        }

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let feed = Arc::clone(&feed);
                std::thread::spawn(move || {
                    for n in 0..250 {
                        feed.publish(n);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        feed.drain();

        assert_eq!(delivered.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn event_serialization_format() {
        let event = ChangeEvent::moved("a", 0, 2, Origin::Local);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "a",
                "kind": {"type": "moved", "from": 0, "to": 2},
                "origin": "local"
            })
        );
    }
}
