//! # Tether Engine
//!
//! Keeps a local, ordered mirror of a remote collection consistent with a
//! stream of remote change notifications, and coordinates optimistic local
//! mutations against it.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the network, clock or disk; time
//!   and entropy are passed in
//! - **Always sorted, never duplicated**: every observable state of the
//!   mirror is ordered by `(priority, id)` with unique ids
//! - **Idempotent**: re-delivering a notification never changes the outcome
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] has an immutable id, a server-assigned [`Priority`] and a
//! [`RecordBody`] that is either a map of fields or a single scalar.
//!
//! ### Mirror
//!
//! The [`OrderedMirror`] holds records sorted by [`SortKey`], with an
//! `id -> priority` index so lookups are binary searches.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] applies `added`, `changed`, `removed`, `moved` and
//! `ready` notifications in arrival order. Each is idempotent, so the echo
//! of a local change is harmless.
//!
//! ### Local mutations
//!
//! [`Collection`] runs the optimistic halves of `add`, `remove`, `save` and
//! `edit`, and rolls them back when the remote write fails, unless a later
//! local mutation of the same record has superseded them.
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{Collection, Notification, Anchor, Priority, RecordBody};
//! use serde_json::json;
//!
//! let mut collection = Collection::new();
//!
//! // Remote data arrives
//! collection
//!     .apply(Notification::Added {
//!         id: "a".into(),
//!         priority: Priority::None,
//!         after: Anchor::First,
//!         body: RecordBody::from_value(json!({"title": "milk"})).unwrap(),
//!     })
//!     .unwrap();
//! collection.apply(Notification::Ready).unwrap();
//!
//! // A local add shows up immediately
//! let write = collection
//!     .begin_add("b", Priority::None, RecordBody::from_value(json!("eggs")).unwrap())
//!     .unwrap();
//! assert_eq!(collection.len(), 2);
//!
//! // The remote write failed: roll back
//! collection.rollback_add(write.ticket).unwrap();
//! assert_eq!(collection.len(), 1);
//! ```

pub mod collection;
pub mod error;
pub mod events;
pub mod key;
pub mod mirror;
pub mod mutation;
pub mod notification;
pub mod readiness;
pub mod reconcile;
pub mod record;
pub mod snapshot;

// Re-export main types at crate root
pub use collection::{Collection, LocalWrite, RecordDraft, Target};
pub use error::Error;
pub use events::{ChangeEvent, ChangeFeed, ChangeKind, ListenerId};
pub use key::{KeyGenerator, PushIdEncoder, SequentialKeys};
pub use mirror::{Anchor, OrderedMirror, Relocation};
pub use mutation::{MutationKind, PendingWrites, Ticket};
pub use notification::{Notification, RawNotification};
pub use readiness::{ReadinessTracker, ReadyCallback, ReadyState};
pub use reconcile::{Applied, ReconcileStats, Reconciler};
pub use record::{Origin, Priority, Record, RecordBody, SortKey};
pub use snapshot::{MirrorSnapshot, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type RecordId = String;
pub type Timestamp = u64;
