//! Collection - the synchronous core of a live collection.
//!
//! A `Collection` owns the reconciler (and through it the mirror) plus the
//! bookkeeping for local mutations. Remote notifications and the optimistic
//! halves of local mutations both run through it, so every structural change
//! happens behind a single `&mut self`.
//!
//! Local mutations come in two steps: a `begin_*` call that applies the
//! optimistic effect and issues a [`Ticket`], and a `complete` or
//! `rollback_*` call once the remote write has been acknowledged or has
//! failed. Nothing here performs IO.

use crate::{
    error::Result,
    events::ChangeEvent,
    mirror::OrderedMirror,
    mutation::{MutationKind, PendingWrites, Ticket},
    notification::{Notification, RawNotification},
    readiness::ReadyCallback,
    reconcile::{Applied, ReconcileStats, Reconciler},
    record::{Origin, Priority, RecordBody},
    snapshot::MirrorSnapshot,
    Error, Record, RecordId,
};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// How a caller names a record: by id or by current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(RecordId),
    Index(usize),
}

impl From<&str> for Target {
    fn from(id: &str) -> Self {
        Target::Id(id.to_string())
    }
}

impl From<String> for Target {
    fn from(id: String) -> Self {
        Target::Id(id)
    }
}

impl From<&String> for Target {
    fn from(id: &String) -> Self {
        Target::Id(id.clone())
    }
}

impl From<usize> for Target {
    fn from(index: usize) -> Self {
        Target::Index(index)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Id(id) => f.write_str(id),
            Target::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// Editable copy of a record's mutable fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    pub priority: Priority,
    pub body: RecordBody,
}

impl RecordDraft {
    /// Set a named field. A primitive body is replaced by a map holding
    /// just this field.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        match &mut self.body {
            RecordBody::Structured(map) => {
                map.insert(name.into(), value);
            }
            RecordBody::Primitive(_) => {
                let mut map = serde_json::Map::new();
                map.insert(name.into(), value);
                self.body = RecordBody::Structured(map);
            }
        }
    }

    /// Remove a named field, returning its old value.
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        match &mut self.body {
            RecordBody::Structured(map) => map.remove(name),
            RecordBody::Primitive(_) => None,
        }
    }
}

/// The optimistic half of a local mutation.
#[derive(Debug)]
pub struct LocalWrite {
    /// Settle with [`Collection::complete`] or the matching rollback
    pub ticket: Ticket,
    /// The record as written (`add`, `save`) or as removed (`remove`)
    pub record: Record,
    /// Changes the optimistic step made to the mirror
    pub changes: Vec<ChangeEvent>,
}

/// Mirror, reconciler and pending local mutations of one collection.
#[derive(Debug, Default)]
pub struct Collection {
    reconciler: Reconciler,
    pending: PendingWrites,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection over an existing mirror.
    pub fn with_mirror(mirror: OrderedMirror) -> Self {
        Self {
            reconciler: Reconciler::with_mirror(mirror),
            pending: PendingWrites::new(),
        }
    }

    pub fn mirror(&self) -> &OrderedMirror {
        self.reconciler.mirror()
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    pub fn stats(&self) -> ReconcileStats {
        self.reconciler.stats()
    }

    pub fn len(&self) -> usize {
        self.mirror().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.mirror().get(id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.mirror().index_of(id)
    }

    pub fn at(&self, index: usize) -> Option<&Record> {
        self.mirror().at(index)
    }

    pub fn is_ready(&self) -> bool {
        self.reconciler.readiness().is_ready()
    }

    /// Queue a ready callback; returns it if the collection is already ready.
    pub fn register_ready(&mut self, callback: ReadyCallback) -> Option<ReadyCallback> {
        self.reconciler.readiness_mut().register(callback)
    }

    /// Apply a validated remote notification.
    pub fn apply(&mut self, notification: Notification) -> Result<Applied> {
        self.reconciler.apply(notification)
    }

    /// Apply a notification as delivered by the transport.
    pub fn apply_raw(&mut self, raw: RawNotification) -> Result<Applied> {
        self.reconciler.apply_raw(raw)
    }

    /// Resolve a target to the id of a record currently in the mirror.
    pub fn resolve(&self, target: &Target) -> Result<RecordId> {
        let found = match target {
            Target::Id(id) => self.get(id),
            Target::Index(index) => self.at(*index),
        };
        found
            .map(|record| record.id.clone())
            .ok_or_else(|| Error::NotFound(target.to_string()))
    }

    /// Optimistically insert a new record.
    pub fn begin_add(
        &mut self,
        id: impl Into<RecordId>,
        priority: Priority,
        body: RecordBody,
    ) -> Result<LocalWrite> {
        priority.validate()?;
        let record = Record::new(id, priority, body);
        let index = self.reconciler.mirror_mut().insert(record.clone())?;
        let ticket = self.pending.begin(record.id.clone(), MutationKind::Add);

        Ok(LocalWrite {
            changes: vec![ChangeEvent::inserted(record.id.clone(), index, Origin::Local)],
            ticket,
            record,
        })
    }

    /// Optimistically remove a record, keeping it for a possible rollback.
    pub fn begin_remove(&mut self, target: &Target) -> Result<LocalWrite> {
        let id = self.resolve(target)?;
        let (index, record) = self.reconciler.mirror_mut().remove_by_id(&id)?;
        let ticket = self.pending.begin(id.clone(), MutationKind::Remove);

        Ok(LocalWrite {
            changes: vec![ChangeEvent::removed(id, index, Origin::Local)],
            ticket,
            record,
        })
    }

    /// Capture a record's current state for writing. The mirror is untouched.
    pub fn begin_save(&mut self, target: &Target) -> Result<LocalWrite> {
        let id = self.resolve(target)?;
        let record = self
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        let ticket = self.pending.begin(id, MutationKind::Save);

        Ok(LocalWrite {
            ticket,
            record,
            changes: Vec::new(),
        })
    }

    /// Settle a ticket whose remote write succeeded, or a failed `save`
    /// (which has nothing to roll back).
    pub fn complete(&mut self, ticket: Ticket) {
        self.pending.finish(ticket);
    }

    /// Undo an optimistic `add` after its remote write failed.
    pub fn rollback_add(&mut self, ticket: Ticket) -> Result<Vec<ChangeEvent>> {
        let id = ticket.id().to_string();
        if !self.pending.finish(ticket) {
            debug!(id = %id, "later local mutation supersedes failed add, keeping it");
            return Ok(Vec::new());
        }
        if !self.mirror().contains(&id) {
            return Ok(Vec::new());
        }

        let (index, _) = self.reconciler.mirror_mut().remove_by_id(&id)?;
        Ok(vec![ChangeEvent::removed(id, index, Origin::Local)])
    }

    /// Undo an optimistic `remove` after its remote delete failed, putting
    /// the record back at the position of its retained sort key.
    pub fn rollback_remove(&mut self, ticket: Ticket, removed: Record) -> Result<Vec<ChangeEvent>> {
        let id = ticket.id().to_string();
        if !self.pending.finish(ticket) {
            debug!(id = %id, "later local mutation supersedes failed remove, not restoring");
            return Ok(Vec::new());
        }
        if self.mirror().contains(&id) {
            debug!(id = %id, "record reappeared before failed remove settled, not restoring");
            return Ok(Vec::new());
        }

        let index = self.reconciler.mirror_mut().insert(removed)?;
        Ok(vec![ChangeEvent::inserted(id, index, Origin::Local)])
    }

    /// Edit a record locally. The change is not written remotely until the
    /// record is saved.
    pub fn edit(
        &mut self,
        target: &Target,
        f: impl FnOnce(&mut RecordDraft),
    ) -> Result<Vec<ChangeEvent>> {
        let id = self.resolve(target)?;
        let mut draft = match self.get(&id) {
            Some(record) => RecordDraft {
                priority: record.priority.clone(),
                body: record.body.clone(),
            },
            None => return Err(Error::NotFound(id)),
        };
        f(&mut draft);
        draft.priority.validate()?;

        let mut changes = Vec::new();
        let mirror = self.reconciler.mirror_mut();

        let (index, changed) = mirror.replace_body(&id, draft.body)?;
        if changed {
            changes.push(ChangeEvent::changed(id.clone(), index, Origin::Local));
        }

        let same_priority = mirror
            .get(&id)
            .is_some_and(|record| record.priority == draft.priority);
        if !same_priority {
            let relocation = mirror.relocate(&id, draft.priority, None)?;
            if relocation.moved() {
                changes.push(ChangeEvent::moved(
                    id,
                    relocation.from,
                    relocation.to,
                    Origin::Local,
                ));
            }
        }

        Ok(changes)
    }

    /// Read-only copy of the current ordered state.
    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot::capture(self.mirror(), self.is_ready())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeKind;
    use crate::mirror::Anchor;
    use serde_json::json;

    fn body(v: Value) -> RecordBody {
        RecordBody::from_value(v).unwrap()
    }

    fn seeded() -> Collection {
        let mut collection = Collection::new();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            collection
                .apply(Notification::Added {
                    id: id.to_string(),
                    priority: Priority::from(i as i64 + 1),
                    after: Anchor::First,
                    body: body(json!({"n": id})),
                })
                .unwrap();
        }
        collection
    }

    #[test]
    fn resolve_targets() {
        let collection = seeded();
        assert_eq!(collection.resolve(&"b".into()).unwrap(), "b");
        assert_eq!(collection.resolve(&2usize.into()).unwrap(), "c");
        assert_eq!(
            collection.resolve(&7usize.into()),
            Err(Error::NotFound("#7".into()))
        );
        assert_eq!(
            collection.resolve(&"zz".into()),
            Err(Error::NotFound("zz".into()))
        );
    }

    #[test]
    fn non_finite_priority_is_rejected_before_any_change() {
        let mut collection = seeded();
        let before = collection.mirror().records().to_vec();

        assert!(matches!(
            collection.begin_add("d", Priority::from(f64::NAN), body(json!({"x": 1}))),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            collection.edit(&"a".into(), |draft| {
                draft.set_field("n", json!("changed"));
                draft.priority = Priority::from(f64::INFINITY);
            }),
            Err(Error::InvalidPayload(_))
        ));

        assert_eq!(collection.mirror().records(), &before[..]);
        assert_eq!(collection.pending().total(), 0);
    }

    #[test]
    fn add_then_rollback_restores_state() {
        let mut collection = seeded();
        let before = collection.mirror().records().to_vec();

        let write = collection
            .begin_add("d", Priority::from(10), body(json!({"x": 1})))
            .unwrap();
        assert_eq!(collection.len(), 4);
        assert_eq!(write.changes[0].kind, ChangeKind::Inserted { index: 3 });

        let changes = collection.rollback_add(write.ticket).unwrap();
        assert_eq!(changes, vec![ChangeEvent::removed("d", 3, Origin::Local)]);
        assert_eq!(collection.mirror().records(), before.as_slice());
        assert_eq!(collection.pending().total(), 0);
    }

    #[test]
    fn add_echo_converges() {
        let mut collection = seeded();
        let write = collection
            .begin_add("d", Priority::from(10), body(json!({"x": 1})))
            .unwrap();

        let applied = collection
            .apply(Notification::Added {
                id: "d".into(),
                priority: Priority::from(10),
                after: Anchor::After("c".into()),
                body: body(json!({"x": 1})),
            })
            .unwrap();
        assert!(applied.is_noop());

        collection.complete(write.ticket);
        assert_eq!(collection.mirror().ids().filter(|id| *id == "d").count(), 1);
    }

    #[test]
    fn remove_then_rollback_reinserts_at_original_position() {
        let mut collection = seeded();
        let write = collection.begin_remove(&"b".into()).unwrap();
        assert_eq!(write.changes, vec![ChangeEvent::removed("b", 1, Origin::Local)]);
        assert!(collection.get("b").is_none());

        let changes = collection.rollback_remove(write.ticket, write.record).unwrap();
        assert_eq!(changes, vec![ChangeEvent::inserted("b", 1, Origin::Local)]);
        assert_eq!(collection.mirror().ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_by_index() {
        let mut collection = seeded();
        let write = collection.begin_remove(&0usize.into()).unwrap();
        assert_eq!(write.record.id, "a");
    }

    #[test]
    fn missing_targets_fail_fast() {
        let mut collection = seeded();
        assert!(matches!(
            collection.begin_remove(&"zz".into()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            collection.begin_save(&9usize.into()),
            Err(Error::NotFound(_))
        ));
        assert_eq!(collection.pending().total(), 0);
    }

    #[test]
    fn save_then_remove_is_not_undone_by_save_completion() {
        let mut collection = seeded();
        let save = collection.begin_save(&"b".into()).unwrap();
        let remove = collection.begin_remove(&"b".into()).unwrap();
        assert!(collection.get("b").is_none());

        // Save fails: nothing to roll back
        collection.complete(save.ticket);
        assert!(collection.get("b").is_none());

        collection.complete(remove.ticket);
        assert!(collection.get("b").is_none());
        assert_eq!(collection.pending().total(), 0);
    }

    #[test]
    fn failed_remove_does_not_undo_later_mutation() {
        let mut collection = seeded();
        let first = collection.begin_remove(&"b".into()).unwrap();
        // Record comes back through a later local add with the same id
        let add = collection
            .begin_add("b", Priority::from(2), body(json!({"n": "again"})))
            .unwrap();

        let changes = collection.rollback_remove(first.ticket, first.record).unwrap();
        assert!(changes.is_empty());
        assert_eq!(collection.get("b").unwrap().field("n"), Some(&json!("again")));
        collection.complete(add.ticket);
    }

    #[test]
    fn edit_relocates_and_reports() {
        let mut collection = seeded();
        let changes = collection
            .edit(&"a".into(), |draft| {
                draft.priority = Priority::from(9);
                draft.set_field("n", json!("A"));
            })
            .unwrap();

        assert_eq!(
            changes,
            vec![
                ChangeEvent::changed("a", 0, Origin::Local),
                ChangeEvent::moved("a", 0, 2, Origin::Local),
            ]
        );
        assert_eq!(collection.mirror().ids().collect::<Vec<_>>(), vec!["b", "c", "a"]);

        let save = collection.begin_save(&"a".into()).unwrap();
        assert_eq!(save.record.priority, Priority::from(9));
        assert_eq!(save.record.field("n"), Some(&json!("A")));
        collection.complete(save.ticket);
    }

    #[test]
    fn draft_field_helpers() {
        let mut draft = RecordDraft {
            priority: Priority::None,
            body: RecordBody::Primitive(json!(3)),
        };
        assert_eq!(draft.remove_field("x"), None);
        draft.set_field("x", json!(1));
        assert_eq!(draft.body.to_value(), json!({"x": 1}));
        assert_eq!(draft.remove_field("x"), Some(json!(1)));
    }

    #[test]
    fn snapshot_reflects_readiness() {
        let mut collection = seeded();
        assert!(!collection.snapshot().ready);
        collection.apply(Notification::Ready).unwrap();
        let snapshot = collection.snapshot();
        assert!(snapshot.ready);
        assert_eq!(snapshot.records.len(), 3);
    }
}
