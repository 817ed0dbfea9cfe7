//! Reconciliation of remote notifications into the local mirror.
//!
//! Notifications are applied strictly in arrival order. Each kind is
//! idempotent:
//!
//! - `added` for an id already present (the echo of a local `add`, or a
//!   duplicate delivery) degenerates to a field update
//! - `changed` for an absent id is a late notification for a record that is
//!   already gone and is ignored
//! - `removed` for an absent id is a no-op
//! - `moved` to the slot a record already holds is a no-op, and `moved` for
//!   an absent id is treated as `added`
//!
//! The `ready` sentinel is forwarded to the [`ReadinessTracker`] once.

use crate::{
    error::Result,
    events::ChangeEvent,
    mirror::{Anchor, OrderedMirror},
    notification::{Notification, RawNotification},
    readiness::{ReadinessTracker, ReadyCallback},
    record::{Origin, Priority, RecordBody},
    Record, RecordId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Counters describing what the reconciler has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStats {
    /// Notifications applied to the mirror (including no-op re-deliveries)
    pub applied: u64,
    /// Notifications for records the mirror does not hold
    pub ignored: u64,
    /// Notifications dropped because they could not be interpreted
    pub malformed: u64,
}

/// Outcome of applying one notification.
///
/// Ready callbacks are handed back rather than invoked so the owner can run
/// them outside of any lock it holds.
#[derive(Default)]
pub struct Applied {
    pub changes: Vec<ChangeEvent>,
    pub ready: Vec<ReadyCallback>,
}

impl Applied {
    fn changes(changes: Vec<ChangeEvent>) -> Self {
        Self {
            changes,
            ready: Vec::new(),
        }
    }

    /// Whether the notification left no observable trace.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.ready.is_empty()
    }

    /// Run the ready callbacks, returning the change events.
    pub fn fire_ready(self) -> Vec<ChangeEvent> {
        for callback in self.ready {
            callback();
        }
        self.changes
    }
}

impl std::fmt::Debug for Applied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applied")
            .field("changes", &self.changes)
            .field("ready", &self.ready.len())
            .finish()
    }
}

/// Applies remote notifications to an [`OrderedMirror`].
#[derive(Debug, Default)]
pub struct Reconciler {
    mirror: OrderedMirror,
    readiness: ReadinessTracker,
    stats: ReconcileStats,
}

impl Reconciler {
    /// Create a reconciler over an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reconciler over an existing mirror.
    pub fn with_mirror(mirror: OrderedMirror) -> Self {
        Self {
            mirror,
            ..Self::default()
        }
    }

    pub fn mirror(&self) -> &OrderedMirror {
        &self.mirror
    }

    pub(crate) fn mirror_mut(&mut self) -> &mut OrderedMirror {
        &mut self.mirror
    }

    pub fn readiness(&self) -> &ReadinessTracker {
        &self.readiness
    }

    pub fn readiness_mut(&mut self) -> &mut ReadinessTracker {
        &mut self.readiness
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Apply a notification as delivered by the transport.
    ///
    /// Malformed notifications are logged and dropped; the stream continues.
    pub fn apply_raw(&mut self, raw: RawNotification) -> Result<Applied> {
        match Notification::try_from(raw) {
            Ok(notification) => self.apply(notification),
            Err(e) => {
                warn!(error = %e, "dropping malformed notification");
                self.stats.malformed += 1;
                Ok(Applied::default())
            }
        }
    }

    /// Apply a validated notification.
    ///
    /// An error here means the mirror refused a structural change; the
    /// notification is abandoned and the mirror is left as it was.
    pub fn apply(&mut self, notification: Notification) -> Result<Applied> {
        let kind = notification.kind();
        let id = notification.id().map(str::to_string);

        let result = match notification {
            Notification::Added {
                id,
                priority,
                after,
                body,
            } => self.apply_added(id, priority, after, body).map(Applied::changes),
            Notification::Changed { id, body } => self.apply_changed(&id, body).map(Applied::changes),
            Notification::Removed { id } => self.apply_removed(&id).map(Applied::changes),
            Notification::Moved {
                id,
                priority,
                after,
                body,
            } => self.apply_moved(id, priority, after, body).map(Applied::changes),
            Notification::Ready => Ok(self.apply_ready()),
        };

        match &result {
            Ok(_) => self.stats.applied += 1,
            Err(e) => error!(kind, id = ?id, error = %e, "notification rejected by mirror"),
        }
        result
    }

    fn apply_added(
        &mut self,
        id: RecordId,
        priority: Priority,
        after: Anchor,
        body: RecordBody,
    ) -> Result<Vec<ChangeEvent>> {
        if self.mirror.contains(&id) {
            debug!(id = %id, "added for a record already present, updating in place");
            return self.update_existing(&id, priority, Some(&after), Some(body));
        }

        let index = self
            .mirror
            .insert_hinted(Record::new(id.clone(), priority, body), &after)?;
        Ok(vec![ChangeEvent::inserted(id, index, Origin::Remote)])
    }

    fn apply_changed(&mut self, id: &str, body: RecordBody) -> Result<Vec<ChangeEvent>> {
        if !self.mirror.contains(id) {
            debug!(id = %id, "changed for an absent record, ignoring");
            self.stats.ignored += 1;
            return Ok(Vec::new());
        }

        let (index, changed) = self.mirror.replace_body(id, body)?;
        Ok(if changed {
            vec![ChangeEvent::changed(id, index, Origin::Remote)]
        } else {
            Vec::new()
        })
    }

    fn apply_removed(&mut self, id: &str) -> Result<Vec<ChangeEvent>> {
        if !self.mirror.contains(id) {
            debug!(id = %id, "removed for an absent record, ignoring");
            self.stats.ignored += 1;
            return Ok(Vec::new());
        }

        let (index, _) = self.mirror.remove_by_id(id)?;
        Ok(vec![ChangeEvent::removed(id, index, Origin::Remote)])
    }

    fn apply_moved(
        &mut self,
        id: RecordId,
        priority: Priority,
        after: Anchor,
        body: Option<RecordBody>,
    ) -> Result<Vec<ChangeEvent>> {
        if self.mirror.contains(&id) {
            return self.update_existing(&id, priority, Some(&after), body);
        }

        match body {
            Some(body) => {
                debug!(id = %id, "moved for an absent record, treating as added");
                self.apply_added(id, priority, after, body)
            }
            None => {
                warn!(id = %id, "moved for an absent record without payload, ignoring");
                self.stats.ignored += 1;
                Ok(Vec::new())
            }
        }
    }

    fn apply_ready(&mut self) -> Applied {
        if self.readiness.is_ready() {
            debug!("duplicate ready sentinel ignored");
            return Applied::default();
        }
        debug!(records = self.mirror.len(), "initial sync complete");
        Applied {
            changes: Vec::new(),
            ready: self.readiness.mark_ready(),
        }
    }

    /// Bring an existing record's body and position up to date.
    fn update_existing(
        &mut self,
        id: &str,
        priority: Priority,
        anchor: Option<&Anchor>,
        body: Option<RecordBody>,
    ) -> Result<Vec<ChangeEvent>> {
        let mut changes = Vec::new();

        if let Some(body) = body {
            let (index, changed) = self.mirror.replace_body(id, body)?;
            if changed {
                changes.push(ChangeEvent::changed(id, index, Origin::Remote));
            }
        }

        let same_priority = self
            .mirror
            .get(id)
            .is_some_and(|record| record.priority == priority);
        if !same_priority {
            let relocation = self.mirror.relocate(id, priority, anchor)?;
            if relocation.moved() {
                changes.push(ChangeEvent::moved(
                    id,
                    relocation.from,
                    relocation.to,
                    Origin::Remote,
                ));
            }
        }

        Ok(changes)
    }
}
