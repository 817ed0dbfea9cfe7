//! Bookkeeping for local mutations awaiting remote acknowledgment.
//!
//! Every `add`, `remove` and `save` takes a [`Ticket`]. Tickets for the same
//! record are sequenced; when an earlier call fails after a later one has
//! been issued, the earlier call's rollback is skipped so it cannot undo the
//! later mutation.

use crate::RecordId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The local mutation a ticket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Add,
    Remove,
    Save,
}

/// Proof of an in-flight local mutation.
///
/// Deliberately not `Clone`: each ticket is settled exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket {
    id: RecordId,
    seq: u64,
    kind: MutationKind,
}

impl Ticket {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    latest: u64,
    count: usize,
}

/// Outstanding local mutations by record id.
#[derive(Debug, Default)]
pub struct PendingWrites {
    next_seq: u64,
    by_id: HashMap<RecordId, InFlight>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket for a new local mutation of `id`.
    pub fn begin(&mut self, id: impl Into<RecordId>, kind: MutationKind) -> Ticket {
        self.next_seq += 1;
        let seq = self.next_seq;
        let id = id.into();

        let entry = self
            .by_id
            .entry(id.clone())
            .or_insert(InFlight { latest: 0, count: 0 });
        entry.latest = seq;
        entry.count += 1;

        Ticket { id, seq, kind }
    }

    /// Whether `ticket` is still the most recent mutation of its record.
    pub fn is_latest(&self, ticket: &Ticket) -> bool {
        self.by_id
            .get(&ticket.id)
            .is_some_and(|entry| entry.latest == ticket.seq)
    }

    /// Settle a ticket. Returns whether it was the most recent mutation of
    /// its record at the time.
    pub fn finish(&mut self, ticket: Ticket) -> bool {
        let latest = self.is_latest(&ticket);
        if let Some(entry) = self.by_id.get_mut(&ticket.id) {
            entry.count = entry.count.saturating_sub(1);
            if entry.count == 0 {
                self.by_id.remove(&ticket.id);
            }
        }
        latest
    }

    /// Mutations still awaiting acknowledgment for `id`.
    pub fn in_flight(&self, id: &str) -> usize {
        self.by_id.get(id).map_or(0, |entry| entry.count)
    }

    /// Total mutations awaiting acknowledgment.
    pub fn total(&self) -> usize {
        self.by_id.values().map(|entry| entry.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ticket_is_latest() {
        let mut pending = PendingWrites::new();
        let ticket = pending.begin("a", MutationKind::Add);
        assert_eq!(ticket.kind(), MutationKind::Add);
        assert_eq!(pending.in_flight("a"), 1);
        assert!(pending.finish(ticket));
        assert_eq!(pending.in_flight("a"), 0);
        assert_eq!(pending.total(), 0);
    }

    #[test]
    fn later_ticket_supersedes_earlier() {
        let mut pending = PendingWrites::new();
        let save = pending.begin("a", MutationKind::Save);
        let remove = pending.begin("a", MutationKind::Remove);
        assert!(save.seq() < remove.seq());

        assert!(!pending.finish(save));
        assert_eq!(pending.in_flight("a"), 1);
        assert!(pending.finish(remove));
    }

    #[test]
    fn tickets_for_other_records_are_independent() {
        let mut pending = PendingWrites::new();
        let a = pending.begin("a", MutationKind::Add);
        let b = pending.begin("b", MutationKind::Add);
        assert_eq!(pending.total(), 2);
        assert!(pending.finish(a));
        assert!(pending.finish(b));
    }
}
