//! OrderedMirror - the sorted, deduplicated local copy of a collection.
//!
//! Records are kept in a `Vec` sorted by [`SortKey`]. An auxiliary
//! `id -> priority` index lets every lookup rebuild the full sort key of a
//! record and binary-search for it, so finding a record by id never scans the
//! sequence. The index is updated on every structural change.

use crate::{
    error::Result,
    record::{Priority, RecordBody, SortKey},
    Error, Record, RecordId,
};
use std::collections::HashMap;
use tracing::{debug, error};

/// Where a notification says a record should sit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Anchor {
    /// At the start of the collection
    #[default]
    First,
    /// Directly after the record with this id
    After(RecordId),
}

impl Anchor {
    /// Build an anchor from a preceding sibling id (`None` means first).
    pub fn from_preceding(preceding: Option<RecordId>) -> Self {
        match preceding {
            Some(id) => Anchor::After(id),
            None => Anchor::First,
        }
    }

    /// The preceding sibling id, if any.
    pub fn preceding_id(&self) -> Option<&str> {
        match self {
            Anchor::First => None,
            Anchor::After(id) => Some(id),
        }
    }
}

/// Positions of a relocated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub from: usize,
    pub to: usize,
}

impl Relocation {
    /// Whether the record ended up in a different slot.
    pub fn moved(&self) -> bool {
        self.from != self.to
    }
}

/// Records sorted by `(priority, id)` with unique ids.
#[derive(Debug, Clone, Default)]
pub struct OrderedMirror {
    records: Vec<Record>,
    index: HashMap<RecordId, Priority>,
}

impl OrderedMirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a mirror from records in any order.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Result<Self> {
        let mut mirror = Self::new();
        for record in records {
            mirror.insert(record)?;
        }
        Ok(mirror)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The records in order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Record at a position.
    pub fn at(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Record by id.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.index_of(id).map(|pos| &self.records[pos])
    }

    /// Position of a record.
    ///
    /// An index/sequence disagreement is logged and reported as absent; the
    /// mutating operations surface it as [`Error::InvariantViolation`].
    pub fn index_of(&self, id: &str) -> Option<usize> {
        match self.locate(id) {
            Ok(pos) => pos,
            Err(e) => {
                error!(id = %id, error = %e, "mirror lookup failed");
                None
            }
        }
    }

    /// The anchor describing the slot at `index` (its preceding sibling).
    pub fn anchor_at(&self, index: usize) -> Anchor {
        match index.checked_sub(1).and_then(|prev| self.records.get(prev)) {
            Some(prev) => Anchor::After(prev.id.clone()),
            None => Anchor::First,
        }
    }

    /// Insert a record at its sorted position.
    pub fn insert(&mut self, record: Record) -> Result<usize> {
        self.place(record, None)
    }

    /// Insert a record, preferring the slot after the anchor when that slot is
    /// consistent with sort order.
    pub fn insert_hinted(&mut self, record: Record, anchor: &Anchor) -> Result<usize> {
        self.place(record, Some(anchor))
    }

    /// Remove a record by id, returning its former position.
    pub fn remove_by_id(&mut self, id: &str) -> Result<(usize, Record)> {
        let pos = self.position(id)?;
        self.index.remove(id);
        Ok((pos, self.records.remove(pos)))
    }

    /// Give a record a new priority and move it to the matching slot.
    pub fn relocate(
        &mut self,
        id: &str,
        priority: Priority,
        anchor: Option<&Anchor>,
    ) -> Result<Relocation> {
        let from = self.position(id)?;
        let mut record = self.records.remove(from);
        self.index.remove(id);

        record.priority = priority;
        let to = self.placement(record.sort_key(), anchor);
        self.index.insert(record.id.clone(), record.priority.clone());
        self.records.insert(to, record);

        Ok(Relocation { from, to })
    }

    /// Replace a record's body in place. Returns its position and whether the
    /// body actually changed.
    pub fn replace_body(&mut self, id: &str, body: RecordBody) -> Result<(usize, bool)> {
        let pos = self.position(id)?;
        let record = &mut self.records[pos];
        if record.body == body {
            return Ok((pos, false));
        }
        record.body = body;
        Ok((pos, true))
    }

    /// Check uniqueness, ordering and index consistency.
    pub fn verify(&self) -> Result<()> {
        if self.index.len() != self.records.len() {
            return Err(Error::InvariantViolation(format!(
                "index holds {} ids but sequence holds {} records",
                self.index.len(),
                self.records.len()
            )));
        }
        for pair in self.records.windows(2) {
            if pair[0].sort_key() >= pair[1].sort_key() {
                return Err(Error::InvariantViolation(format!(
                    "'{}' is not ordered before '{}'",
                    pair[0].id, pair[1].id
                )));
            }
        }
        for record in &self.records {
            match self.index.get(&record.id) {
                Some(priority) if *priority == record.priority => {}
                _ => {
                    return Err(Error::InvariantViolation(format!(
                        "index entry for '{}' is missing or stale",
                        record.id
                    )))
                }
            }
        }
        Ok(())
    }

    fn place(&mut self, record: Record, anchor: Option<&Anchor>) -> Result<usize> {
        if self.index.contains_key(&record.id) {
            return Err(Error::DuplicateId(record.id));
        }
        let slot = self.placement(record.sort_key(), anchor);
        self.index.insert(record.id.clone(), record.priority.clone());
        self.records.insert(slot, record);
        Ok(slot)
    }

    fn locate(&self, id: &str) -> Result<Option<usize>> {
        let Some(priority) = self.index.get(id) else {
            return Ok(None);
        };
        let key = SortKey::new(priority, id);
        match self.records.binary_search_by(|r| r.sort_key().cmp(&key)) {
            Ok(pos) => Ok(Some(pos)),
            Err(_) => Err(Error::InvariantViolation(format!(
                "index lists '{id}' but the sequence does not hold it"
            ))),
        }
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.locate(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn sorted_slot(&self, key: SortKey<'_>) -> usize {
        self.records.partition_point(|r| r.sort_key() < key)
    }

    fn hinted_slot(&self, key: SortKey<'_>, anchor: &Anchor) -> Option<usize> {
        let slot = match anchor {
            Anchor::First => 0,
            Anchor::After(prev) => self.locate(prev).ok().flatten()? + 1,
        };
        let fits_after = slot == 0 || self.records[slot - 1].sort_key() < key;
        let fits_before = slot == self.records.len() || key < self.records[slot].sort_key();
        (fits_after && fits_before).then_some(slot)
    }

    fn placement(&self, key: SortKey<'_>, anchor: Option<&Anchor>) -> usize {
        if let Some(anchor) = anchor {
            if let Some(slot) = self.hinted_slot(key, anchor) {
                return slot;
            }
            debug!(
                id = %key.id,
                anchor = ?anchor,
                "placement hint is stale or out of order, using sort key"
            );
        }
        self.sorted_slot(key)
    }
}
