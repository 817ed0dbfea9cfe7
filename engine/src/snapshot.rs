//! Read-only snapshots of a mirror.
//!
//! A snapshot is an ordered copy of the records at one point in time. Readers
//! get snapshots instead of access to the live mirror; snapshots also
//! serialize to JSON for diagnostics and can seed a new mirror.

use std::collections::HashSet;

use crate::{error::Result, mirror::OrderedMirror, Error, Record};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Ordered copy of a mirror's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Whether initial sync had completed when the snapshot was taken
    pub ready: bool,
    /// Records in mirror order
    pub records: Vec<Record>,
}

impl MirrorSnapshot {
    /// Copy the current state of a mirror.
    pub fn capture(mirror: &OrderedMirror, ready: bool) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            ready,
            records: mirror.records().to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids in order.
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Check that the records are unique and in sort order.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            if !seen.insert(record.id.as_str()) {
                return Err(Error::InvalidSnapshot(format!(
                    "duplicate record id: {}",
                    record.id
                )));
            }
        }
        for pair in self.records.windows(2) {
            if pair[0].sort_key() >= pair[1].sort_key() {
                return Err(Error::InvalidSnapshot(format!(
                    "'{}' is out of order after '{}'",
                    pair[1].id, pair[0].id
                )));
            }
        }
        Ok(())
    }

    /// Rebuild a mirror from the snapshot.
    pub fn into_mirror(self) -> Result<OrderedMirror> {
        self.validate()?;
        OrderedMirror::from_records(self.records)
            .map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
