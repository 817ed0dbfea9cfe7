//! Error types for the tether engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the tether engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Structural errors
    #[error("duplicate record id: {0}")]
    DuplicateId(RecordId),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("mirror invariant violated: {0}")]
    InvariantViolation(String),

    // Input errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    // Remote errors
    #[error("remote write failed for '{id}': {reason}")]
    RemoteWrite { id: RecordId, reason: String },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Build a `RemoteWrite` error for the given record.
    pub fn remote_write(id: impl Into<RecordId>, reason: impl ToString) -> Self {
        Error::RemoteWrite {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller can recover from this error.
    ///
    /// Duplicate ids and invariant violations point at a reconciliation
    /// defect; everything else is an expected runtime condition.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::DuplicateId(_) | Error::InvariantViolation(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
