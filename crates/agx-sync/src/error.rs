//! # Sync Error Types

use agx_ledger::LedgerError;
use thiserror::Error;

/// Errors from the projection store, queue, projector, and worker.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A compare-and-swap write lost a race or the projection disagrees
    /// with the ledger.
    #[error("projection conflict on {kind} {key}: {detail}")]
    Conflict {
        /// Record kind (`shipment`, `escrow`, `dispute`).
        kind: &'static str,
        /// Record key.
        key: String,
        /// What disagreed.
        detail: String,
    },

    /// Record not found.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Record kind.
        kind: &'static str,
        /// Record key.
        key: String,
    },

    /// Queue entry cannot move from its current status.
    #[error("queue entry {id} is {status}, cannot {operation}")]
    InvalidQueueOperation {
        /// Entry id.
        id: String,
        /// Current status.
        status: String,
        /// Attempted operation.
        operation: &'static str,
    },

    /// Ledger read failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored document could not be decoded.
    #[error("corrupt {kind} record {key}: {reason}")]
    Corrupt {
        /// Record kind.
        kind: &'static str,
        /// Record key.
        key: String,
        /// Decoder message.
        reason: String,
    },
}

impl SyncError {
    /// A version mismatch on a CAS write.
    pub fn version_mismatch(kind: &'static str, key: impl ToString, expected: Option<u64>, found: Option<u64>) -> Self {
        let show = |v: Option<u64>| v.map_or_else(|| "absent".to_string(), |v| v.to_string());
        Self::Conflict {
            kind,
            key: key.to_string(),
            detail: format!("expected version {}, found {}", show(expected), show(found)),
        }
    }

    /// Whether a re-read and retry may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_mismatch_display() {
        let err = SyncError::version_mismatch("shipment", "0xab", Some(3), Some(4));
        let msg = err.to_string();
        assert!(msg.contains("shipment 0xab"));
        assert!(msg.contains("expected version 3, found 4"));
        assert!(err.is_conflict());
    }

    #[test]
    fn absent_versions_are_named() {
        let err = SyncError::version_mismatch("escrow", "k", None, Some(0));
        assert!(err.to_string().contains("expected version absent, found 0"));
    }

    #[test]
    fn ledger_errors_pass_through() {
        let err: SyncError = LedgerError::Unavailable("down".into()).into();
        assert_eq!(err.to_string(), "ledger unavailable: down");
        assert!(!err.is_conflict());
    }
}
