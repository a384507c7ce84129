//! # Ledger Error Types

use agx_core::{AbiError, TxHash};
use thiserror::Error;

/// Errors from ledger submission, confirmation, and reads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The node could not be reached or answered with a transport error.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// An operation did not complete within its bound.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// Time spent.
        elapsed_ms: u64,
    },

    /// The node refused the call before inclusion (simulation revert).
    #[error("{call} rejected by ledger: {reason}")]
    Rejected {
        /// Contract function.
        call: &'static str,
        /// Revert reason.
        reason: String,
    },

    /// The transaction was mined and reverted.
    #[error("transaction {tx} reverted: {reason}")]
    Reverted {
        /// Reverted transaction.
        tx: TxHash,
        /// Revert reason, when known.
        reason: String,
    },

    /// Response could not be decoded.
    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),

    /// ABI decoding failure.
    #[error("abi decode error: {0}")]
    Abi(#[from] AbiError),

    /// Client misconfiguration.
    #[error("ledger configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::Hash32;

    #[test]
    fn transient_classification() {
        assert!(LedgerError::Unavailable("down".into()).is_transient());
        assert!(LedgerError::Timeout { operation: "receipt".into(), elapsed_ms: 10 }.is_transient());
        assert!(!LedgerError::Rejected { call: "releasePayment", reason: "x".into() }.is_transient());
        assert!(!LedgerError::Reverted { tx: TxHash::from_hash(Hash32::ZERO), reason: "x".into() }.is_transient());
    }

    #[test]
    fn rejected_display_names_call() {
        let err = LedgerError::Rejected {
            call: "depositPayment",
            reason: "insufficient allowance".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("depositPayment"));
        assert!(msg.contains("insufficient allowance"));
    }
}
