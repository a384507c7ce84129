//! # Coordinator Error Types
//!
//! Every lower-layer failure is folded into one of a few categories callers
//! act on differently:
//!
//! | Variant | Reached the ledger | Retry |
//! |---|---|---|
//! | `Validation` | no | never; fix the request |
//! | `Signature` | maybe | never |
//! | `LedgerRejected` | yes | never blind |
//! | `NetworkUnavailable` | no | yes, with backoff |
//! | `NetworkTimeout` | unknown | yes, with backoff |
//! | `ProjectionConflict` | yes | after the re-sync, re-evaluate |

use agx_arbitration::ArbitrationError;
use agx_core::ValidationError;
use agx_crypto::CryptoError;
use agx_ledger::LedgerError;
use agx_state::{RejectionReason, TransitionRejection};
use agx_sync::SyncError;
use thiserror::Error;

/// Errors returned by coordinator operations.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Wrong actor, wrong state, or a failed precondition. Nothing was
    /// submitted and the projection is unchanged.
    #[error("validation failed: {0}")]
    Validation(#[from] TransitionRejection),

    /// The payload could not be signed, the local recovery check failed, or
    /// the ledger refused the recovered signer.
    #[error("signature error: {0}")]
    Signature(#[from] CryptoError),

    /// The ledger refused or reverted the call.
    #[error("{call} rejected by ledger: {reason}")]
    LedgerRejected {
        /// Contract function.
        call: String,
        /// Revert reason.
        reason: String,
    },

    /// The node could not be reached.
    #[error("{call} failed: ledger node unreachable ({reason})")]
    NetworkUnavailable {
        /// Contract function or read.
        call: String,
        /// Transport error.
        reason: String,
    },

    /// The confirmation did not arrive in time.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    NetworkTimeout {
        /// What was being waited for.
        operation: String,
        /// Time spent.
        elapsed_ms: u64,
    },

    /// The projection disagreed with the ledger. It has been re-synced.
    #[error("projection conflict on shipment {shipment}: {detail}")]
    ProjectionConflict {
        /// Shipment key.
        shipment: String,
        /// What disagreed.
        detail: String,
    },

    /// A record the operation needs does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Record kind.
        kind: &'static str,
        /// Record key.
        key: String,
    },

    /// Malformed input (amount, identifier).
    #[error("invalid input: {0}")]
    Input(#[from] ValidationError),

    /// Store or content-store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoordinatorError {
    /// A guard-style rejection built in the coordinator itself.
    pub fn rejected(reason: RejectionReason, action: &'static str, detail: impl Into<String>) -> Self {
        Self::Validation(TransitionRejection::new(reason, action, detail))
    }

    /// Map an escrow or dispute model error to a rejection of `action`.
    pub fn arbitration(action: &'static str, e: ArbitrationError) -> Self {
        let reason = match &e {
            ArbitrationError::InvalidEscrowOperation { .. } | ArbitrationError::TerminalState { .. } => {
                RejectionReason::WrongState
            }
            ArbitrationError::NotPayer { .. } => RejectionReason::WrongActor,
            ArbitrationError::EscrowExists { .. }
            | ArbitrationError::CancellationWindowClosed { .. }
            | ArbitrationError::ZeroAmount
            | ArbitrationError::Validation(_)
            | ArbitrationError::EmptyEvidence => RejectionReason::PreconditionNotMet,
        };
        Self::rejected(reason, action, e.to_string())
    }

    /// Map a ledger failure of `call`.
    pub fn ledger(call: &str, e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(reason) => Self::NetworkUnavailable {
                call: call.to_string(),
                reason,
            },
            LedgerError::Timeout {
                operation,
                elapsed_ms,
            } => Self::NetworkTimeout {
                operation,
                elapsed_ms,
            },
            LedgerError::Rejected { reason, .. } | LedgerError::Reverted { reason, .. } => {
                if is_signer_refusal(&reason) {
                    Self::Signature(CryptoError::Signing(format!("ledger refused {call}: {reason}")))
                } else {
                    Self::LedgerRejected {
                        call: call.to_string(),
                        reason,
                    }
                }
            }
            other => Self::LedgerRejected {
                call: call.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Whether the same request may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable { .. } | Self::NetworkTimeout { .. })
    }

    /// The rejection category, for validation failures.
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            Self::Validation(r) => Some(r.reason),
            _ => None,
        }
    }
}

fn is_signer_refusal(reason: &str) -> bool {
    reason.contains("not an attestor") || reason.contains("invalid signature")
}

impl From<SyncError> for CoordinatorError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Conflict { key, detail, .. } => Self::ProjectionConflict { shipment: key, detail },
            SyncError::NotFound { kind, key } => Self::NotFound { kind, key },
            SyncError::Ledger(e) => Self::ledger("ledger read", e),
            other => Self::Storage(other.to_string()),
        }
    }
}
