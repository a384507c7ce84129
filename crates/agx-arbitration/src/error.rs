//! # Arbitration Error Types
//!
//! Every variant carries the record it concerns and the status at the time
//! of failure.

use agx_core::ValidationError;
use thiserror::Error;

/// Errors from escrow and dispute operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationError {
    /// Escrow operation violated status preconditions.
    #[error("escrow for {shipment} cannot perform {operation} in status {status}")]
    InvalidEscrowOperation {
        /// Shipment key of the escrow.
        shipment: String,
        /// Attempted operation.
        operation: &'static str,
        /// Current escrow status.
        status: String,
    },

    /// A live escrow already exists for the shipment.
    #[error("shipment {shipment} already has an escrow in status {status}")]
    EscrowExists {
        /// Shipment key.
        shipment: String,
        /// Status of the existing escrow.
        status: String,
    },

    /// Only the payer may cancel.
    #[error("caller {caller} is not the payer of escrow for {shipment}")]
    NotPayer {
        /// Shipment key.
        shipment: String,
        /// Caller address.
        caller: String,
    },

    /// Payer cancellation attempted after the window closed.
    #[error("cancellation window of {window_secs}s for {shipment} closed at {closed_at}")]
    CancellationWindowClosed {
        /// Shipment key.
        shipment: String,
        /// Window length.
        window_secs: u64,
        /// When it closed.
        closed_at: String,
    },

    /// Amount was zero.
    #[error("escrow amount must be positive")]
    ZeroAmount,

    /// Splits or another primitive failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Dispute is not open.
    #[error("dispute {dispute_id} is in terminal state {state}")]
    TerminalState {
        /// Dispute id.
        dispute_id: String,
        /// Terminal state name.
        state: String,
    },

    /// Evidence reference was empty.
    #[error("evidence hash must be non-empty")]
    EmptyEvidence,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_escrow_operation_display() {
        let err = ArbitrationError::InvalidEscrowOperation {
            shipment: "0xabc".into(),
            operation: "release",
            status: "RELEASED".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0xabc"));
        assert!(msg.contains("release"));
        assert!(msg.contains("RELEASED"));
    }

    #[test]
    fn terminal_state_display() {
        let err = ArbitrationError::TerminalState {
            dispute_id: "dispute:3".into(),
            state: "RESOLVED".into(),
        };
        assert!(err.to_string().contains("dispute:3"));
    }

    #[test]
    fn split_error_is_transparent() {
        let err: ArbitrationError = ValidationError::SplitOverflow { total: 10_001 }.into();
        assert!(err.to_string().contains("10001"));
    }

    #[test]
    fn window_display() {
        let err = ArbitrationError::CancellationWindowClosed {
            shipment: "0x1".into(),
            window_secs: 3600,
            closed_at: "2026-01-01T01:00:00Z".into(),
        };
        assert!(err.to_string().contains("3600s"));
    }
}
