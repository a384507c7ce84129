//! # Dispute Lifecycle
//!
//! `Open → {Resolved | Rejected}`. The dispute id is assigned by the ledger
//! and captured from the `DisputeRaised` event, so a dispute record only
//! exists once the ledger has accepted `raiseDispute`.
//!
//! Resolution is single-shot: a second `resolve` or `reject` fails with
//! [`ArbitrationError::TerminalState`], which keeps escrow from being
//! settled twice.

use agx_core::{Address, DisputeId, ShipmentKey, Timestamp, TxHash};
use serde::{Deserialize, Serialize};

use crate::error::ArbitrationError;

/// Dispute status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    /// Accepting evidence.
    Open,
    /// Decided with a resolution. Terminal.
    Resolved,
    /// Dismissed without touching escrow. Terminal.
    Rejected,
}

impl DisputeStatus {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Resolved => "RESOLVED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a resolved dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Return escrowed funds to the payer.
    RefundPayer,
    /// Pay escrowed funds out by the agreed split.
    ReleaseFunds,
}

impl Resolution {
    /// The `uint8` passed to `resolveDispute`.
    pub fn ledger_code(&self) -> u8 {
        match self {
            Self::RefundPayer => 0,
            Self::ReleaseFunds => 1,
        }
    }

    /// Inverse of [`Resolution::ledger_code`].
    pub fn from_ledger_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::RefundPayer),
            1 => Some(Self::ReleaseFunds),
            _ => None,
        }
    }
}

/// One piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Submitting account.
    pub submitter: Address,
    /// Content identifier.
    pub evidence_hash: String,
    /// Submission time.
    pub timestamp: Timestamp,
    /// Recording transaction.
    pub tx: Option<TxHash>,
}

/// A dispute record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Ledger-assigned id.
    pub id: DisputeId,
    /// Disputed shipment.
    pub shipment: ShipmentKey,
    /// Raising account.
    pub raised_by: Address,
    /// Reason given when raising.
    pub reason: String,
    /// Current status.
    pub status: DisputeStatus,
    /// Ordered evidence.
    pub evidence: Vec<Evidence>,
    /// Set once resolved.
    pub resolution: Option<Resolution>,
    /// Resolver's note (resolution or rejection).
    pub note: Option<String>,
    /// When raised.
    pub raised_at: Timestamp,
    /// Last change.
    pub updated_at: Timestamp,
    /// Compare-and-swap token.
    pub version: u64,
}

impl Dispute {
    /// A newly raised dispute.
    pub fn open(
        id: DisputeId,
        shipment: ShipmentKey,
        raised_by: Address,
        reason: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            id,
            shipment,
            raised_by,
            reason: reason.into(),
            status: DisputeStatus::Open,
            evidence: Vec::new(),
            resolution: None,
            note: None,
            raised_at: at,
            updated_at: at,
            version: 0,
        }
    }

    /// Fail unless the dispute is open.
    pub fn require_open(&self) -> Result<(), ArbitrationError> {
        if self.status.is_terminal() {
            return Err(ArbitrationError::TerminalState {
                dispute_id: self.id.to_string(),
                state: self.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Append evidence.
    pub fn add_evidence(&mut self, evidence: Evidence) -> Result<(), ArbitrationError> {
        self.require_open()?;
        if evidence.evidence_hash.trim().is_empty() {
            return Err(ArbitrationError::EmptyEvidence);
        }
        self.updated_at = evidence.timestamp;
        self.evidence.push(evidence);
        Ok(())
    }

    /// Open → Resolved.
    pub fn resolve(
        &mut self,
        resolution: Resolution,
        note: impl Into<String>,
        at: Timestamp,
    ) -> Result<(), ArbitrationError> {
        self.require_open()?;
        self.status = DisputeStatus::Resolved;
        self.resolution = Some(resolution);
        self.note = Some(note.into());
        self.updated_at = at;
        Ok(())
    }

    /// Open → Rejected.
    pub fn reject(&mut self, note: impl Into<String>, at: Timestamp) -> Result<(), ArbitrationError> {
        self.require_open()?;
        self.status = DisputeStatus::Rejected;
        self.note = Some(note.into());
        self.updated_at = at;
        Ok(())
    }
}
