//! # Shipment Projection Record
//!
//! The mutable off-chain view of one shipment. The ledger is authoritative;
//! this record exists for fast reads and for the guards, and is brought back
//! in line by the event projector.
//!
//! ## Invariants
//!
//! - `timeline` is append-only and never empty.
//! - `status == timeline.last().status`.
//! - `version` increases by one on every persisted change and is the
//!   compare-and-swap token for writers.
//!
//! A timeline entry's [`Confirmation`] may move from `Tentative` to
//! `Confirmed` or `Failed`. Its status and position never change. A failed
//! entry is followed by a new entry restoring the previous status.

use agx_core::{
    Actor, Address, DisputeId, LedgerPosition, ProfileId, ShipmentKey, ShipmentRef, Timestamp,
    TokenAmount, TxHash,
};
use agx_crypto::ProofType;
use serde::{Deserialize, Serialize};

use crate::status::ShipmentStatus;

/// Ledger confirmation of a timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Confirmation {
    /// Off-chain only; nothing to confirm.
    Local,
    /// Written after submission, before the ledger event was observed.
    Tentative {
        /// Submitted transaction.
        tx: TxHash,
    },
    /// The ledger event was observed.
    Confirmed {
        /// Confirming transaction.
        tx: TxHash,
        /// Block that included it.
        block: u64,
    },
    /// The submission reverted or was abandoned.
    Failed {
        /// Failed transaction.
        tx: TxHash,
    },
}

/// One status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Status entered.
    pub status: ShipmentStatus,
    /// When. Replaced by block time on confirmation.
    pub timestamp: Timestamp,
    /// Free-text description.
    pub details: String,
    /// Ledger confirmation.
    pub confirmation: Confirmation,
}

/// A transition submitted to the ledger and not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TentativeTransition {
    /// Submitted transaction.
    pub tx: TxHash,
    /// Status before the transition.
    pub from: ShipmentStatus,
    /// Status written optimistically.
    pub to: ShipmentStatus,
    /// Submission time.
    pub submitted_at: Timestamp,
}

/// An attested weight measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weighment {
    /// Measured weight.
    pub weight_kg: u128,
    /// Attestation time.
    pub timestamp: Timestamp,
    /// Attestor that signed it.
    pub attestor: Address,
    /// Content identifier of the ticket.
    pub weigh_hash: String,
    /// Transaction that recorded it, once submitted.
    pub tx: Option<TxHash>,
}

/// An attested proof document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    /// Kind of evidence.
    pub proof_type: ProofType,
    /// Content identifier.
    pub proof_hash: String,
    /// Attestor that signed it.
    pub attestor: Address,
    /// Attestation time.
    pub timestamp: Timestamp,
    /// Recording transaction.
    pub tx: Option<TxHash>,
}

/// The shipment projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    /// Off-chain reference.
    pub reference: ShipmentRef,
    /// Canonical ledger key.
    pub key: ShipmentKey,
    /// Current status; always equals the last timeline status.
    pub status: ShipmentStatus,
    /// Ask price in token base units.
    pub ask_price: TokenAmount,
    /// Producer profile.
    pub farmer_id: ProfileId,
    /// Producer account.
    pub farmer_address: Address,
    /// Buyer profile, once an offer is made.
    pub industry_id: Option<ProfileId>,
    /// Buyer account, once an offer is made.
    pub industry_address: Option<Address>,
    /// Assigned carrier account.
    pub transporter: Option<Address>,
    /// Carrier nominated by the producer.
    pub farmer_nomination: Option<Address>,
    /// Carrier nominated by the buyer.
    pub industry_nomination: Option<Address>,
    /// Append-only status history.
    pub timeline: Vec<TimelineEntry>,
    /// Attested weighments.
    pub weighments: Vec<Weighment>,
    /// Attested proofs.
    pub proofs: Vec<ProofRecord>,
    /// Dispute raised against this shipment.
    pub dispute_id: Option<DisputeId>,
    /// Optimistic write awaiting confirmation.
    pub tentative: Option<TentativeTransition>,
    /// Last ledger event folded into this record.
    pub last_event: Option<LedgerPosition>,
    /// Compare-and-swap token.
    pub version: u64,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last change.
    pub updated_at: Timestamp,
}

impl Shipment {
    /// A new `Pending` shipment listed by `farmer`.
    pub fn create(
        reference: ShipmentRef,
        farmer: &Actor,
        ask_price: TokenAmount,
        at: Timestamp,
        confirmation: Confirmation,
    ) -> Self {
        let key = reference.key();
        Self {
            reference,
            key,
            status: ShipmentStatus::Pending,
            ask_price,
            farmer_id: farmer.profile_id.clone(),
            farmer_address: farmer.address,
            industry_id: None,
            industry_address: None,
            transporter: None,
            farmer_nomination: None,
            industry_nomination: None,
            timeline: vec![TimelineEntry {
                status: ShipmentStatus::Pending,
                timestamp: at,
                details: "listed".into(),
                confirmation,
            }],
            weighments: Vec::new(),
            proofs: Vec::new(),
            dispute_id: None,
            tentative: None,
            last_event: None,
            version: 0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Append a status change. The only way `status` moves.
    pub fn push_status(
        &mut self,
        status: ShipmentStatus,
        at: Timestamp,
        details: impl Into<String>,
        confirmation: Confirmation,
    ) {
        self.timeline.push(TimelineEntry {
            status,
            timestamp: at,
            details: details.into(),
            confirmation,
        });
        self.status = status;
        self.updated_at = at;
    }

    /// Record a submitted transition optimistically.
    pub fn push_tentative(
        &mut self,
        to: ShipmentStatus,
        tx: TxHash,
        at: Timestamp,
        details: impl Into<String>,
    ) {
        self.tentative = Some(TentativeTransition {
            tx,
            from: self.status,
            to,
            submitted_at: at,
        });
        if to != self.status {
            self.push_status(to, at, details, Confirmation::Tentative { tx });
        } else {
            self.updated_at = at;
        }
    }

    /// Promote every entry written for `tx` to confirmed, stamping block
    /// time. Returns whether anything changed.
    pub fn confirm_tx(&mut self, tx: &TxHash, block: u64, block_time: Timestamp) -> bool {
        let mut changed = false;
        for entry in &mut self.timeline {
            if entry.confirmation == (Confirmation::Tentative { tx: *tx }) {
                entry.confirmation = Confirmation::Confirmed { tx: *tx, block };
                entry.timestamp = block_time;
                changed = true;
            }
        }
        if self.tentative.as_ref().map(|t| &t.tx) == Some(tx) {
            self.tentative = None;
            changed = true;
        }
        changed
    }

    /// Mark the entries for `tx` failed and restore the status the tentative
    /// transition started from. Returns whether anything changed.
    pub fn fail_tx(&mut self, tx: &TxHash, at: Timestamp, reason: &str) -> bool {
        let Some(tentative) = self.tentative.clone().filter(|t| t.tx == *tx) else {
            return false;
        };
        for entry in &mut self.timeline {
            if entry.confirmation == (Confirmation::Tentative { tx: *tx }) {
                entry.confirmation = Confirmation::Failed { tx: *tx };
            }
        }
        self.tentative = None;
        if self.status != tentative.from {
            self.push_status(
                tentative.from,
                at,
                format!("reverted: {reason}"),
                Confirmation::Local,
            );
        } else {
            self.updated_at = at;
        }
        true
    }

    /// Whether `address` or `profile` belongs to a party of this shipment.
    pub fn is_participant(&self, actor: &Actor) -> bool {
        actor.profile_id == self.farmer_id
            || self.industry_id.as_ref() == Some(&actor.profile_id)
            || self.transporter == Some(actor.address)
    }

    /// Check the structural invariants.
    pub fn invariants_hold(&self) -> bool {
        self.timeline.last().map(|e| e.status) == Some(self.status)
    }

    /// Canonical JSON bytes of the record; used to prove a rejected
    /// operation left the projection untouched.
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::{keccak256, Role};

    fn farmer() -> Actor {
        Actor::new(ProfileId::new("farmer-1").unwrap(), Address::from_bytes([1; 20]), Role::Farmer)
    }

    fn shipment() -> Shipment {
        Shipment::create(
            ShipmentRef::new("ship-1").unwrap(),
            &farmer(),
            TokenAmount::from_base_units(1_000),
            Timestamp::from_unix_secs(100).unwrap(),
            Confirmation::Local,
        )
    }

    fn tx(n: u8) -> TxHash {
        TxHash::from_hash(keccak256([n]))
    }

    #[test]
    fn created_shipment_is_pending_with_one_entry() {
        let s = shipment();
        assert_eq!(s.status, ShipmentStatus::Pending);
        assert_eq!(s.timeline.len(), 1);
        assert!(s.invariants_hold());
        assert_eq!(s.key, ShipmentRef::new("ship-1").unwrap().key());
    }

    #[test]
    fn tentative_then_confirm() {
        let mut s = shipment();
        s.push_tentative(ShipmentStatus::OfferMade, tx(1), Timestamp::from_unix_secs(110).unwrap(), "offer");
        assert_eq!(s.status, ShipmentStatus::OfferMade);
        assert!(s.tentative.is_some());

        let block_time = Timestamp::from_unix_secs(120).unwrap();
        assert!(s.confirm_tx(&tx(1), 42, block_time));
        let last = s.timeline.last().unwrap();
        assert_eq!(last.confirmation, Confirmation::Confirmed { tx: tx(1), block: 42 });
        assert_eq!(last.timestamp, block_time);
        assert!(s.tentative.is_none());
        assert!(!s.confirm_tx(&tx(1), 42, block_time));
    }

    #[test]
    fn failed_tentative_appends_restore_entry() {
        let mut s = shipment();
        s.push_tentative(ShipmentStatus::OfferMade, tx(2), Timestamp::from_unix_secs(110).unwrap(), "offer");
        assert!(s.fail_tx(&tx(2), Timestamp::from_unix_secs(111).unwrap(), "revert"));
        assert_eq!(s.status, ShipmentStatus::Pending);
        assert_eq!(s.timeline.len(), 3);
        assert_eq!(s.timeline[1].confirmation, Confirmation::Failed { tx: tx(2) });
        assert!(s.timeline[2].details.contains("revert"));
        assert!(s.invariants_hold());
    }

    #[test]
    fn fail_for_unknown_tx_is_noop() {
        let mut s = shipment();
        let before = s.clone();
        assert!(!s.fail_tx(&tx(9), Timestamp::from_unix_secs(111).unwrap(), "x"));
        assert_eq!(s, before);
    }

    #[test]
    fn same_status_tentative_adds_no_entry() {
        let mut s = shipment();
        s.push_tentative(ShipmentStatus::Pending, tx(3), Timestamp::from_unix_secs(110).unwrap(), "weighment");
        assert_eq!(s.timeline.len(), 1);
        assert!(s.confirm_tx(&tx(3), 7, Timestamp::from_unix_secs(111).unwrap()));
    }

    #[test]
    fn participant_check_uses_profile_or_carrier_address() {
        let mut s = shipment();
        assert!(s.is_participant(&farmer()));
        let carrier = Actor::new(ProfileId::new("c").unwrap(), Address::from_bytes([3; 20]), Role::Transporter);
        assert!(!s.is_participant(&carrier));
        s.transporter = Some(carrier.address);
        assert!(s.is_participant(&carrier));
    }

    #[test]
    fn snapshot_bytes_are_stable() {
        let s = shipment();
        assert_eq!(s.snapshot_bytes(), s.clone().snapshot_bytes());
    }
}
