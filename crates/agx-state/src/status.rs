//! # Shipment Status and Ledger State
//!
//! The off-chain vocabulary is finer than the ledger's. The mapping:
//!
//! | Off-chain | Ledger |
//! |---|---|
//! | Pending, OfferMade | OPEN (0) |
//! | AwaitingPayment | ASSIGNED (1) |
//! | ReadyForPickup, InTransit | IN_TRANSIT (2) |
//! | Delivered | DELIVERED (3) |
//! | Verified | VERIFIED (4) |
//! | Claimed | PAID (5) |
//! | Disputed | DISPUTED (6) |
//! | Cancelled | CANCELLED (7) |
//!
//! Several off-chain statuses share one ledger state. [`crate::reconcile`]
//! decides what an observed ledger state means for a projection.

use serde::{Deserialize, Serialize};

/// Off-chain shipment status.
///
/// ```text
/// Pending → OfferMade → AwaitingPayment → ReadyForPickup → InTransit
///         → Delivered → Verified → Claimed
///
/// OfferMade..Verified ──▶ Disputed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    /// Listed by the producer, no buyer yet.
    Pending,
    /// A buyer has made an offer.
    OfferMade,
    /// Both parties nominated the same carrier; waiting for escrow.
    AwaitingPayment,
    /// Escrow funded; carrier may collect.
    ReadyForPickup,
    /// Collected by the carrier.
    InTransit,
    /// Delivered by the carrier.
    Delivered,
    /// Receipt verified by the buyer.
    Verified,
    /// Producer claimed the escrowed payment. Terminal.
    Claimed,
    /// Under dispute. Terminal for the main machine.
    Disputed,
    /// Cancelled. Terminal.
    Cancelled,
}

impl ShipmentStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::OfferMade => "OFFER_MADE",
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::ReadyForPickup => "READY_FOR_PICKUP",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
            Self::Verified => "VERIFIED",
            Self::Claimed => "CLAIMED",
            Self::Disputed => "DISPUTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Claimed | Self::Disputed | Self::Cancelled)
    }

    /// Position on the main path. Side branches sort after every main-path
    /// status.
    pub fn stage(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::OfferMade => 1,
            Self::AwaitingPayment => 2,
            Self::ReadyForPickup => 3,
            Self::InTransit => 4,
            Self::Delivered => 5,
            Self::Verified => 6,
            Self::Claimed => 7,
            Self::Disputed | Self::Cancelled => 8,
        }
    }

    /// Statuses from which a dispute may be raised or the shipment
    /// cancelled.
    pub fn allows_side_exit(&self) -> bool {
        matches!(
            self,
            Self::OfferMade
                | Self::AwaitingPayment
                | Self::ReadyForPickup
                | Self::InTransit
                | Self::Delivered
                | Self::Verified
        )
    }

    /// All statuses reachable in one step.
    pub fn valid_transitions(&self) -> Vec<ShipmentStatus> {
        let mut next = match self {
            Self::Pending => vec![Self::OfferMade],
            Self::OfferMade => vec![Self::AwaitingPayment],
            Self::AwaitingPayment => vec![Self::ReadyForPickup],
            Self::ReadyForPickup => vec![Self::InTransit],
            Self::InTransit => vec![Self::Delivered],
            Self::Delivered => vec![Self::Verified],
            Self::Verified => vec![Self::Claimed],
            Self::Claimed | Self::Disputed | Self::Cancelled => vec![],
        };
        if self.allows_side_exit() {
            next.push(Self::Disputed);
            next.push(Self::Cancelled);
        }
        next
    }

    /// The coarse state the ledger stores for this status.
    pub fn ledger_state(&self) -> LedgerState {
        match self {
            Self::Pending | Self::OfferMade => LedgerState::Open,
            Self::AwaitingPayment => LedgerState::Assigned,
            Self::ReadyForPickup | Self::InTransit => LedgerState::InTransit,
            Self::Delivered => LedgerState::Delivered,
            Self::Verified => LedgerState::Verified,
            Self::Claimed => LedgerState::Paid,
            Self::Disputed => LedgerState::Disputed,
            Self::Cancelled => LedgerState::Cancelled,
        }
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger shipment state as stored on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    /// 0
    Open,
    /// 1
    Assigned,
    /// 2
    InTransit,
    /// 3
    Delivered,
    /// 4
    Verified,
    /// 5
    Paid,
    /// 6
    Disputed,
    /// 7
    Cancelled,
}

impl LedgerState {
    /// The `uint8` code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Assigned => 1,
            Self::InTransit => 2,
            Self::Delivered => 3,
            Self::Verified => 4,
            Self::Paid => 5,
            Self::Disputed => 6,
            Self::Cancelled => 7,
        }
    }

    /// Decode a `uint8`; `None` for codes the ledger never emits.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Open,
            1 => Self::Assigned,
            2 => Self::InTransit,
            3 => Self::Delivered,
            4 => Self::Verified,
            5 => Self::Paid,
            6 => Self::Disputed,
            7 => Self::Cancelled,
            _ => return None,
        })
    }

    /// Off-chain statuses that encode to this state, earliest first.
    pub fn compatible_statuses(&self) -> &'static [ShipmentStatus] {
        use ShipmentStatus as S;
        match self {
            Self::Open => &[S::Pending, S::OfferMade],
            Self::Assigned => &[S::AwaitingPayment],
            Self::InTransit => &[S::ReadyForPickup, S::InTransit],
            Self::Delivered => &[S::Delivered],
            Self::Verified => &[S::Verified],
            Self::Paid => &[S::Claimed],
            Self::Disputed => &[S::Disputed],
            Self::Cancelled => &[S::Cancelled],
        }
    }

    /// The earliest compatible off-chain status.
    pub fn lowest_status(&self) -> ShipmentStatus {
        self.compatible_statuses()[0]
    }

    /// Whether this is a side-branch state.
    pub fn is_side_branch(&self) -> bool {
        matches!(self, Self::Disputed | Self::Cancelled)
    }
}

impl std::fmt::Display for LedgerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::Assigned => "ASSIGNED",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
            Self::Verified => "VERIFIED",
            Self::Paid => "PAID",
            Self::Disputed => "DISPUTED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ShipmentStatus; 10] = [
        ShipmentStatus::Pending,
        ShipmentStatus::OfferMade,
        ShipmentStatus::AwaitingPayment,
        ShipmentStatus::ReadyForPickup,
        ShipmentStatus::InTransit,
        ShipmentStatus::Delivered,
        ShipmentStatus::Verified,
        ShipmentStatus::Claimed,
        ShipmentStatus::Disputed,
        ShipmentStatus::Cancelled,
    ];

    #[test]
    fn every_status_is_compatible_with_its_ledger_state() {
        for s in ALL {
            assert!(s.ledger_state().compatible_statuses().contains(&s), "{s}");
        }
    }

    #[test]
    fn awaiting_payment_and_ready_for_pickup_encode_differently() {
        assert_ne!(
            ShipmentStatus::AwaitingPayment.ledger_state(),
            ShipmentStatus::ReadyForPickup.ledger_state()
        );
        assert_eq!(ShipmentStatus::ReadyForPickup.ledger_state().code(), 2);
    }

    #[test]
    fn ledger_codes_round_trip() {
        for code in 0..8u8 {
            assert_eq!(LedgerState::from_code(code).unwrap().code(), code);
        }
        assert!(LedgerState::from_code(8).is_none());
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for s in ALL.iter().filter(|s| s.is_terminal()) {
            assert!(s.valid_transitions().is_empty(), "{s}");
        }
    }

    #[test]
    fn pending_cannot_exit_sideways() {
        let next = ShipmentStatus::Pending.valid_transitions();
        assert!(!next.contains(&ShipmentStatus::Disputed));
        assert!(!next.contains(&ShipmentStatus::Cancelled));
    }

    #[test]
    fn main_path_stages_increase() {
        let path = &ALL[..8];
        for pair in path.windows(2) {
            assert!(pair[0].stage() < pair[1].stage());
            assert!(pair[0].valid_transitions().contains(&pair[1]));
        }
    }

    #[test]
    fn as_str_is_screaming_snake() {
        assert_eq!(ShipmentStatus::ReadyForPickup.as_str(), "READY_FOR_PICKUP");
        assert_eq!(LedgerState::Paid.to_string(), "PAID");
    }
}
