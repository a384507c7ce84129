//! # Reconciliation
//!
//! Folding an observed ledger state into a projection:
//!
//! 1. The projection's status encodes to the observed state: in sync. A
//!    projection at `InTransit` stays there when the ledger reports
//!    IN_TRANSIT, so replaying the deposit-paired update never demotes it.
//! 2. The ledger is ahead, or reports a side branch the projection is not
//!    in: promote to the earliest compatible status.
//! 3. The projection is ahead and has a tentative write outstanding: in
//!    sync, the confirmation is still on its way.
//! 4. The projection is ahead with nothing outstanding: conflict. The caller
//!    re-syncs from the ledger.

use crate::status::{LedgerState, ShipmentStatus};

/// Outcome of comparing a projection with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing to do.
    InSync,
    /// Move the projection forward to this status.
    Promote(ShipmentStatus),
    /// The projection claims more than the ledger knows.
    Conflict {
        /// Status in the projection.
        projected: ShipmentStatus,
        /// State on the ledger.
        ledger: LedgerState,
    },
}

/// Apply the rule above.
pub fn reconcile(
    current: ShipmentStatus,
    ledger: LedgerState,
    has_tentative: bool,
) -> Reconciliation {
    if current.ledger_state() == ledger {
        return Reconciliation::InSync;
    }
    let target = ledger.lowest_status();
    let ledger_ahead = if ledger.is_side_branch() {
        true
    } else {
        !current.is_terminal() && target.stage() > current.stage()
    };
    if ledger_ahead {
        return Reconciliation::Promote(target);
    }
    if has_tentative {
        return Reconciliation::InSync;
    }
    Reconciliation::Conflict {
        projected: current,
        ledger,
    }
}

/// The status a forced re-sync settles on: keep a compatible status,
/// otherwise take the earliest status the ledger state allows.
pub fn resync_target(current: ShipmentStatus, ledger: LedgerState) -> ShipmentStatus {
    if current.ledger_state() == ledger {
        current
    } else {
        ledger.lowest_status()
    }
}
