//! # In-Flight Guard
//!
//! At most one ledger-writing operation per shipment at a time. A second
//! request while one is outstanding is rejected, never queued: the caller
//! re-reads the shipment and decides again once the first has settled.

use agx_core::ShipmentKey;
use agx_state::RejectionReason;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::CoordinatorError;

/// Shipments with an operation in flight, and which operation.
#[derive(Debug, Default)]
pub struct InFlight {
    active: DashMap<ShipmentKey, &'static str>,
}

impl InFlight {
    /// No operations in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for `action`. The claim is released when the guard
    /// drops.
    pub fn acquire(&self, key: ShipmentKey, action: &'static str) -> Result<InFlightGuard<'_>, CoordinatorError> {
        match self.active.entry(key) {
            Entry::Occupied(running) => Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                action,
                format!("transition in flight ({})", running.get()),
            )),
            Entry::Vacant(slot) => {
                slot.insert(action);
                Ok(InFlightGuard { owner: self, key })
            }
        }
    }

    /// Whether `key` is claimed.
    pub fn is_active(&self, key: &ShipmentKey) -> bool {
        self.active.contains_key(key)
    }
}

/// Releases the claim on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: ShipmentKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.active.remove(&self.key);
    }
}
