//! # Projection Store
//!
//! Versioned records. `save_*` takes the version the caller read:
//! `None` to insert a record that must not exist yet, `Some(v)` to replace
//! one still at `v`. The stored copy gets the next version, which is
//! returned.

use agx_arbitration::{Dispute, EscrowRecord};
use agx_core::{DisputeId, EventId, LedgerPosition, ShipmentKey, TxHash};
use agx_state::Shipment;
use async_trait::async_trait;

use crate::error::SyncError;
use crate::model::DepositIntent;

/// Persistence for the projection.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// A shipment by key.
    async fn shipment(&self, key: &ShipmentKey) -> Result<Option<Shipment>, SyncError>;

    /// CAS write of a shipment.
    async fn save_shipment(&self, shipment: &Shipment, expected: Option<u64>) -> Result<u64, SyncError>;

    /// Every shipment, oldest first.
    async fn shipments(&self) -> Result<Vec<Shipment>, SyncError>;

    /// The escrow for a shipment.
    async fn escrow(&self, key: &ShipmentKey) -> Result<Option<EscrowRecord>, SyncError>;

    /// CAS write of an escrow.
    async fn save_escrow(&self, escrow: &EscrowRecord, expected: Option<u64>) -> Result<u64, SyncError>;

    /// A dispute by id.
    async fn dispute(&self, id: DisputeId) -> Result<Option<Dispute>, SyncError>;

    /// CAS write of a dispute.
    async fn save_dispute(&self, dispute: &Dispute, expected: Option<u64>) -> Result<u64, SyncError>;

    /// Disputes raised against a shipment, by id.
    async fn disputes_for(&self, key: &ShipmentKey) -> Result<Vec<Dispute>, SyncError>;

    /// Insert or replace the deposit intent of a shipment.
    async fn save_deposit_intent(&self, intent: &DepositIntent) -> Result<(), SyncError>;

    /// The deposit intent of a shipment.
    async fn deposit_intent(&self, key: &ShipmentKey) -> Result<Option<DepositIntent>, SyncError>;

    /// The intent waiting on `approve_tx`.
    async fn intent_for_approval(&self, approve_tx: &TxHash) -> Result<Option<DepositIntent>, SyncError>;

    /// Drop a shipment's deposit intent.
    async fn remove_deposit_intent(&self, key: &ShipmentKey) -> Result<(), SyncError>;

    /// Whether an event has been applied.
    async fn is_processed(&self, id: &EventId) -> Result<bool, SyncError>;

    /// Mark an event applied. Returns `false` if it already was.
    async fn mark_processed(&self, id: &EventId) -> Result<bool, SyncError>;

    /// Position of the last applied event.
    async fn cursor(&self) -> Result<Option<LedgerPosition>, SyncError>;

    /// Advance the cursor. Never moves it backwards.
    async fn advance_cursor(&self, position: LedgerPosition) -> Result<(), SyncError>;
}
