//! # Pending Update Queue
//!
//! `Pending → Processing → {Completed | Pending (retry) | Failed}`.
//! `(shipment, target_state)` is the idempotency key: enqueueing an update
//! that is already queued or in flight returns the existing entry. A
//! completed or failed entry under the same key is re-armed.

use agx_core::{ShipmentKey, Timestamp, TxHash};
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{PendingStateUpdate, UpdateStatus};

/// Durable queue of attestor-signed state updates.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    /// Enqueue a move from ledger state `current_state` to `target_state`.
    /// A pending or processing entry under this key is returned as is; a
    /// completed or failed one is reset to Pending with attempts cleared.
    async fn enqueue(
        &self,
        shipment: ShipmentKey,
        current_state: u8,
        target_state: u8,
        max_attempts: u32,
    ) -> Result<PendingStateUpdate, SyncError>;

    /// Claim up to `limit` pending entries due at `now`, marking them
    /// Processing. Entries are claimed by exactly one caller.
    async fn claim_due(&self, now: Timestamp, limit: usize) -> Result<Vec<PendingStateUpdate>, SyncError>;

    /// Record the transaction submitted for a claimed entry.
    async fn mark_submitted(&self, id: Uuid, tx: TxHash) -> Result<(), SyncError>;

    /// Processing → Completed.
    async fn complete(&self, id: Uuid) -> Result<(), SyncError>;

    /// Complete the non-terminal entry for `(shipment, target_state)`, if
    /// any. Used when the ledger event is observed.
    async fn complete_for(&self, shipment: &ShipmentKey, target_state: u8) -> Result<bool, SyncError>;

    /// Count a failed attempt. With attempts left and `retry_at` set, the
    /// entry goes back to Pending; otherwise it fails.
    async fn fail_attempt(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<Timestamp>,
    ) -> Result<PendingStateUpdate, SyncError>;

    /// An entry by id.
    async fn get(&self, id: Uuid) -> Result<Option<PendingStateUpdate>, SyncError>;

    /// Entries, optionally filtered by status, oldest first.
    async fn list(&self, status: Option<UpdateStatus>) -> Result<Vec<PendingStateUpdate>, SyncError>;

    /// Failed → Pending with the attempt count reset.
    async fn retry(&self, id: Uuid) -> Result<PendingStateUpdate, SyncError>;

    /// Give up on a Pending or Failed entry: it becomes Failed with the
    /// operator's note as its last error and is never claimed again unless
    /// retried.
    async fn dismiss(&self, id: Uuid, note: &str) -> Result<PendingStateUpdate, SyncError>;

    /// Return Processing entries not touched since `before` to Pending.
    /// Recovers entries claimed by a worker that died.
    async fn release_stale(&self, before: Timestamp) -> Result<usize, SyncError>;
}
