//! # In-Memory Backends
//!
//! `parking_lot`-guarded maps. State does not survive a restart.

use std::collections::{BTreeMap, HashMap, HashSet};

use agx_arbitration::{Dispute, EscrowRecord};
use agx_core::{DisputeId, EventId, LedgerPosition, ShipmentKey, Timestamp, TxHash};
use agx_state::Shipment;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{DepositIntent, PendingStateUpdate, UpdateStatus};
use crate::queue::PendingQueue;
use crate::store::ProjectionStore;

fn cas<K, V>(
    map: &mut HashMap<K, V>,
    key: K,
    value: &V,
    expected: Option<u64>,
    version_of: impl Fn(&V) -> u64,
    set_version: impl Fn(&mut V, u64),
    kind: &'static str,
) -> Result<u64, SyncError>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
    V: Clone,
{
    let found = map.get(&key).map(&version_of);
    if found != expected {
        return Err(SyncError::version_mismatch(kind, &key, expected, found));
    }
    let next = expected.map_or(0, |v| v + 1);
    let mut stored = value.clone();
    set_version(&mut stored, next);
    map.insert(key, stored);
    Ok(next)
}

/// In-memory [`ProjectionStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    shipments: RwLock<HashMap<ShipmentKey, Shipment>>,
    escrows: RwLock<HashMap<ShipmentKey, EscrowRecord>>,
    disputes: RwLock<HashMap<DisputeId, Dispute>>,
    intents: RwLock<HashMap<ShipmentKey, DepositIntent>>,
    processed: RwLock<HashSet<EventId>>,
    cursor: RwLock<Option<LedgerPosition>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionStore for MemoryStore {
    async fn shipment(&self, key: &ShipmentKey) -> Result<Option<Shipment>, SyncError> {
        Ok(self.shipments.read().get(key).cloned())
    }

    async fn save_shipment(&self, shipment: &Shipment, expected: Option<u64>) -> Result<u64, SyncError> {
        cas(
            &mut self.shipments.write(),
            shipment.key,
            shipment,
            expected,
            |s| s.version,
            |s, v| s.version = v,
            "shipment",
        )
    }

    async fn shipments(&self) -> Result<Vec<Shipment>, SyncError> {
        let mut out: Vec<_> = self.shipments.read().values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        Ok(out)
    }

    async fn escrow(&self, key: &ShipmentKey) -> Result<Option<EscrowRecord>, SyncError> {
        Ok(self.escrows.read().get(key).cloned())
    }

    async fn save_escrow(&self, escrow: &EscrowRecord, expected: Option<u64>) -> Result<u64, SyncError> {
        cas(
            &mut self.escrows.write(),
            *escrow.shipment(),
            escrow,
            expected,
            |e| e.version,
            |e, v| e.version = v,
            "escrow",
        )
    }

    async fn dispute(&self, id: DisputeId) -> Result<Option<Dispute>, SyncError> {
        Ok(self.disputes.read().get(&id).cloned())
    }

    async fn save_dispute(&self, dispute: &Dispute, expected: Option<u64>) -> Result<u64, SyncError> {
        cas(
            &mut self.disputes.write(),
            dispute.id,
            dispute,
            expected,
            |d| d.version,
            |d, v| d.version = v,
            "dispute",
        )
    }

    async fn disputes_for(&self, key: &ShipmentKey) -> Result<Vec<Dispute>, SyncError> {
        let mut out: Vec<_> = self
            .disputes
            .read()
            .values()
            .filter(|d| d.shipment == *key)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.id);
        Ok(out)
    }

    async fn save_deposit_intent(&self, intent: &DepositIntent) -> Result<(), SyncError> {
        self.intents.write().insert(*intent.shipment(), intent.clone());
        Ok(())
    }

    async fn deposit_intent(&self, key: &ShipmentKey) -> Result<Option<DepositIntent>, SyncError> {
        Ok(self.intents.read().get(key).cloned())
    }

    async fn intent_for_approval(&self, approve_tx: &TxHash) -> Result<Option<DepositIntent>, SyncError> {
        Ok(self
            .intents
            .read()
            .values()
            .find(|i| i.approve_tx() == Some(approve_tx))
            .cloned())
    }

    async fn remove_deposit_intent(&self, key: &ShipmentKey) -> Result<(), SyncError> {
        self.intents.write().remove(key);
        Ok(())
    }

    async fn is_processed(&self, id: &EventId) -> Result<bool, SyncError> {
        Ok(self.processed.read().contains(id))
    }

    async fn mark_processed(&self, id: &EventId) -> Result<bool, SyncError> {
        Ok(self.processed.write().insert(*id))
    }

    async fn cursor(&self) -> Result<Option<LedgerPosition>, SyncError> {
        Ok(*self.cursor.read())
    }

    async fn advance_cursor(&self, position: LedgerPosition) -> Result<(), SyncError> {
        let mut cursor = self.cursor.write();
        if cursor.map_or(true, |c| position > c) {
            *cursor = Some(position);
        }
        Ok(())
    }
}

/// In-memory [`PendingQueue`]. Claims are serialized by one mutex.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: Mutex<BTreeMap<(Timestamp, Uuid), PendingStateUpdate>>,
}

impl MemoryQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut PendingStateUpdate) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .values_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SyncError::NotFound {
                kind: "queue entry",
                key: id.to_string(),
            })?;
        f(entry)
    }
}

fn invalid(entry: &PendingStateUpdate, operation: &'static str) -> SyncError {
    SyncError::InvalidQueueOperation {
        id: entry.id.to_string(),
        status: entry.status.to_string(),
        operation,
    }
}

#[async_trait]
impl PendingQueue for MemoryQueue {
    async fn enqueue(
        &self,
        shipment: ShipmentKey,
        current_state: u8,
        target_state: u8,
        max_attempts: u32,
    ) -> Result<PendingStateUpdate, SyncError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries
            .values_mut()
            .find(|e| e.shipment == shipment && e.target_state == target_state)
        {
            if existing.status.is_terminal() {
                existing.rearm(current_state, max_attempts, Timestamp::now());
            }
            return Ok(existing.clone());
        }
        let entry = PendingStateUpdate::new(shipment, current_state, target_state, max_attempts, Timestamp::now());
        entries.insert((entry.created_at, entry.id), entry.clone());
        Ok(entry)
    }

    async fn claim_due(&self, now: Timestamp, limit: usize) -> Result<Vec<PendingStateUpdate>, SyncError> {
        let mut entries = self.entries.lock();
        let mut claimed = Vec::new();
        for entry in entries.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if entry.status == UpdateStatus::Pending && entry.next_attempt_at <= now {
                entry.status = UpdateStatus::Processing;
                entry.updated_at = now;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_submitted(&self, id: Uuid, tx: TxHash) -> Result<(), SyncError> {
        self.with_entry(id, |e| {
            if e.status != UpdateStatus::Processing {
                return Err(invalid(e, "mark submitted"));
            }
            e.last_tx = Some(tx);
            e.updated_at = Timestamp::now();
            Ok(())
        })
    }

    async fn complete(&self, id: Uuid) -> Result<(), SyncError> {
        self.with_entry(id, |e| {
            match e.status {
                UpdateStatus::Completed => {}
                UpdateStatus::Failed => return Err(invalid(e, "complete")),
                UpdateStatus::Pending | UpdateStatus::Processing => {
                    e.status = UpdateStatus::Completed;
                    e.updated_at = Timestamp::now();
                }
            }
            Ok(())
        })
    }

    async fn complete_for(&self, shipment: &ShipmentKey, target_state: u8) -> Result<bool, SyncError> {
        let mut entries = self.entries.lock();
        let entry = entries.values_mut().find(|e| {
            e.shipment == *shipment && e.target_state == target_state && !e.status.is_terminal()
        });
        Ok(match entry {
            Some(e) => {
                e.status = UpdateStatus::Completed;
                e.updated_at = Timestamp::now();
                true
            }
            None => false,
        })
    }

    async fn fail_attempt(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<Timestamp>,
    ) -> Result<PendingStateUpdate, SyncError> {
        self.with_entry(id, |e| {
            if e.status != UpdateStatus::Processing {
                return Err(invalid(e, "fail attempt"));
            }
            e.record_failure(error, retry_at, Timestamp::now());
            Ok(e.clone())
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<PendingStateUpdate>, SyncError> {
        Ok(self.entries.lock().values().find(|e| e.id == id).cloned())
    }

    async fn list(&self, status: Option<UpdateStatus>) -> Result<Vec<PendingStateUpdate>, SyncError> {
        Ok(self
            .entries
            .lock()
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect())
    }

    async fn retry(&self, id: Uuid) -> Result<PendingStateUpdate, SyncError> {
        self.with_entry(id, |e| {
            if e.status != UpdateStatus::Failed {
                return Err(invalid(e, "retry"));
            }
            let now = Timestamp::now();
            e.status = UpdateStatus::Pending;
            e.attempts = 0;
            e.next_attempt_at = now;
            e.updated_at = now;
            Ok(e.clone())
        })
    }

    async fn dismiss(&self, id: Uuid, note: &str) -> Result<PendingStateUpdate, SyncError> {
        self.with_entry(id, |e| {
            if !matches!(e.status, UpdateStatus::Pending | UpdateStatus::Failed) {
                return Err(invalid(e, "dismiss"));
            }
            e.status = UpdateStatus::Failed;
            e.last_error = Some(format!("dismissed: {note}"));
            e.updated_at = Timestamp::now();
            Ok(e.clone())
        })
    }

    async fn release_stale(&self, before: Timestamp) -> Result<usize, SyncError> {
        let mut released = 0;
        for entry in self.entries.lock().values_mut() {
            if entry.status == UpdateStatus::Processing && entry.updated_at < before {
                entry.status = UpdateStatus::Pending;
                entry.next_attempt_at = before;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::{keccak256, Actor, Address, ProfileId, Role, ShipmentRef, TokenAmount};
    use agx_state::Confirmation;

    fn shipment(reference: &str) -> Shipment {
        let farmer = Actor::new(ProfileId::new("f").unwrap(), Address::from_bytes([1; 20]), Role::Farmer);
        Shipment::create(
            ShipmentRef::new(reference).unwrap(),
            &farmer,
            TokenAmount::from_base_units(100),
            Timestamp::now(),
            Confirmation::Local,
        )
    }

    fn key(reference: &str) -> ShipmentKey {
        ShipmentRef::new(reference).unwrap().key()
    }

    #[tokio::test]
    async fn cas_rejects_stale_writes() {
        let store = MemoryStore::new();
        let s = shipment("A");
        assert_eq!(store.save_shipment(&s, None).await.unwrap(), 0);
        assert!(store.save_shipment(&s, None).await.unwrap_err().is_conflict());

        let mut first = store.shipment(&s.key).await.unwrap().unwrap();
        let second = first.clone();
        first.ask_price = TokenAmount::from_base_units(200);
        assert_eq!(store.save_shipment(&first, Some(0)).await.unwrap(), 1);
        assert!(store.save_shipment(&second, Some(0)).await.unwrap_err().is_conflict());
        assert_eq!(
            store.shipment(&s.key).await.unwrap().unwrap().ask_price,
            TokenAmount::from_base_units(200)
        );
    }

    #[tokio::test]
    async fn processed_events_are_recorded_once() {
        let store = MemoryStore::new();
        let id = EventId {
            tx_hash: TxHash::from_hash(keccak256("t")),
            log_index: 0,
        };
        assert!(!store.is_processed(&id).await.unwrap());
        assert!(store.mark_processed(&id).await.unwrap());
        assert!(!store.mark_processed(&id).await.unwrap());
    }

    #[tokio::test]
    async fn cursor_never_moves_back() {
        let store = MemoryStore::new();
        store.advance_cursor(LedgerPosition::new(5, 1)).await.unwrap();
        store.advance_cursor(LedgerPosition::new(4, 9)).await.unwrap();
        assert_eq!(store.cursor().await.unwrap(), Some(LedgerPosition::new(5, 1)));
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_target() {
        let q = MemoryQueue::new();
        let a = q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        let b = q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        let c = q.enqueue(key("A"), 2, 3, 3).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(q.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn finished_entry_is_rearmed_on_enqueue() {
        let q = MemoryQueue::new();
        let first = q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        let now = Timestamp::now().plus_secs(1);
        assert_eq!(q.claim_due(now, 10).await.unwrap().len(), 1);

        let in_flight = q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        assert_eq!(in_flight.status, UpdateStatus::Processing);

        q.complete(first.id).await.unwrap();
        let again = q.enqueue(key("A"), 1, 2, 5).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, UpdateStatus::Pending);
        assert_eq!(again.attempts, 0);
        assert_eq!(again.max_attempts, 5);
        assert!(again.last_tx.is_none());
        assert_eq!(q.claim_due(now, 10).await.unwrap().len(), 1);
        assert_eq!(q.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_marks_processing_once() {
        let q = MemoryQueue::new();
        q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        let now = Timestamp::now().plus_secs(1);
        assert_eq!(q.claim_due(now, 10).await.unwrap().len(), 1);
        assert!(q.claim_due(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attempts_exhaust_to_failed() {
        let q = MemoryQueue::new();
        let e = q.enqueue(key("A"), 1, 2, 2).await.unwrap();
        let now = Timestamp::now().plus_secs(1);

        q.claim_due(now, 1).await.unwrap();
        let after = q.fail_attempt(e.id, "timeout", Some(now)).await.unwrap();
        assert_eq!(after.status, UpdateStatus::Pending);

        q.claim_due(now, 1).await.unwrap();
        let after = q.fail_attempt(e.id, "timeout", Some(now)).await.unwrap();
        assert_eq!(after.status, UpdateStatus::Failed);
        assert_eq!(after.attempts, 2);

        let retried = q.retry(e.id).await.unwrap();
        assert_eq!(retried.status, UpdateStatus::Pending);
        assert_eq!(retried.attempts, 0);
    }

    #[tokio::test]
    async fn complete_for_matches_open_entry() {
        let q = MemoryQueue::new();
        let e = q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        assert!(q.complete_for(&key("A"), 2).await.unwrap());
        assert!(!q.complete_for(&key("A"), 2).await.unwrap());
        assert_eq!(q.get(e.id).await.unwrap().unwrap().status, UpdateStatus::Completed);
    }

    #[tokio::test]
    async fn dismiss_fails_entry_with_note() {
        let q = MemoryQueue::new();
        let e = q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        let dismissed = q.dismiss(e.id, "shipment abandoned").await.unwrap();
        assert_eq!(dismissed.status, UpdateStatus::Failed);
        assert_eq!(dismissed.last_error.as_deref(), Some("dismissed: shipment abandoned"));
        assert!(q.claim_due(Timestamp::now().plus_secs(5), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dismiss_refuses_claimed_and_completed_entries() {
        let q = MemoryQueue::new();
        let e = q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        q.claim_due(Timestamp::now().plus_secs(1), 1).await.unwrap();
        assert!(matches!(
            q.dismiss(e.id, "x").await,
            Err(SyncError::InvalidQueueOperation { .. })
        ));
        q.complete(e.id).await.unwrap();
        assert!(q.dismiss(e.id, "x").await.is_err());
    }

    #[tokio::test]
    async fn stale_claims_are_released() {
        let q = MemoryQueue::new();
        q.enqueue(key("A"), 1, 2, 3).await.unwrap();
        let now = Timestamp::now().plus_secs(1);
        q.claim_due(now, 1).await.unwrap();
        assert_eq!(q.release_stale(now.plus_secs(60)).await.unwrap(), 1);
        assert_eq!(q.list(Some(UpdateStatus::Pending)).await.unwrap().len(), 1);
    }
}
