//! # Event Projector
//!
//! Folds ledger events into the [`ProjectionStore`].
//!
//! Each event is applied at most once: the processed-event set is checked
//! before folding and written after, and every fold is itself idempotent
//! (confirming a transaction that is already confirmed, or adding evidence
//! that is already present, changes nothing). A crash between folding and
//! marking therefore only causes a harmless re-fold.
//!
//! Record writes are compare-and-swap. A lost race re-reads the record and
//! folds again, up to [`CAS_ATTEMPTS`] times.
//!
//! Events for shipments the projection does not track are skipped.

use std::sync::Arc;
use std::time::Duration;

use agx_arbitration::{DepositTerms, Dispute, EscrowRecord, Evidence, Resolution};
use agx_core::{Actor, Address, Role, ShipmentKey, TokenAmount};
use agx_ledger::{EventData, LedgerClient, LedgerEvent};
use agx_state::{
    check, reconcile, resync_target, Confirmation, EscrowFacts, GuardContext, LedgerState, Reconciliation, Shipment,
    ShipmentAction, ShipmentStatus,
};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::SyncError;
use crate::queue::PendingQueue;
use crate::store::ProjectionStore;

/// Optimistic write attempts per event before the conflict is surfaced.
pub const CAS_ATTEMPTS: usize = 3;

/// Redelivery attempts for a failing event in [`EventProjector::run`].
const APPLY_ATTEMPTS: u32 = 3;

/// Base delay between redeliveries; doubles each attempt.
const APPLY_BASE_DELAY_MS: u64 = 200;

/// Ledger code of the state a confirmed deposit moves the shipment to.
const IN_TRANSIT: u8 = 2;

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Already processed; nothing changed.
    Duplicate,
    /// Processed, but the projection had nothing to change.
    Skipped,
    /// The projection was updated.
    Updated,
    /// The projection disagreed with the ledger and was re-synced.
    Resynced,
}

/// Hook run after an event has been applied and marked processed.
#[async_trait]
pub trait EventObserver: Send + Sync {
    /// React to an applied event. Errors are logged, not retried.
    async fn observe(&self, event: &LedgerEvent) -> Result<(), SyncError>;
}

/// Projector settings.
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// `max_attempts` for state updates the projector enqueues.
    pub max_attempts: u32,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Applies ledger events to the projection.
pub struct EventProjector {
    store: Arc<dyn ProjectionStore>,
    queue: Arc<dyn PendingQueue>,
    ledger: Arc<dyn LedgerClient>,
    config: ProjectorConfig,
    observers: Vec<Arc<dyn EventObserver>>,
}

impl std::fmt::Debug for EventProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProjector")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl EventProjector {
    /// A projector over `store`, enqueueing follow-up writes on `queue` and
    /// reading `ledger` when it must re-sync.
    pub fn new(
        store: Arc<dyn ProjectionStore>,
        queue: Arc<dyn PendingQueue>,
        ledger: Arc<dyn LedgerClient>,
        config: ProjectorConfig,
    ) -> Self {
        Self {
            store,
            queue,
            ledger,
            config,
            observers: Vec::new(),
        }
    }

    /// Register an observer.
    pub fn observe(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.push(observer);
    }

    /// The store this projector writes.
    pub fn store(&self) -> &Arc<dyn ProjectionStore> {
        &self.store
    }

    /// Apply one event.
    pub async fn apply(&self, event: &LedgerEvent) -> Result<Applied, SyncError> {
        if self.store.is_processed(&event.id).await? {
            tracing::debug!(event = %event.id, "duplicate event");
            return Ok(Applied::Duplicate);
        }

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.fold(event).await {
                Err(e) if e.is_conflict() && attempt < CAS_ATTEMPTS => {
                    tracing::debug!(event = %event.id, attempt, error = %e, "write conflict, re-reading");
                }
                other => break other?,
            }
        };

        self.store.mark_processed(&event.id).await?;
        self.store.advance_cursor(event.position).await?;
        tracing::debug!(
            event = %event.id,
            name = event.data.name(),
            outcome = ?outcome,
            "event applied"
        );

        for observer in &self.observers {
            if let Err(e) = observer.observe(event).await {
                tracing::warn!(event = %event.id, error = %e, "event observer failed");
            }
        }
        Ok(outcome)
    }

    /// Apply every confirmed event from the cursor to the ledger head.
    /// Returns how many were not duplicates.
    pub async fn catch_up(&self) -> Result<usize, SyncError> {
        let head = self.ledger.block_number().await?;
        let depth = self.ledger.config().confirmations.max(1);
        let Some(safe) = head.checked_sub(depth - 1) else {
            return Ok(0);
        };
        let from = self.store.cursor().await?.map_or(0, |c| c.block);
        if from > safe {
            return Ok(0);
        }

        let mut applied = 0;
        for event in self.ledger.events(from, safe).await? {
            if self.apply(&event).await? != Applied::Duplicate {
                applied += 1;
            }
        }
        if applied > 0 {
            tracing::info!(from, to = safe, applied, "projection caught up");
        }
        Ok(applied)
    }

    /// Apply events from `events` until the channel closes or `shutdown`
    /// flips to true.
    pub async fn run(&self, mut events: mpsc::Receiver<LedgerEvent>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                next = events.recv() => {
                    let Some(event) = next else { break };
                    self.apply_with_retry(&event).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("event projector stopped");
    }

    async fn apply_with_retry(&self, event: &LedgerEvent) {
        let mut delay = APPLY_BASE_DELAY_MS;
        for attempt in 1..=APPLY_ATTEMPTS {
            match self.apply(event).await {
                Ok(_) => return,
                Err(e) if attempt < APPLY_ATTEMPTS => {
                    tracing::warn!(
                        event = %event.id,
                        attempt,
                        delay_ms = delay,
                        error = %e,
                        "event apply failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(event = %event.id, error = %e, "event apply failed, giving up");
                }
            }
        }
    }

    async fn fold(&self, event: &LedgerEvent) -> Result<Applied, SyncError> {
        match &event.data {
            EventData::ShipmentCreated { shipment, .. } => {
                self.fold_shipment(shipment, event, |s| confirm(s, event)).await
            }
            EventData::IndustrySet { shipment, industry } => {
                self.fold_shipment(shipment, event, |s| {
                    let mut changed = confirm(s, event);
                    if s.industry_address.is_none() {
                        s.industry_address = Some(*industry);
                        changed = true;
                    }
                    changed
                })
                .await
            }
            EventData::TransporterAssigned { shipment, transporter } => {
                self.fold_shipment(shipment, event, |s| {
                    let mut changed = confirm(s, event);
                    if s.transporter.is_none() {
                        s.transporter = Some(*transporter);
                        changed = true;
                    }
                    changed
                })
                .await
            }
            EventData::ShipmentStateChanged {
                shipment, new_state, ..
            } => self.fold_state_change(shipment, *new_state, event).await,
            EventData::WeighmentAttached {
                shipment, weigh_hash, ..
            } => {
                let tx = *event.tx_hash();
                self.fold_shipment(shipment, event, |s| {
                    match s.weighments.iter_mut().find(|w| w.weigh_hash == *weigh_hash && w.tx.is_none()) {
                        Some(w) => {
                            w.tx = Some(tx);
                            true
                        }
                        None => false,
                    }
                })
                .await
            }
            EventData::ProofAttached {
                shipment, proof_hash, ..
            } => {
                let tx = *event.tx_hash();
                self.fold_shipment(shipment, event, |s| {
                    match s.proofs.iter_mut().find(|p| p.proof_hash == *proof_hash && p.tx.is_none()) {
                        Some(p) => {
                            p.tx = Some(tx);
                            true
                        }
                        None => false,
                    }
                })
                .await
            }
            EventData::PaymentDeposited {
                shipment, payer, amount,
            } => self.fold_deposit(shipment, *payer, *amount, event).await,
            EventData::PaymentHeld { shipment } => {
                self.fold_escrow(shipment, |e| e.hold(event.block_time).is_ok()).await
            }
            EventData::PaymentReleased { shipment, .. } => {
                let tx = *event.tx_hash();
                self.fold_escrow(shipment, |e| e.release(event.block_time, Some(tx)).is_ok())
                    .await
            }
            EventData::PaymentRefunded { shipment, .. } => {
                let tx = *event.tx_hash();
                self.fold_escrow(shipment, |e| e.refund(event.block_time, Some(tx)).is_ok())
                    .await
            }
            EventData::DisputeRaised {
                dispute,
                shipment,
                raised_by,
            } => {
                let mut outcome = Applied::Skipped;
                if self.store.dispute(*dispute).await?.is_none() {
                    let record = Dispute::open(*dispute, *shipment, *raised_by, "", event.block_time);
                    self.store.save_dispute(&record, None).await?;
                    outcome = Applied::Updated;
                }
                let linked = self
                    .fold_shipment(shipment, event, |s| {
                        if s.dispute_id.is_some() {
                            return false;
                        }
                        s.dispute_id = Some(*dispute);
                        true
                    })
                    .await?;
                Ok(if linked == Applied::Updated { linked } else { outcome })
            }
            EventData::EvidenceAdded {
                dispute,
                submitter,
                evidence_hash,
            } => {
                let tx = *event.tx_hash();
                self.fold_dispute(*dispute, |d| {
                    if let Some(existing) = d.evidence.iter_mut().find(|e| e.evidence_hash == *evidence_hash) {
                        if existing.tx.is_some() {
                            return false;
                        }
                        existing.tx = Some(tx);
                        return true;
                    }
                    d.add_evidence(Evidence {
                        submitter: *submitter,
                        evidence_hash: evidence_hash.clone(),
                        timestamp: event.block_time,
                        tx: Some(tx),
                    })
                    .is_ok()
                })
                .await
            }
            EventData::DisputeResolved { dispute, resolution } => {
                let Some(resolution) = Resolution::from_ledger_code(*resolution) else {
                    tracing::warn!(dispute = %dispute, code = resolution, "unknown resolution code");
                    return Ok(Applied::Skipped);
                };
                self.fold_dispute(*dispute, |d| d.resolve(resolution, "", event.block_time).is_ok())
                    .await
            }
            EventData::DisputeRejected { dispute } => {
                self.fold_dispute(*dispute, |d| d.reject("", event.block_time).is_ok())
                    .await
            }
            EventData::KycAttested { .. } | EventData::Approval { .. } => Ok(Applied::Skipped),
        }
    }

    /// Read, mutate, CAS-write a shipment. `f` returns whether it changed
    /// anything.
    async fn fold_shipment(
        &self,
        key: &ShipmentKey,
        event: &LedgerEvent,
        f: impl FnOnce(&mut Shipment) -> bool,
    ) -> Result<Applied, SyncError> {
        let Some(mut shipment) = self.store.shipment(key).await? else {
            tracing::debug!(shipment = %key, event = event.data.name(), "untracked shipment");
            return Ok(Applied::Skipped);
        };
        let version = shipment.version;
        if !f(&mut shipment) {
            return Ok(Applied::Skipped);
        }
        shipment.last_event = Some(event.position);
        self.store.save_shipment(&shipment, Some(version)).await?;
        Ok(Applied::Updated)
    }

    async fn fold_state_change(
        &self,
        key: &ShipmentKey,
        code: u8,
        event: &LedgerEvent,
    ) -> Result<Applied, SyncError> {
        let Some(ledger) = LedgerState::from_code(code) else {
            tracing::warn!(shipment = %key, code, "unknown ledger state code");
            return Ok(Applied::Skipped);
        };
        let Some(mut shipment) = self.store.shipment(key).await? else {
            tracing::debug!(shipment = %key, "untracked shipment");
            return Ok(Applied::Skipped);
        };
        let version = shipment.version;
        let tx = *event.tx_hash();
        let confirmed = Confirmation::Confirmed {
            tx,
            block: event.position.block,
        };

        let mut outcome = if shipment.confirm_tx(&tx, event.position.block, event.block_time) {
            Applied::Updated
        } else {
            Applied::Skipped
        };

        match reconcile(shipment.status, ledger, shipment.tentative.is_some()) {
            Reconciliation::InSync => {}
            Reconciliation::Promote(status) => {
                shipment.push_status(status, event.block_time, format!("ledger {ledger}"), confirmed);
                outcome = Applied::Updated;
            }
            Reconciliation::Conflict { projected, .. } => {
                // The event may be stale during catch-up; settle on what the
                // ledger holds now.
                let current = self
                    .ledger
                    .shipment(key)
                    .await?
                    .and_then(|s| LedgerState::from_code(s.state))
                    .unwrap_or(ledger);
                if projected.ledger_state() != current {
                    let target = resync_target(projected, current);
                    tracing::warn!(
                        shipment = %key,
                        projected = %projected,
                        ledger = %current,
                        resynced = %target,
                        "projection ahead of ledger, re-syncing"
                    );
                    shipment.tentative = None;
                    shipment.push_status(target, event.block_time, format!("resynced to ledger {current}"), confirmed);
                    outcome = Applied::Resynced;
                }
            }
        }

        if outcome != Applied::Skipped {
            shipment.last_event = Some(event.position);
            self.store.save_shipment(&shipment, Some(version)).await?;
        }
        if self.queue.complete_for(key, code).await? {
            tracing::info!(shipment = %key, state = %ledger, "pending state update observed on ledger");
        }
        Ok(outcome)
    }

    async fn fold_deposit(
        &self,
        key: &ShipmentKey,
        payer: Address,
        amount: TokenAmount,
        event: &LedgerEvent,
    ) -> Result<Applied, SyncError> {
        let tx = *event.tx_hash();
        let mut outcome = Applied::Skipped;

        let existing = self.store.escrow(key).await?;
        let already = existing.as_ref().map_or(false, |e| e.deposit_tx == Some(tx));
        if !already {
            if let Some(live) = existing.as_ref().filter(|e| e.status.is_live()) {
                tracing::warn!(shipment = %key, status = live.status.as_str(), "deposit observed over a live escrow");
            } else if let Some(terms) = self.deposit_terms(key, payer, amount).await? {
                let record = EscrowRecord::deposited(terms, event.block_time, Some(tx)).map_err(|e| {
                    SyncError::Corrupt {
                        kind: "escrow",
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                self.store
                    .save_escrow(&record, existing.as_ref().map(|e| e.version))
                    .await?;
                outcome = Applied::Updated;
            }
        }
        self.store.remove_deposit_intent(key).await?;

        let facts = self.store.escrow(key).await?.map(|e| EscrowFacts {
            live: e.status.is_live(),
            amount: e.terms.amount,
        });
        let mut refused = None;
        let paid = self
            .fold_shipment(key, event, |s| {
                if s.status != ShipmentStatus::AwaitingPayment {
                    return false;
                }
                let (Some(profile_id), Some(address)) = (s.industry_id.clone(), s.industry_address) else {
                    refused = Some("shipment has no industry".to_string());
                    return false;
                };
                let buyer = Actor::new(profile_id, address, Role::Industry);
                if let Err(rejection) = check(s, &ShipmentAction::ConfirmPayment, &GuardContext::new(&buyer).escrow(facts)) {
                    refused = Some(rejection.to_string());
                    return false;
                }
                s.push_status(
                    ShipmentStatus::ReadyForPickup,
                    event.block_time,
                    "payment deposited",
                    Confirmation::Confirmed {
                        tx,
                        block: event.position.block,
                    },
                );
                true
            })
            .await?;
        if paid == Applied::Updated {
            outcome = Applied::Updated;
        }

        if let Some(reason) = refused {
            tracing::warn!(shipment = %key, %amount, %reason, "deposit does not fund the shipment; not promoting");
            return Ok(outcome);
        }
        if self.store.shipment(key).await?.is_some() {
            let entry = self
                .queue
                .enqueue(*key, LedgerState::Assigned.code(), IN_TRANSIT, self.config.max_attempts)
                .await?;
            tracing::info!(shipment = %key, entry = %entry.id, "in-transit update queued");
        }
        Ok(outcome)
    }

    /// Terms from the coordinator's intent, or from the ledger's views of
    /// the escrow and shipment when the deposit was made elsewhere.
    async fn deposit_terms(
        &self,
        key: &ShipmentKey,
        payer: Address,
        amount: TokenAmount,
    ) -> Result<Option<DepositTerms>, SyncError> {
        if let Some(intent) = self.store.deposit_intent(key).await? {
            if intent.terms.payer == payer && intent.terms.amount == amount {
                return Ok(Some(intent.terms));
            }
        }
        let Some(view) = self.ledger.escrow(key).await? else {
            return Ok(None);
        };
        let Some(onchain) = self.ledger.shipment(key).await? else {
            return Ok(None);
        };
        Ok(Some(DepositTerms {
            shipment: *key,
            token: view.token,
            amount: view.amount,
            payer: view.payer,
            farmer: onchain.farmer,
            transporter: onchain.transporter,
            splits: view.splits,
        }))
    }

    async fn fold_escrow(
        &self,
        key: &ShipmentKey,
        f: impl FnOnce(&mut EscrowRecord) -> bool,
    ) -> Result<Applied, SyncError> {
        let Some(mut escrow) = self.store.escrow(key).await? else {
            tracing::debug!(shipment = %key, "untracked escrow");
            return Ok(Applied::Skipped);
        };
        let version = escrow.version;
        if !f(&mut escrow) {
            return Ok(Applied::Skipped);
        }
        self.store.save_escrow(&escrow, Some(version)).await?;
        Ok(Applied::Updated)
    }

    async fn fold_dispute(
        &self,
        id: agx_core::DisputeId,
        f: impl FnOnce(&mut Dispute) -> bool,
    ) -> Result<Applied, SyncError> {
        let Some(mut dispute) = self.store.dispute(id).await? else {
            tracing::debug!(dispute = %id, "untracked dispute");
            return Ok(Applied::Skipped);
        };
        let version = dispute.version;
        if !f(&mut dispute) {
            return Ok(Applied::Skipped);
        }
        self.store.save_dispute(&dispute, Some(version)).await?;
        Ok(Applied::Updated)
    }
}

fn confirm(shipment: &mut Shipment, event: &LedgerEvent) -> bool {
    shipment.confirm_tx(event.tx_hash(), event.position.block, event.block_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::{Actor, DisputeId, EventId, LedgerPosition, ProfileId, Role, ShipmentRef, SplitBps, Timestamp, TxHash};
    use agx_ledger::MockLedger;
    use parking_lot::Mutex;

    use crate::memory::{MemoryQueue, MemoryStore};
    use crate::model::{DepositIntent, IntentStage, UpdateStatus};

    fn farmer() -> Address {
        Address::from_bytes([1; 20])
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        projector: EventProjector,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let ledger = Arc::new(MockLedger::local());
        let projector = EventProjector::new(store.clone(), queue.clone(), ledger, ProjectorConfig::default());
        Fixture { store, queue, projector }
    }

    fn key() -> ShipmentKey {
        ShipmentRef::new("ship-1").unwrap().key()
    }

    fn tx(n: u8) -> TxHash {
        TxHash::from_hash(agx_core::Hash32::from_bytes([n; 32]))
    }

    fn event(tx_n: u8, block: u64, data: EventData) -> LedgerEvent {
        LedgerEvent {
            id: EventId {
                tx_hash: tx(tx_n),
                log_index: 0,
            },
            position: LedgerPosition::new(block, 0),
            block_time: Timestamp::from_unix_secs(1_700_000_000 + block).unwrap(),
            emitter: Address::from_bytes([0x5e; 20]),
            data,
        }
    }

    async fn seed(store: &MemoryStore, status: ShipmentStatus) -> Shipment {
        let farmer = Actor::new(ProfileId::new("farmer").unwrap(), farmer(), Role::Farmer);
        let mut s = Shipment::create(
            ShipmentRef::new("ship-1").unwrap(),
            &farmer,
            TokenAmount::from_base_units(1_000),
            Timestamp::from_unix_secs(1_700_000_000).unwrap(),
            Confirmation::Local,
        );
        for next in [
            ShipmentStatus::OfferMade,
            ShipmentStatus::AwaitingPayment,
            ShipmentStatus::ReadyForPickup,
            ShipmentStatus::InTransit,
            ShipmentStatus::Delivered,
            ShipmentStatus::Verified,
        ] {
            if s.status == status {
                break;
            }
            s.push_status(next, s.updated_at, "seed", Confirmation::Local);
        }
        s.industry_id = Some(ProfileId::new("industry").unwrap());
        s.industry_address = Some(Address::from_bytes([2; 20]));
        s.transporter = Some(Address::from_bytes([3; 20]));
        store.save_shipment(&s, None).await.unwrap();
        store.shipment(&s.key).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op() {
        let f = fixture();
        let mut s = seed(&f.store, ShipmentStatus::AwaitingPayment).await;
        s.push_tentative(ShipmentStatus::InTransit, tx(9), s.updated_at, "submitted");
        f.store.save_shipment(&s, Some(s.version)).await.unwrap();

        let e = event(
            9,
            10,
            EventData::ShipmentStateChanged {
                shipment: key(),
                old_state: 1,
                new_state: 2,
            },
        );
        assert_eq!(f.projector.apply(&e).await.unwrap(), Applied::Updated);
        let first = f.store.shipment(&key()).await.unwrap().unwrap();

        assert_eq!(f.projector.apply(&e).await.unwrap(), Applied::Duplicate);
        let second = f.store.shipment(&key()).await.unwrap().unwrap();
        assert_eq!(first.snapshot_bytes(), second.snapshot_bytes());
        assert!(second.tentative.is_none());
        assert!(matches!(
            second.timeline.last().unwrap().confirmation,
            Confirmation::Confirmed { block: 10, .. }
        ));
        assert_eq!(f.store.cursor().await.unwrap(), Some(LedgerPosition::new(10, 0)));
    }

    #[tokio::test]
    async fn ledger_ahead_promotes() {
        let f = fixture();
        seed(&f.store, ShipmentStatus::InTransit).await;
        let e = event(
            4,
            12,
            EventData::ShipmentStateChanged {
                shipment: key(),
                old_state: 2,
                new_state: 3,
            },
        );
        assert_eq!(f.projector.apply(&e).await.unwrap(), Applied::Updated);
        let s = f.store.shipment(&key()).await.unwrap().unwrap();
        assert_eq!(s.status, ShipmentStatus::Delivered);
        assert_eq!(s.timeline.last().unwrap().timestamp, e.block_time);
    }

    #[tokio::test]
    async fn deposit_builds_escrow_from_intent_and_queues_update() {
        let f = fixture();
        seed(&f.store, ShipmentStatus::AwaitingPayment).await;
        let terms = DepositTerms {
            shipment: key(),
            token: Address::from_bytes([0x70; 20]),
            amount: TokenAmount::from_base_units(1_000),
            payer: Address::from_bytes([2; 20]),
            farmer: farmer(),
            transporter: Address::from_bytes([3; 20]),
            splits: SplitBps::new(8_000, 1_500, 500).unwrap(),
        };
        f.store
            .save_deposit_intent(&DepositIntent {
                terms: terms.clone(),
                stage: IntentStage::Submitted { deposit_tx: tx(5) },
                requested_at: Timestamp::now(),
            })
            .await
            .unwrap();

        let e = event(
            5,
            7,
            EventData::PaymentDeposited {
                shipment: key(),
                payer: terms.payer,
                amount: terms.amount,
            },
        );
        assert_eq!(f.projector.apply(&e).await.unwrap(), Applied::Updated);

        let escrow = f.store.escrow(&key()).await.unwrap().unwrap();
        assert_eq!(escrow.terms, terms);
        assert_eq!(escrow.deposit_tx, Some(tx(5)));
        assert!(f.store.deposit_intent(&key()).await.unwrap().is_none());
        assert_eq!(
            f.store.shipment(&key()).await.unwrap().unwrap().status,
            ShipmentStatus::ReadyForPickup
        );
        let queued = f.queue.list(Some(UpdateStatus::Pending)).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].target_state, IN_TRANSIT);
        assert_eq!(queued[0].current_state, 1);

        // The paired update lands.
        let landed = event(
            6,
            8,
            EventData::ShipmentStateChanged {
                shipment: key(),
                old_state: 1,
                new_state: 2,
            },
        );
        f.projector.apply(&landed).await.unwrap();
        assert_eq!(f.queue.get(queued[0].id).await.unwrap().unwrap().status, UpdateStatus::Completed);
        assert_eq!(
            f.store.shipment(&key()).await.unwrap().unwrap().status,
            ShipmentStatus::ReadyForPickup
        );
    }

    #[tokio::test]
    async fn underpaid_deposit_does_not_promote() {
        let f = fixture();
        seed(&f.store, ShipmentStatus::AwaitingPayment).await;
        let terms = DepositTerms {
            shipment: key(),
            token: Address::from_bytes([0x70; 20]),
            amount: TokenAmount::from_base_units(1),
            payer: Address::from_bytes([2; 20]),
            farmer: farmer(),
            transporter: Address::from_bytes([3; 20]),
            splits: SplitBps::new(8_000, 1_500, 500).unwrap(),
        };
        f.store
            .save_deposit_intent(&DepositIntent {
                terms: terms.clone(),
                stage: IntentStage::Submitted { deposit_tx: tx(5) },
                requested_at: Timestamp::now(),
            })
            .await
            .unwrap();

        let e = event(
            5,
            7,
            EventData::PaymentDeposited {
                shipment: key(),
                payer: terms.payer,
                amount: terms.amount,
            },
        );
        f.projector.apply(&e).await.unwrap();

        assert_eq!(
            f.store.escrow(&key()).await.unwrap().unwrap().terms.amount,
            TokenAmount::from_base_units(1)
        );
        assert_eq!(
            f.store.shipment(&key()).await.unwrap().unwrap().status,
            ShipmentStatus::AwaitingPayment
        );
        assert!(f.queue.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispute_lifecycle_is_projected() {
        let f = fixture();
        seed(&f.store, ShipmentStatus::InTransit).await;
        let raiser = Address::from_bytes([2; 20]);
        let id = DisputeId::new(1);

        f.projector
            .apply(&event(1, 3, EventData::DisputeRaised { dispute: id, shipment: key(), raised_by: raiser }))
            .await
            .unwrap();
        f.projector
            .apply(&event(2, 4, EventData::EvidenceAdded {
                dispute: id,
                submitter: raiser,
                evidence_hash: "Qm1".into(),
            }))
            .await
            .unwrap();
        f.projector
            .apply(&event(3, 5, EventData::DisputeResolved { dispute: id, resolution: 0 }))
            .await
            .unwrap();
        let late = f
            .projector
            .apply(&event(4, 6, EventData::DisputeRejected { dispute: id }))
            .await
            .unwrap();
        assert_eq!(late, Applied::Skipped);

        let d = f.store.dispute(id).await.unwrap().unwrap();
        assert_eq!(d.evidence.len(), 1);
        assert_eq!(d.resolution, Some(Resolution::RefundPayer));
        assert_eq!(f.store.shipment(&key()).await.unwrap().unwrap().dispute_id, Some(id));
    }

    #[tokio::test]
    async fn untracked_shipments_are_skipped_but_marked() {
        let f = fixture();
        let e = event(1, 2, EventData::PaymentHeld { shipment: key() });
        assert_eq!(f.projector.apply(&e).await.unwrap(), Applied::Skipped);
        assert!(f.store.is_processed(&e.id).await.unwrap());
    }

    struct Recorder(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl EventObserver for Recorder {
        async fn observe(&self, event: &LedgerEvent) -> Result<(), SyncError> {
            self.0.lock().push(event.data.name());
            Ok(())
        }
    }

    #[tokio::test]
    async fn observers_see_each_event_once() {
        let mut f = fixture();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        f.projector.observe(recorder.clone());
        let e = event(
            1,
            2,
            EventData::KycAttested {
                participant: farmer(),
                role: 0,
                meta_data_hash: "Qm".into(),
            },
        );
        f.projector.apply(&e).await.unwrap();
        f.projector.apply(&e).await.unwrap();
        assert_eq!(*recorder.0.lock(), vec!["KycAttested"]);
    }
}
