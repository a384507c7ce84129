//! # Retry Worker
//!
//! Drains the [`PendingQueue`]. For each due entry:
//!
//! 1. Read the ledger. If the shipment already reached the target, the entry
//!    is done; if it left the main path, the entry can never succeed.
//! 2. If a previous attempt submitted a transaction, look for its receipt
//!    before submitting again.
//! 3. Sign a fresh state update (the payload timestamp must be current) and
//!    submit it, then wait for the receipt.
//!
//! Transport failures and receipt timeouts are retried with exponential
//! backoff until the entry's attempts are spent. Rejections, reverts, and
//! signing failures are permanent.

use std::sync::Arc;
use std::time::Duration;

use agx_core::{Address, Timestamp};
use agx_crypto::AttestationService;
use agx_ledger::{wait_for_receipt, LedgerCall, LedgerClient, LedgerError, ReceiptPolicy};
use tokio::sync::watch;

use crate::error::SyncError;
use crate::model::PendingStateUpdate;
use crate::queue::PendingQueue;

/// Ledger code of the payout state; the last main-path state.
const PAID: u8 = 5;

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between queue polls.
    pub poll_interval: Duration,
    /// Entries claimed per poll.
    pub batch_size: usize,
    /// First retry delay; doubles per attempt.
    pub base_delay_ms: u64,
    /// How long to wait for each receipt.
    pub receipt: ReceiptPolicy,
    /// Processing entries untouched this long are returned to the queue at
    /// start-up.
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 16,
            base_delay_ms: 200,
            receipt: ReceiptPolicy::default(),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Outcome counts of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Entries completed.
    pub completed: usize,
    /// Entries rescheduled.
    pub retried: usize,
    /// Entries failed for good.
    pub failed: usize,
}

impl WorkerReport {
    /// Whether the pass touched anything.
    pub fn is_empty(&self) -> bool {
        self.completed + self.retried + self.failed == 0
    }
}

enum Outcome {
    Completed,
    Retry(String),
    Permanent(String),
}

/// Delivers queued state updates to the ledger.
pub struct RetryWorker {
    queue: Arc<dyn PendingQueue>,
    ledger: Arc<dyn LedgerClient>,
    attestor: Arc<AttestationService>,
    operator: Address,
    config: WorkerConfig,
}

impl std::fmt::Debug for RetryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryWorker")
            .field("operator", &self.operator)
            .field("config", &self.config)
            .finish()
    }
}

impl RetryWorker {
    /// A worker submitting from `operator` with updates signed by
    /// `attestor`.
    pub fn new(
        queue: Arc<dyn PendingQueue>,
        ledger: Arc<dyn LedgerClient>,
        attestor: Arc<AttestationService>,
        operator: Address,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            ledger,
            attestor,
            operator,
            config,
        }
    }

    /// Delay before retry number `attempts + 1`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts.min(16)).unwrap_or(u64::MAX);
        Duration::from_millis(self.config.base_delay_ms.saturating_mul(factor))
    }

    /// Process every entry due now.
    pub async fn process_due(&self) -> Result<WorkerReport, SyncError> {
        let now = Timestamp::now();
        let due = self.queue.claim_due(now, self.config.batch_size).await?;
        let mut report = WorkerReport::default();

        for entry in due {
            match self.attempt(&entry).await {
                Outcome::Completed => {
                    self.queue.complete(entry.id).await?;
                    tracing::info!(
                        entry = %entry.id,
                        shipment = %entry.shipment,
                        target = entry.target_state,
                        "state update landed"
                    );
                    report.completed += 1;
                }
                Outcome::Retry(reason) => {
                    let retry_at = later(self.backoff(entry.attempts));
                    let after = self.queue.fail_attempt(entry.id, &reason, Some(retry_at)).await?;
                    if after.status.is_terminal() {
                        tracing::error!(
                            entry = %entry.id,
                            shipment = %entry.shipment,
                            attempts = after.attempts,
                            error = %reason,
                            "state update out of attempts"
                        );
                        report.failed += 1;
                    } else {
                        tracing::warn!(
                            entry = %entry.id,
                            shipment = %entry.shipment,
                            attempt = after.attempts,
                            retry_at = %retry_at,
                            error = %reason,
                            "state update failed, will retry"
                        );
                        report.retried += 1;
                    }
                }
                Outcome::Permanent(reason) => {
                    self.queue.fail_attempt(entry.id, &reason, None).await?;
                    tracing::error!(
                        entry = %entry.id,
                        shipment = %entry.shipment,
                        error = %reason,
                        "state update failed permanently"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Poll the queue until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        let stale = Timestamp::now().plus_secs(-(self.config.stale_after.as_secs() as i64));
        let released = self.queue.release_stale(stale).await?;
        if released > 0 {
            tracing::warn!(released, "returned stale claims to the queue");
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_due().await {
                        Ok(report) if !report.is_empty() => {
                            tracing::info!(
                                completed = report.completed,
                                retried = report.retried,
                                failed = report.failed,
                                "retry pass finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "retry pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("retry worker stopped");
        Ok(())
    }

    async fn attempt(&self, entry: &PendingStateUpdate) -> Outcome {
        match self.progress(entry).await {
            Ok(Some(done)) => return done,
            Ok(None) => {}
            Err(e) => return classify(e),
        }

        if let Some(previous) = entry.last_tx {
            match self.ledger.receipt(&previous).await {
                Ok(Some(r)) if r.success => return Outcome::Completed,
                Ok(Some(_)) => {}
                Ok(None) => return Outcome::Retry(format!("transaction {previous} still pending")),
                Err(e) => return classify(e),
            }
        }

        let signed = match self
            .attestor
            .attest_state_update(entry.shipment, entry.target_state)
            .await
        {
            Ok(s) => s,
            Err(e) => return Outcome::Permanent(format!("signing failed: {e}")),
        };

        let tx = match self.ledger.submit(self.operator, LedgerCall::Attested(signed)).await {
            Ok(tx) => tx,
            Err(e) => return classify(e),
        };
        if let Err(e) = self.queue.mark_submitted(entry.id, tx).await {
            tracing::warn!(entry = %entry.id, error = %e, "could not record submitted transaction");
        }
        tracing::debug!(entry = %entry.id, tx = %tx, "state update submitted");

        match wait_for_receipt(self.ledger.as_ref(), &tx, self.config.receipt).await {
            Ok(_) => Outcome::Completed,
            Err(e @ LedgerError::Reverted { .. }) => match self.progress(entry).await {
                // Another submission got there first.
                Ok(Some(Outcome::Completed)) => Outcome::Completed,
                _ => classify(e),
            },
            Err(e) => classify(e),
        }
    }

    /// `Some` when the ledger state alone settles the entry.
    async fn progress(&self, entry: &PendingStateUpdate) -> Result<Option<Outcome>, LedgerError> {
        let Some(onchain) = self.ledger.shipment(&entry.shipment).await? else {
            return Ok(Some(Outcome::Permanent(format!(
                "shipment {} is not on the ledger",
                entry.shipment
            ))));
        };
        if onchain.state > PAID {
            return Ok(Some(Outcome::Permanent(format!(
                "shipment left the main path (ledger state {})",
                onchain.state
            ))));
        }
        if onchain.state >= entry.target_state {
            return Ok(Some(Outcome::Completed));
        }
        Ok(None)
    }
}

fn classify(e: LedgerError) -> Outcome {
    if e.is_transient() {
        Outcome::Retry(e.to_string())
    } else {
        Outcome::Permanent(e.to_string())
    }
}

fn later(delay: Duration) -> Timestamp {
    let now = Timestamp::now();
    let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    Timestamp::from_datetime(*now.as_datetime() + chrono::Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::{ShipmentKey, ShipmentRef, SplitBps, TokenAmount};
    use agx_crypto::{AttestationConfig, LocalKeySigner};
    use agx_ledger::mock::state;
    use agx_ledger::MockLedger;

    use crate::memory::MemoryQueue;
    use crate::model::UpdateStatus;

    const FARMER: [u8; 20] = [1; 20];
    const INDUSTRY: [u8; 20] = [2; 20];
    const TRANSPORTER: [u8; 20] = [3; 20];
    const TOKEN: [u8; 20] = [0x70; 20];

    struct Fixture {
        ledger: Arc<MockLedger>,
        queue: Arc<MemoryQueue>,
        worker: RetryWorker,
        attestor: Arc<AttestationService>,
    }

    fn key() -> ShipmentKey {
        ShipmentRef::new("ship-w").unwrap().key()
    }

    fn fast() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 8,
            base_delay_ms: 0,
            receipt: ReceiptPolicy {
                timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(5),
                confirmations: 1,
            },
            stale_after: Duration::from_secs(60),
        }
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MockLedger::local());
        let signer = Arc::new(LocalKeySigner::generate());
        let attestor = Arc::new(AttestationService::new(
            AttestationConfig::default().with_chain_id(31337),
            signer,
        ));
        ledger.register_attestor(attestor.signer_address());
        let queue = Arc::new(MemoryQueue::new());
        let worker = RetryWorker::new(
            queue.clone(),
            ledger.clone(),
            attestor.clone(),
            attestor.signer_address(),
            fast(),
        );
        Fixture {
            ledger,
            queue,
            worker,
            attestor,
        }
    }

    /// Drive a shipment to ASSIGNED with a funded escrow.
    async fn funded(f: &Fixture) {
        let (farmer, industry, transporter, token) = (
            Address::from_bytes(FARMER),
            Address::from_bytes(INDUSTRY),
            Address::from_bytes(TRANSPORTER),
            Address::from_bytes(TOKEN),
        );
        let l = &f.ledger;
        l.submit(farmer, LedgerCall::CreateShipment { shipment: key(), ask_price: TokenAmount::from_base_units(100) })
            .await
            .unwrap();
        l.submit(industry, LedgerCall::SetIndustry { shipment: key() }).await.unwrap();
        let kyc = f
            .attestor
            .attest_kyc(transporter, agx_core::Role::Transporter, "Qm")
            .await
            .unwrap();
        l.submit(f.attestor.signer_address(), LedgerCall::Attested(kyc)).await.unwrap();
        l.submit(farmer, LedgerCall::AssignTransporter { shipment: key(), transporter })
            .await
            .unwrap();
        l.mint(token, industry, TokenAmount::from_base_units(100));
        l.submit(
            industry,
            LedgerCall::Approve {
                token,
                spender: l.escrow_address(),
                amount: TokenAmount::from_base_units(100),
            },
        )
        .await
        .unwrap();
        l.submit(
            industry,
            LedgerCall::DepositPayment {
                shipment: key(),
                token,
                amount: TokenAmount::from_base_units(100),
                farmer,
                transporter,
                splits: SplitBps::new(9_000, 1_000, 0).unwrap(),
            },
        )
        .await
        .unwrap();
    }

    async fn ledger_state(f: &Fixture) -> u8 {
        f.ledger.shipment(&key()).await.unwrap().unwrap().state
    }

    #[tokio::test]
    async fn delivers_queued_update() {
        let f = fixture();
        funded(&f).await;
        let entry = f.queue.enqueue(key(), state::ASSIGNED, state::IN_TRANSIT, 3).await.unwrap();

        let report = f.worker.process_due().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(ledger_state(&f).await, state::IN_TRANSIT);
        let done = f.queue.get(entry.id).await.unwrap().unwrap();
        assert_eq!(done.status, UpdateStatus::Completed);
        assert!(done.last_tx.is_some());
    }

    #[tokio::test]
    async fn transient_failures_back_off_then_succeed() {
        let f = fixture();
        funded(&f).await;
        let entry = f.queue.enqueue(key(), state::ASSIGNED, state::IN_TRANSIT, 3).await.unwrap();
        f.ledger.fail_next_submits(1);

        let first = f.worker.process_due().await.unwrap();
        assert_eq!(first.retried, 1);
        let pending = f.queue.get(entry.id).await.unwrap().unwrap();
        assert_eq!(pending.status, UpdateStatus::Pending);
        assert_eq!(pending.attempts, 1);

        let second = f.worker.process_due().await.unwrap();
        assert_eq!(second.completed, 1);
        assert_eq!(ledger_state(&f).await, state::IN_TRANSIT);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail() {
        let f = fixture();
        funded(&f).await;
        let entry = f.queue.enqueue(key(), state::ASSIGNED, state::IN_TRANSIT, 2).await.unwrap();
        f.ledger.set_offline(true);

        f.worker.process_due().await.unwrap();
        let report = f.worker.process_due().await.unwrap();
        assert_eq!(report.failed, 1);
        let failed = f.queue.get(entry.id).await.unwrap().unwrap();
        assert_eq!(failed.status, UpdateStatus::Failed);
        assert!(failed.last_error.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn rejection_is_permanent() {
        let f = fixture();
        funded(&f).await;
        // DELIVERED is not reachable from ASSIGNED.
        let entry = f.queue.enqueue(key(), state::ASSIGNED, state::DELIVERED, 3).await.unwrap();

        let report = f.worker.process_due().await.unwrap();
        assert_eq!(report.failed, 1);
        let failed = f.queue.get(entry.id).await.unwrap().unwrap();
        assert_eq!(failed.status, UpdateStatus::Failed);
        assert_eq!(failed.attempts, 1);
    }

    #[tokio::test]
    async fn already_reached_target_completes_without_submitting() {
        let f = fixture();
        funded(&f).await;
        f.queue.enqueue(key(), state::ASSIGNED, state::IN_TRANSIT, 3).await.unwrap();
        f.worker.process_due().await.unwrap();
        let submitted = f.ledger.submission_count("updateShipmentState");

        let again = f.queue.enqueue(key(), state::OPEN, state::ASSIGNED, 3).await.unwrap();
        let report = f.worker.process_due().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(f.ledger.submission_count("updateShipmentState"), submitted);
        assert_eq!(f.queue.get(again.id).await.unwrap().unwrap().status, UpdateStatus::Completed);
    }

    #[test]
    fn backoff_doubles() {
        let f = fixture();
        let worker = RetryWorker::new(
            f.queue.clone(),
            f.ledger.clone(),
            f.attestor.clone(),
            Address::ZERO,
            WorkerConfig::default(),
        );
        assert_eq!(worker.backoff(0), Duration::from_millis(200));
        assert_eq!(worker.backoff(1), Duration::from_millis(400));
        assert_eq!(worker.backoff(3), Duration::from_millis(1_600));
    }
}
