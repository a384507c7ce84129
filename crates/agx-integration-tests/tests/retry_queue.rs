//! The in-transit update the projector queues after a deposit, delivered
//! by the retry worker through timeouts, exhaustion, and a manual retry.

mod common;

use agx_ledger::mock::state;
use agx_ledger::LedgerClient;
use agx_sync::{PendingQueue, UpdateStatus};
use common::Harness;

async fn only_entry(h: &Harness) -> agx_sync::PendingStateUpdate {
    let mut entries = h.queue.list(None).await.unwrap();
    assert_eq!(entries.len(), 1);
    entries.remove(0)
}

#[tokio::test]
async fn deposit_queues_one_in_transit_update() {
    let h = Harness::new();
    let key = h.funded().await;
    let entry = only_entry(&h).await;
    assert_eq!(entry.shipment, key);
    assert_eq!(entry.current_state, state::ASSIGNED);
    assert_eq!(entry.target_state, state::IN_TRANSIT);
    assert_eq!(entry.status, UpdateStatus::Pending);
    assert_eq!(entry.max_attempts, 3);

    let report = h.drain().await;
    assert_eq!(report.completed, 1);
    assert_eq!(only_entry(&h).await.status, UpdateStatus::Completed);
    assert_eq!(
        h.ledger.shipment(&key).await.unwrap().unwrap().state,
        state::IN_TRANSIT
    );
}

#[tokio::test]
async fn three_timeouts_fail_the_entry_until_retried() {
    let h = Harness::new();
    let key = h.funded().await;
    h.ledger.set_auto_mine(false);

    for attempt in 1..=2 {
        let report = h.drain().await;
        assert_eq!(report.retried, 1, "attempt {attempt}");
        let entry = only_entry(&h).await;
        assert_eq!(entry.status, UpdateStatus::Pending);
        assert_eq!(entry.attempts, attempt);
    }
    let report = h.drain().await;
    assert_eq!(report.failed, 1);

    let failed = only_entry(&h).await;
    assert_eq!(failed.status, UpdateStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert!(failed.last_error.is_some());
    assert!(failed.last_tx.is_some());
    assert_eq!(h.ledger.submission_count("updateShipmentState"), 1);

    let retried = h.queue.retry(failed.id).await.unwrap();
    assert_eq!(retried.status, UpdateStatus::Pending);
    assert_eq!(retried.attempts, 0);

    h.ledger.set_auto_mine(true);
    h.ledger.mine();
    let report = h.drain().await;
    assert_eq!(report.completed, 1);
    assert_eq!(only_entry(&h).await.status, UpdateStatus::Completed);
    assert_eq!(
        h.ledger.shipment(&key).await.unwrap().unwrap().state,
        state::IN_TRANSIT
    );
}

#[tokio::test]
async fn projector_completes_entry_it_sees_land() {
    let h = Harness::new();
    h.funded().await;
    let entry = only_entry(&h).await;
    h.ledger.set_auto_mine(false);
    h.drain().await;
    h.ledger.set_auto_mine(true);
    h.ledger.mine();

    h.sync().await;
    let entry = h.queue.get(entry.id).await.unwrap().unwrap();
    assert_eq!(entry.status, UpdateStatus::Completed);
    assert!(h.drain().await.is_empty());
}

#[tokio::test]
async fn dismissed_entry_is_never_retried_by_the_worker() {
    let h = Harness::new();
    h.funded().await;
    let entry = only_entry(&h).await;
    let dismissed = h.queue.dismiss(entry.id, "handled by hand").await.unwrap();
    assert_eq!(dismissed.status, UpdateStatus::Failed);
    assert_eq!(dismissed.last_error.as_deref(), Some("dismissed: handled by hand"));
    assert!(h.drain().await.is_empty());
    assert_eq!(h.ledger.submission_count("updateShipmentState"), 0);
}
