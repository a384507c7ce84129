//! Properties that must hold whatever order or number of times things
//! arrive: redelivered events change nothing, rejected operations leave the
//! projection alone, and escrow money moves at most once.

mod common;

use agx_arbitration::EscrowStatus;
use agx_core::{SplitBps, BPS_DENOMINATOR};
use agx_ledger::LedgerClient;
use agx_state::{RejectionReason, ShipmentStatus};
use agx_sync::{Applied, ProjectionStore};
use common::{standard_split, Harness};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Idempotent projection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn redelivered_events_are_duplicates() {
    let h = Harness::new();
    let key = h.in_transit().await;
    let shipment = h.shipment(&key).await;
    let escrow = h.store().escrow(&key).await.unwrap();
    let cursor = h.store().cursor().await.unwrap();

    let head = h.ledger.block_number().await.unwrap();
    let events = h.ledger.events(0, head).await.unwrap();
    assert!(!events.is_empty());
    for event in &events {
        assert_eq!(h.projector.apply(event).await.unwrap(), Applied::Duplicate);
    }

    assert_eq!(h.shipment(&key).await, shipment);
    assert_eq!(h.store().escrow(&key).await.unwrap(), escrow);
    assert_eq!(h.store().cursor().await.unwrap(), cursor);
}

#[tokio::test]
async fn catch_up_twice_applies_nothing_new() {
    let h = Harness::new();
    let key = h.funded().await;
    let before = h.shipment(&key).await;
    assert_eq!(h.projector.catch_up().await.unwrap(), 0);
    assert_eq!(h.shipment(&key).await, before);
}

// ---------------------------------------------------------------------------
// Rejections do not touch state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn guard_rejection_leaves_projection_and_ledger_alone() {
    let h = Harness::new();
    let key = h.funded().await;
    let before = h.shipment(&key).await;
    let submitted = h.ledger.submissions().len();

    let err = h.coordinator.shipments().deliver(&h.carrier, &key).await.unwrap_err();
    assert_eq!(err.rejection_reason(), Some(RejectionReason::WrongState));
    let err = h.coordinator.shipments().verify(&h.farmer, &key).await.unwrap_err();
    assert!(err.rejection_reason().is_some());

    assert_eq!(h.shipment(&key).await, before);
    assert_eq!(h.ledger.submissions().len(), submitted);
}

#[tokio::test]
async fn second_deposit_fails() {
    let h = Harness::new();
    let key = h.assigned().await;
    let escrow = h.coordinator.escrow();
    h.ledger.set_auto_mine(false);
    escrow
        .deposit(&h.industry, h.deposit_request(key, standard_split()))
        .await
        .unwrap();
    let waiting = escrow
        .deposit(&h.industry, h.deposit_request(key, standard_split()))
        .await
        .unwrap_err();
    assert_eq!(waiting.rejection_reason(), Some(RejectionReason::PreconditionNotMet));
    assert_eq!(h.ledger.submission_count("approve"), 1);

    h.ledger.set_auto_mine(true);
    h.ledger.mine();
    h.sync().await;
    let after = escrow
        .deposit(&h.industry, h.deposit_request(key, standard_split()))
        .await
        .unwrap_err();
    assert_eq!(after.rejection_reason(), Some(RejectionReason::WrongState));
    assert_eq!(h.ledger.submission_count("depositPayment"), 1);
    assert_eq!(h.store().escrow(&key).await.unwrap().unwrap().status, EscrowStatus::Deposited);
}

#[tokio::test]
async fn concurrent_pickups_admit_one() {
    let h = Harness::new();
    let key = h.funded().await;
    let machine = h.coordinator.shipments();
    let (a, b) = tokio::join!(machine.pickup(&h.carrier, &key), machine.pickup(&h.carrier, &key));
    assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
    assert_eq!(h.shipment(&key).await.status, ShipmentStatus::InTransit);
}

// ---------------------------------------------------------------------------
// Split bounds
// ---------------------------------------------------------------------------

fn over_one_whole() -> impl Strategy<Value = (u16, u16, u16)> {
    (0u16..=10_000, 0u16..=10_000, 0u16..=10_000).prop_filter("total above one whole", |(f, t, p)| {
        u32::from(*f) + u32::from(*t) + u32::from(*p) > BPS_DENOMINATOR
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn oversized_split_never_reaches_the_ledger((f, t, p) in over_one_whole()) {
        prop_assert!(SplitBps::new(f, t, p).is_err());

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (reason, submitted, after) = rt.block_on(async {
            let h = Harness::new();
            let key = h.assigned().await;
            let submitted = h.ledger.submissions().len();
            let split = SplitBps { farmer_bps: f, transporter_bps: t, platform_bps: p };
            let err = h
                .coordinator
                .escrow()
                .deposit(&h.industry, h.deposit_request(key, split))
                .await
                .unwrap_err();
            (err.rejection_reason(), submitted, h.ledger.submissions().len())
        });
        prop_assert_eq!(reason, Some(RejectionReason::PreconditionNotMet));
        prop_assert_eq!(submitted, after);
    }
}
