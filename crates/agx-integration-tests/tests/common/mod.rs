//! Shared wiring for the cross-crate tests: an in-process ledger, memory
//! stores, the coordinator, a projector with the coordinator's observers,
//! and a retry worker draining the projector's queue.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use agx_coordinator::{Coordinator, CoordinatorConfig, DepositOutcome, DepositRequest, Nomination};
use agx_core::{Actor, Address, ProfileId, Role, ShipmentKey, ShipmentRef, SplitBps, TokenAmount};
use agx_crypto::{AttestationConfig, AttestationService, LocalKeySigner, MemoryContentStore};
use agx_ledger::{LedgerClient, MockLedger, ReceiptPolicy};
use agx_state::Shipment;
use agx_sync::{
    EventProjector, MemoryQueue, MemoryStore, ProjectionStore, ProjectorConfig, RetryWorker, WorkerConfig,
    WorkerReport,
};
use serde_json::json;

pub const PRICE: u128 = 1_000;

pub fn token() -> Address {
    Address::from_bytes([0x70; 20])
}

pub fn actor(id: &str, byte: u8, role: Role) -> Actor {
    Actor::new(ProfileId::new(id).unwrap(), Address::from_bytes([byte; 20]), role)
}

pub fn standard_split() -> SplitBps {
    SplitBps::new(8000, 1500, 500).unwrap()
}

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub queue: Arc<MemoryQueue>,
    pub coordinator: Coordinator,
    pub projector: EventProjector,
    pub worker: RetryWorker,
    pub farmer: Actor,
    pub industry: Actor,
    pub carrier: Actor,
    pub other_carrier: Actor,
    pub resolver: Actor,
}

impl Harness {
    pub fn new() -> Self {
        let ledger = Arc::new(MockLedger::new(
            MockLedger::local().config().clone().watch_token(token()),
        ));
        let attestor = Arc::new(AttestationService::new(
            AttestationConfig::default().with_chain_id(31337),
            Arc::new(LocalKeySigner::generate()),
        ));
        ledger.register_attestor(attestor.signer_address());
        let resolver = actor("resolver-1", 0x0d, Role::Resolver);
        ledger.register_resolver(resolver.address);

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let coordinator = Coordinator::new(
            store.clone(),
            ledger.clone(),
            attestor.clone(),
            Arc::new(MemoryContentStore::new()),
            CoordinatorConfig::default()
                .with_token_decimals(0)
                .with_confirmation_timeout(Duration::from_millis(200)),
        );

        let mut projector = EventProjector::new(
            store,
            queue.clone(),
            ledger.clone(),
            ProjectorConfig { max_attempts: 3 },
        );
        for observer in coordinator.observers() {
            projector.observe(observer);
        }

        let worker = RetryWorker::new(
            queue.clone(),
            ledger.clone(),
            attestor,
            coordinator.services().operator(),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                batch_size: 16,
                base_delay_ms: 0,
                receipt: ReceiptPolicy {
                    timeout: Duration::from_millis(50),
                    poll_interval: Duration::from_millis(5),
                    confirmations: 1,
                },
                stale_after: Duration::from_secs(60),
            },
        );

        let industry = actor("industry-1", 0x0b, Role::Industry);
        ledger.mint(token(), industry.address, TokenAmount::from_base_units(10_000));

        Self {
            ledger,
            queue,
            coordinator,
            projector,
            worker,
            farmer: actor("farmer-1", 0x0a, Role::Farmer),
            industry,
            carrier: actor("carrier-1", 0x0c, Role::Transporter),
            other_carrier: actor("carrier-2", 0x0e, Role::Transporter),
            resolver,
        }
    }

    pub fn key(&self) -> ShipmentKey {
        ShipmentRef::new("S1").unwrap().key()
    }

    /// KYC-attest `who` through the coordinator.
    pub async fn verify(&self, who: &Actor) {
        self.coordinator
            .attestations()
            .attest_kyc(who, &json!({ "role": who.role.as_str(), "checked": true }))
            .await
            .unwrap();
    }

    /// Apply every confirmed event, repeating while observers keep
    /// producing new blocks.
    pub async fn sync(&self) -> usize {
        let mut total = 0;
        for _ in 0..4 {
            let applied = self.projector.catch_up().await.unwrap();
            if applied == 0 {
                break;
            }
            total += applied;
        }
        total
    }

    pub async fn drain(&self) -> WorkerReport {
        self.worker.process_due().await.unwrap()
    }

    pub async fn shipment(&self, key: &ShipmentKey) -> Shipment {
        self.coordinator.services().shipment(key).await.unwrap()
    }

    pub fn store(&self) -> &Arc<dyn ProjectionStore> {
        self.coordinator.services().store()
    }

    /// `S1` listed, offered on, and assigned to the first carrier by both
    /// parties.
    pub async fn assigned(&self) -> ShipmentKey {
        let machine = self.coordinator.shipments();
        let key = self.key();
        machine
            .create(&self.farmer, ShipmentRef::new("S1").unwrap(), &PRICE.to_string())
            .await
            .unwrap();
        machine.make_offer(&self.industry, &key).await.unwrap();
        self.verify(&self.carrier).await;
        let first = machine
            .nominate_carrier(&self.farmer, &key, self.carrier.address)
            .await
            .unwrap();
        assert!(matches!(first, Nomination::Recorded(_)));
        let second = machine
            .nominate_carrier(&self.industry, &key, self.carrier.address)
            .await
            .unwrap();
        assert!(matches!(second, Nomination::Assigned(_)));
        key
    }

    pub fn deposit_request(&self, key: ShipmentKey, splits: SplitBps) -> DepositRequest {
        DepositRequest {
            shipment: key,
            token: token(),
            amount: TokenAmount::from_base_units(PRICE),
            farmer: self.farmer.address,
            transporter: self.carrier.address,
            splits,
        }
    }

    /// `S1` paid for through the allowance pre-step and projected.
    pub async fn funded(&self) -> ShipmentKey {
        let key = self.assigned().await;
        let outcome = self
            .coordinator
            .escrow()
            .deposit(&self.industry, self.deposit_request(key, standard_split()))
            .await
            .unwrap();
        assert!(matches!(outcome, DepositOutcome::AwaitingApproval { .. }));
        self.sync().await;
        key
    }

    /// `S1` funded, moved to IN_TRANSIT on the ledger by the worker, and
    /// collected by the carrier.
    pub async fn in_transit(&self) -> ShipmentKey {
        let key = self.funded().await;
        let report = self.drain().await;
        assert_eq!(report.completed, 1);
        self.sync().await;
        self.coordinator.shipments().pickup(&self.carrier, &key).await.unwrap();
        key
    }
}
