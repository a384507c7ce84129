//! # agx-coordinator — Shipment Lifecycle Orchestration
//!
//! The write side of AGX. Every operation follows the same order:
//!
//! 1. Evaluate the guard against the projected shipment. A failure is a
//!    [`CoordinatorError::Validation`] and nothing is submitted.
//! 2. Claim the shipment's in-flight slot. A second writer is refused.
//! 3. Sign where the ledger requires an attestation, then submit.
//! 4. Record the expected transition as tentative and wait for the receipt.
//! 5. Leave confirmation to the event projector. A revert rolls the
//!    tentative entry back; a ledger refusal forces a re-sync.
//!
//! Components:
//!
//! - [`ShipmentMachine`]: listing, offers, carrier nomination, pickup,
//!   delivery, verification, cancellation, and payment claims.
//! - [`EscrowCoordinator`]: deposits with the allowance pre-step, holds,
//!   releases, refunds, and payer cancellation.
//! - [`DisputeResolver`]: raising, evidence, resolution, and rejection.
//! - [`AttestationDesk`]: weighments, proofs, and KYC.
//! - [`ParticipantRegistry`]: which accounts are KYC-verified.
//!
//! [`Coordinator`] wires them over one set of [`Services`].

pub mod attestations;
pub mod config;
pub mod disputes;
pub mod error;
pub mod escrow;
pub mod guard;
pub mod registry;
pub mod services;
pub mod shipments;

use std::sync::Arc;

use agx_crypto::{AttestationService, ContentStore};
use agx_ledger::LedgerClient;
use agx_sync::{EventObserver, ProjectionStore};

pub use attestations::AttestationDesk;
pub use config::CoordinatorConfig;
pub use disputes::{Decision, DisputeResolver, Raised};
pub use error::CoordinatorError;
pub use escrow::{DepositOutcome, DepositRequest, EscrowCoordinator, Settlement};
pub use guard::{InFlight, InFlightGuard};
pub use registry::{Participant, ParticipantRegistry};
pub use services::Services;
pub use shipments::{Nomination, ShipmentMachine, Submission};

/// All coordinator components over one set of services.
#[derive(Debug, Clone)]
pub struct Coordinator {
    services: Arc<Services>,
    shipments: ShipmentMachine,
    escrow: Arc<EscrowCoordinator>,
    disputes: DisputeResolver,
    attestations: AttestationDesk,
}

impl Coordinator {
    /// Build every component with a fresh participant registry.
    pub fn new(
        store: Arc<dyn ProjectionStore>,
        ledger: Arc<dyn LedgerClient>,
        attestor: Arc<AttestationService>,
        content: Arc<dyn ContentStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let registry = Arc::new(ParticipantRegistry::new());
        let services = Arc::new(Services::new(store, ledger, attestor, content, registry, config));
        let escrow = Arc::new(EscrowCoordinator::new(services.clone()));
        Self {
            shipments: ShipmentMachine::new(services.clone(), escrow.clone()),
            disputes: DisputeResolver::new(services.clone(), escrow.clone()),
            attestations: AttestationDesk::new(services.clone()),
            escrow,
            services,
        }
    }

    /// Shipment transitions.
    pub fn shipments(&self) -> &ShipmentMachine {
        &self.shipments
    }

    /// Escrow operations.
    pub fn escrow(&self) -> &Arc<EscrowCoordinator> {
        &self.escrow
    }

    /// Dispute operations.
    pub fn disputes(&self) -> &DisputeResolver {
        &self.disputes
    }

    /// Weighments, proofs, and KYC.
    pub fn attestations(&self) -> &AttestationDesk {
        &self.attestations
    }

    /// The participant registry.
    pub fn registry(&self) -> &Arc<ParticipantRegistry> {
        self.services.registry()
    }

    /// The shared handles.
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Observers the event projector must run: the registry learns KYC
    /// events and the escrow coordinator submits deferred deposits on
    /// `Approval`.
    pub fn observers(&self) -> Vec<Arc<dyn EventObserver>> {
        vec![self.services.registry().clone(), self.escrow.clone()]
    }
}
