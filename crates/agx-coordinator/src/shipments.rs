//! # Shipment Machine
//!
//! Drives shipments through their lifecycle. Every operation follows the
//! same path:
//!
//! 1. Claim the shipment's in-flight slot.
//! 2. Load the projection and run the transition guards. A rejection
//!    returns here with nothing written.
//! 3. Build the ledger call, signing an attestation where the contract
//!    requires one, and submit it from the caller's account.
//! 4. Record the transition tentatively, tagged with the transaction.
//! 5. Wait for the receipt. A revert fails the tentative entry and restores
//!    the previous status; the projector confirms successful entries.
//!
//! Pickup is the one off-chain step: the ledger moves to IN_TRANSIT when
//! the deposit is confirmed, and the carrier's collection only refines the
//! projection.

use std::sync::Arc;

use agx_core::{Actor, Address, Role, ShipmentKey, ShipmentRef, Timestamp, TokenAmount, TxHash};
use agx_ledger::LedgerCall;
use agx_state::{
    check, Confirmation, GuardContext, RejectionReason, Shipment, ShipmentAction, ShipmentStatus,
    TentativeTransition,
};

use crate::error::CoordinatorError;
use crate::escrow::{EscrowCoordinator, Settlement};
use crate::services::Services;

/// A transition that reached the ledger.
#[derive(Debug, Clone)]
pub struct Submission {
    /// The transaction.
    pub tx: TxHash,
    /// Block that included it.
    pub block: u64,
    /// The projection after the tentative write.
    pub shipment: Shipment,
}

/// Result of a carrier nomination.
#[derive(Debug, Clone)]
pub enum Nomination {
    /// The other party has not nominated the same carrier yet.
    Recorded(Shipment),
    /// Both parties agree; the carrier was assigned on the ledger.
    Assigned(Submission),
}

/// Guarded shipment transitions.
#[derive(Debug, Clone)]
pub struct ShipmentMachine {
    services: Arc<Services>,
    escrow: Arc<EscrowCoordinator>,
}

impl ShipmentMachine {
    /// A machine over `services`; claims are paid out through `escrow`.
    pub fn new(services: Arc<Services>, escrow: Arc<EscrowCoordinator>) -> Self {
        Self { services, escrow }
    }

    /// A farmer lists a shipment at `ask_price`, given in whole tokens.
    #[tracing::instrument(skip_all, fields(shipment = %reference, farmer = %farmer.address))]
    pub async fn create(
        &self,
        farmer: &Actor,
        reference: ShipmentRef,
        ask_price: &str,
    ) -> Result<Submission, CoordinatorError> {
        const ACTION: &str = "create";
        if farmer.role != Role::Farmer {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongActor,
                ACTION,
                format!("only a farmer may list a shipment, caller is {}", farmer.role),
            ));
        }
        let price = TokenAmount::parse_decimal(ask_price, self.services.config.token_decimals)?;
        if price.is_zero() {
            return Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                ACTION,
                "ask price must be positive",
            ));
        }
        let key = reference.key();
        let _flight = self.services.in_flight.acquire(key, ACTION)?;
        if self.services.store.shipment(&key).await?.is_some() {
            return Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                ACTION,
                format!("shipment {reference} already exists"),
            ));
        }

        let call = LedgerCall::CreateShipment {
            shipment: key,
            ask_price: price,
        };
        let name = call.name();
        let tx = self.services.submit(farmer.address, call).await?;
        // Reverted creates leave no record; anything else may still land.
        let receipt = match self.services.confirm(name, &tx).await {
            Err(e @ (CoordinatorError::LedgerRejected { .. } | CoordinatorError::Signature(_))) => return Err(e),
            other => other,
        };

        let at = Timestamp::now();
        let mut shipment = Shipment::create(reference, farmer, price, at, Confirmation::Tentative { tx });
        shipment.tentative = Some(TentativeTransition {
            tx,
            from: ShipmentStatus::Pending,
            to: ShipmentStatus::Pending,
            submitted_at: at,
        });
        shipment.version = self.services.store.save_shipment(&shipment, None).await?;
        tracing::info!(shipment = %key, %tx, price = %price, "shipment listed");

        let receipt = receipt?;
        Ok(Submission {
            tx,
            block: receipt.block_number,
            shipment,
        })
    }

    /// An industry makes an offer on a listed shipment.
    #[tracing::instrument(skip_all, fields(shipment = %key, industry = %industry.address))]
    pub async fn make_offer(&self, industry: &Actor, key: &ShipmentKey) -> Result<Submission, CoordinatorError> {
        let _flight = self.services.in_flight.acquire(*key, "make_offer")?;
        let shipment = self.services.shipment(key).await?;
        let plan = check(&shipment, &ShipmentAction::MakeOffer, &GuardContext::new(industry))?;

        let profile = industry.profile_id.clone();
        let address = industry.address;
        self.transition(
            industry.address,
            key,
            LedgerCall::SetIndustry { shipment: *key },
            plan.to,
            format!("offer from {profile}"),
            move |s| {
                s.industry_id = Some(profile.clone());
                s.industry_address = Some(address);
            },
        )
        .await
    }

    /// The farmer or industry nominates a carrier. The carrier is assigned
    /// on the ledger once both parties have nominated the same
    /// KYC-verified account.
    #[tracing::instrument(skip_all, fields(shipment = %key, actor = %actor.address, carrier = %carrier))]
    pub async fn nominate_carrier(
        &self,
        actor: &Actor,
        key: &ShipmentKey,
        carrier: Address,
    ) -> Result<Nomination, CoordinatorError> {
        let _flight = self.services.in_flight.acquire(*key, "nominate_carrier")?;
        let shipment = self.services.shipment(key).await?;
        let ctx = GuardContext::new(actor)
            .carrier_verified(self.services.registry.is_verified_as(&carrier, Role::Transporter));
        let plan = check(&shipment, &ShipmentAction::NominateCarrier { carrier }, &ctx)?;
        let by_farmer = actor.role == Role::Farmer;
        let nominate = move |s: &mut Shipment| {
            if by_farmer {
                s.farmer_nomination = Some(carrier);
            } else {
                s.industry_nomination = Some(carrier);
            }
        };

        if !plan.changes_status() {
            let at = Timestamp::now();
            let shipment = self
                .services
                .update_shipment(key, |s| {
                    nominate(s);
                    s.updated_at = at;
                    true
                })
                .await?;
            tracing::info!("carrier nomination recorded");
            return Ok(Nomination::Recorded(shipment));
        }

        let submission = self
            .transition(
                actor.address,
                key,
                LedgerCall::AssignTransporter {
                    shipment: *key,
                    transporter: carrier,
                },
                plan.to,
                format!("carrier {carrier} assigned"),
                move |s| {
                    nominate(s);
                    s.transporter = Some(carrier);
                },
            )
            .await?;
        Ok(Nomination::Assigned(submission))
    }

    /// The assigned carrier collects the goods.
    #[tracing::instrument(skip_all, fields(shipment = %key, carrier = %carrier.address))]
    pub async fn pickup(&self, carrier: &Actor, key: &ShipmentKey) -> Result<Shipment, CoordinatorError> {
        let _flight = self.services.in_flight.acquire(*key, "pickup")?;
        let shipment = self.services.shipment(key).await?;
        let ctx = GuardContext::new(carrier).escrow(self.services.escrow_facts(key).await?);
        let plan = check(&shipment, &ShipmentAction::Pickup, &ctx)?;
        let at = Timestamp::now();
        let shipment = self
            .services
            .update_shipment(key, |s| {
                s.push_status(plan.to, at, "picked up by carrier", Confirmation::Local);
                true
            })
            .await?;
        tracing::info!("shipment picked up");
        Ok(shipment)
    }

    /// The assigned carrier delivers.
    #[tracing::instrument(skip_all, fields(shipment = %key, carrier = %carrier.address))]
    pub async fn deliver(&self, carrier: &Actor, key: &ShipmentKey) -> Result<Submission, CoordinatorError> {
        self.attested(carrier, key, ShipmentAction::Deliver, "delivered").await
    }

    /// The industry confirms receipt.
    #[tracing::instrument(skip_all, fields(shipment = %key, industry = %industry.address))]
    pub async fn verify(&self, industry: &Actor, key: &ShipmentKey) -> Result<Submission, CoordinatorError> {
        self.attested(industry, key, ShipmentAction::Verify, "delivery verified").await
    }

    /// The farmer or industry cancels. Requires that no escrow is live.
    #[tracing::instrument(skip_all, fields(shipment = %key, actor = %actor.address))]
    pub async fn cancel(&self, actor: &Actor, key: &ShipmentKey) -> Result<Submission, CoordinatorError> {
        self.attested(actor, key, ShipmentAction::Cancel, "cancelled").await
    }

    /// The farmer claims payment for a verified shipment.
    pub async fn claim(&self, farmer: &Actor, key: &ShipmentKey) -> Result<Settlement, CoordinatorError> {
        self.escrow.release(farmer, key).await
    }

    /// Guarded attestor-signed `updateShipmentState` to the guard's target.
    async fn attested(
        &self,
        actor: &Actor,
        key: &ShipmentKey,
        action: ShipmentAction,
        details: &str,
    ) -> Result<Submission, CoordinatorError> {
        let _flight = self.services.in_flight.acquire(*key, action.name())?;
        let shipment = self.services.shipment(key).await?;
        let escrow = self.services.escrow_facts(key).await?;
        let plan = check(&shipment, &action, &GuardContext::new(actor).escrow(escrow))?;

        let attestation = self
            .services
            .attestor
            .attest_state_update(*key, plan.to.ledger_state().code())
            .await?;
        self.transition(
            actor.address,
            key,
            LedgerCall::Attested(attestation),
            plan.to,
            details.to_string(),
            |_| {},
        )
        .await
    }

    /// Submit `call`, record the tentative move to `to` together with
    /// `apply`, and settle the receipt.
    async fn transition(
        &self,
        from: Address,
        key: &ShipmentKey,
        call: LedgerCall,
        to: ShipmentStatus,
        details: String,
        apply: impl Fn(&mut Shipment) + Send + Sync,
    ) -> Result<Submission, CoordinatorError> {
        let name = call.name();
        let tx = self.services.submit_transition(key, from, call).await?;
        let at = Timestamp::now();
        self.services
            .update_shipment(key, |s| {
                apply(s);
                s.push_tentative(to, tx, at, details.clone());
                true
            })
            .await?;

        let receipt = self.services.settle_transition(key, name, tx).await?;
        let shipment = self.services.shipment(key).await?;
        tracing::info!(%tx, status = %shipment.status, "transition submitted");
        Ok(Submission {
            tx,
            block: receipt.block_number,
            shipment,
        })
    }
}
