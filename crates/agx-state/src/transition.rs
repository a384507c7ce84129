//! # Transition Guards
//!
//! [`check`] decides whether an actor may perform an action on a shipment
//! right now. It runs before any I/O and never mutates the record. A
//! rejection names the failed precondition.
//!
//! | Action | From | Actor | Extra precondition |
//! |---|---|---|---|
//! | MakeOffer | Pending | Industry | no buyer yet |
//! | NominateCarrier | OfferMade | producer or buyer of the shipment | carrier KYC-verified |
//! | ConfirmPayment | AwaitingPayment | buyer of the shipment | live escrow for the ask price |
//! | Pickup | ReadyForPickup | assigned carrier | live escrow |
//! | Deliver | InTransit | assigned carrier | — |
//! | Verify | Delivered | buyer of the shipment | — |
//! | Claim | Verified | producer of the shipment | live escrow |
//! | RaiseDispute | OfferMade..Verified | KYC-verified participant | — |
//! | Cancel | OfferMade..Verified | producer or buyer | no live escrow |
//!
//! Checks run in the order state, actor, precondition.

use agx_core::{Actor, Address, Role, TokenAmount};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shipment::Shipment;
use crate::status::ShipmentStatus;

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The caller may not perform this action on this shipment.
    WrongActor,
    /// The shipment is not in the required status.
    WrongState,
    /// A business precondition does not hold.
    PreconditionNotMet,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::WrongActor => "wrong actor",
            Self::WrongState => "wrong state",
            Self::PreconditionNotMet => "precondition not met",
        })
    }
}

/// A refused transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{action} rejected ({reason}): {detail}")]
pub struct TransitionRejection {
    /// Category.
    pub reason: RejectionReason,
    /// Action that was attempted.
    pub action: &'static str,
    /// Human-readable precondition that failed.
    pub detail: String,
}

impl TransitionRejection {
    /// Build a rejection.
    pub fn new(reason: RejectionReason, action: &'static str, detail: impl Into<String>) -> Self {
        Self {
            reason,
            action,
            detail: detail.into(),
        }
    }
}

/// What the caller wants to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipmentAction {
    /// Buyer makes an offer.
    MakeOffer,
    /// Producer or buyer nominates a carrier.
    NominateCarrier {
        /// Nominated carrier account.
        carrier: Address,
    },
    /// Escrow funded; carrier may collect.
    ConfirmPayment,
    /// Carrier collects.
    Pickup,
    /// Carrier delivers.
    Deliver,
    /// Buyer verifies receipt.
    Verify,
    /// Producer claims payment.
    Claim,
    /// A participant opens a dispute.
    RaiseDispute,
    /// Producer or buyer cancels.
    Cancel,
}

impl ShipmentAction {
    /// Name for logs and rejections.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MakeOffer => "make_offer",
            Self::NominateCarrier { .. } => "nominate_carrier",
            Self::ConfirmPayment => "confirm_payment",
            Self::Pickup => "pickup",
            Self::Deliver => "deliver",
            Self::Verify => "verify",
            Self::Claim => "claim",
            Self::RaiseDispute => "raise_dispute",
            Self::Cancel => "cancel",
        }
    }
}

/// Escrow facts the guards need, without depending on the escrow model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowFacts {
    /// Deposited or Held.
    pub live: bool,
    /// Escrowed amount.
    pub amount: TokenAmount,
}

/// Inputs gathered by the caller before running the guards.
#[derive(Debug, Clone)]
pub struct GuardContext<'a> {
    /// Who is asking.
    pub actor: &'a Actor,
    /// Whether the actor holds a confirmed KYC attestation.
    pub actor_verified: bool,
    /// For nominations: whether the nominated carrier is KYC-verified.
    pub carrier_verified: bool,
    /// Current escrow, if any.
    pub escrow: Option<EscrowFacts>,
}

impl<'a> GuardContext<'a> {
    /// Context with no KYC and no escrow facts.
    pub fn new(actor: &'a Actor) -> Self {
        Self {
            actor,
            actor_verified: false,
            carrier_verified: false,
            escrow: None,
        }
    }

    /// Set the actor's KYC flag.
    pub fn actor_verified(mut self, verified: bool) -> Self {
        self.actor_verified = verified;
        self
    }

    /// Set the nominated carrier's KYC flag.
    pub fn carrier_verified(mut self, verified: bool) -> Self {
        self.carrier_verified = verified;
        self
    }

    /// Attach escrow facts.
    pub fn escrow(mut self, escrow: Option<EscrowFacts>) -> Self {
        self.escrow = escrow;
        self
    }
}

/// An accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Status before.
    pub from: ShipmentStatus,
    /// Status after. Equal to `from` when the action only records data
    /// (a first nomination).
    pub to: ShipmentStatus,
}

impl Plan {
    /// Whether the status changes.
    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }
}

/// Run the guards.
pub fn check(
    shipment: &Shipment,
    action: &ShipmentAction,
    ctx: &GuardContext<'_>,
) -> Result<Plan, TransitionRejection> {
    use RejectionReason::*;
    use ShipmentStatus as S;

    let name = action.name();
    let from = shipment.status;
    let actor = ctx.actor;

    let require_state = |expected: S| {
        if from == expected {
            Ok(())
        } else {
            Err(TransitionRejection::new(
                WrongState,
                name,
                format!("requires {expected}, shipment is {from}"),
            ))
        }
    };
    let is_farmer = actor.role == Role::Farmer && actor.profile_id == shipment.farmer_id;
    let is_industry = actor.role == Role::Industry
        && shipment.industry_id.as_ref() == Some(&actor.profile_id);
    let is_carrier =
        actor.role == Role::Transporter && shipment.transporter == Some(actor.address);

    let to = match action {
        ShipmentAction::MakeOffer => {
            require_state(S::Pending)?;
            if actor.role != Role::Industry {
                return Err(TransitionRejection::new(
                    WrongActor,
                    name,
                    format!("only industry may make an offer, caller is {}", actor.role),
                ));
            }
            if shipment.industry_id.is_some() {
                return Err(TransitionRejection::new(
                    PreconditionNotMet,
                    name,
                    "shipment already has an industry",
                ));
            }
            S::OfferMade
        }
        ShipmentAction::NominateCarrier { carrier } => {
            require_state(S::OfferMade)?;
            if !is_farmer && !is_industry {
                return Err(TransitionRejection::new(
                    WrongActor,
                    name,
                    "only the shipment's farmer or industry may nominate a carrier",
                ));
            }
            if !ctx.carrier_verified {
                return Err(TransitionRejection::new(
                    PreconditionNotMet,
                    name,
                    format!("carrier {carrier} is not KYC-verified"),
                ));
            }
            let other = if is_farmer {
                shipment.industry_nomination
            } else {
                shipment.farmer_nomination
            };
            if other == Some(*carrier) {
                S::AwaitingPayment
            } else {
                S::OfferMade
            }
        }
        ShipmentAction::ConfirmPayment => {
            require_state(S::AwaitingPayment)?;
            if !is_industry {
                return Err(TransitionRejection::new(
                    WrongActor,
                    name,
                    "only the shipment's industry pays into escrow",
                ));
            }
            match ctx.escrow {
                Some(e) if e.live && e.amount == shipment.ask_price => {}
                Some(e) if e.live => {
                    return Err(TransitionRejection::new(
                        PreconditionNotMet,
                        name,
                        format!("escrow holds {} but ask price is {}", e.amount, shipment.ask_price),
                    ))
                }
                _ => {
                    return Err(TransitionRejection::new(
                        PreconditionNotMet,
                        name,
                        "escrow is not deposited",
                    ))
                }
            }
            S::ReadyForPickup
        }
        ShipmentAction::Pickup | ShipmentAction::Deliver => {
            let (required, next) = if matches!(action, ShipmentAction::Pickup) {
                (S::ReadyForPickup, S::InTransit)
            } else {
                (S::InTransit, S::Delivered)
            };
            require_state(required)?;
            if !is_carrier {
                return Err(TransitionRejection::new(
                    WrongActor,
                    name,
                    format!("caller {} is not the assigned carrier", actor.address),
                ));
            }
            if matches!(action, ShipmentAction::Pickup) && !ctx.escrow.map(|e| e.live).unwrap_or(false) {
                return Err(TransitionRejection::new(
                    PreconditionNotMet,
                    name,
                    "escrow no longer holds the payment",
                ));
            }
            next
        }
        ShipmentAction::Verify => {
            require_state(S::Delivered)?;
            if !is_industry {
                return Err(TransitionRejection::new(
                    WrongActor,
                    name,
                    "only the shipment's industry may verify delivery",
                ));
            }
            S::Verified
        }
        ShipmentAction::Claim => {
            require_state(S::Verified)?;
            if !is_farmer {
                return Err(TransitionRejection::new(
                    WrongActor,
                    name,
                    "only the shipment's farmer may claim payment",
                ));
            }
            if !ctx.escrow.map(|e| e.live).unwrap_or(false) {
                return Err(TransitionRejection::new(
                    PreconditionNotMet,
                    name,
                    "no deposited or held escrow to release",
                ));
            }
            S::Claimed
        }
        ShipmentAction::RaiseDispute => {
            if !from.allows_side_exit() {
                return Err(TransitionRejection::new(
                    WrongState,
                    name,
                    format!("cannot dispute a shipment in {from}"),
                ));
            }
            if !shipment.is_participant(actor) {
                return Err(TransitionRejection::new(
                    WrongActor,
                    name,
                    "caller is not a participant of this shipment",
                ));
            }
            if !ctx.actor_verified {
                return Err(TransitionRejection::new(
                    PreconditionNotMet,
                    name,
                    "caller is not KYC-verified",
                ));
            }
            S::Disputed
        }
        ShipmentAction::Cancel => {
            if !from.allows_side_exit() {
                return Err(TransitionRejection::new(
                    WrongState,
                    name,
                    format!("cannot cancel a shipment in {from}"),
                ));
            }
            if !is_farmer && !is_industry {
                return Err(TransitionRejection::new(
                    WrongActor,
                    name,
                    "only the shipment's farmer or industry may cancel",
                ));
            }
            if ctx.escrow.map(|e| e.live).unwrap_or(false) {
                return Err(TransitionRejection::new(
                    PreconditionNotMet,
                    name,
                    "escrow is still live; refund it first",
                ));
            }
            S::Cancelled
        }
    };

    Ok(Plan { from, to })
}
