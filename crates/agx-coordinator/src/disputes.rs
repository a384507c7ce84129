//! # Dispute Resolver
//!
//! Raising a dispute moves the shipment to Disputed on the ledger and
//! freezes a deposited escrow. The dispute id is the one the ledger assigns,
//! read from the `DisputeRaised` log in the receipt.
//!
//! Resolution is final. `resolve` settles a live escrow in the direction
//! chosen (release to the parties or refund to the payer); `reject` leaves
//! the escrow alone. Neither moves the shipment out of Disputed.

use std::sync::Arc;

use agx_arbitration::{ArbitrationError, Dispute, DisputeStatus, Evidence, Resolution};
use agx_core::{Actor, DisputeId, Role, ShipmentKey, Timestamp, TxHash};
use agx_ledger::{EventData, LedgerCall, LedgerError};
use agx_state::{check, GuardContext, RejectionReason, ShipmentAction};

use crate::error::CoordinatorError;
use crate::escrow::{EscrowCoordinator, Settlement};
use crate::services::Services;

/// A raised dispute.
#[derive(Debug, Clone)]
pub struct Raised {
    /// The dispute as recorded.
    pub dispute: Dispute,
    /// The `raiseDispute` transaction.
    pub tx: TxHash,
    /// The escrow hold, when a deposited escrow was frozen.
    pub hold: Option<TxHash>,
}

/// A decided dispute.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The dispute after the decision.
    pub dispute: Dispute,
    /// The `resolveDispute` or `rejectDispute` transaction. `None` when an
    /// earlier decision is being settled.
    pub tx: Option<TxHash>,
    /// The escrow settlement, when a live escrow was settled.
    pub settlement: Option<Settlement>,
}

/// Dispute operations.
#[derive(Debug, Clone)]
pub struct DisputeResolver {
    services: Arc<Services>,
    escrow: Arc<EscrowCoordinator>,
}

impl DisputeResolver {
    /// A resolver settling escrows through `escrow`.
    pub fn new(services: Arc<Services>, escrow: Arc<EscrowCoordinator>) -> Self {
        Self { services, escrow }
    }

    /// A KYC-verified participant opens a dispute.
    #[tracing::instrument(skip_all, fields(shipment = %key, actor = %actor.address))]
    pub async fn raise(&self, actor: &Actor, key: &ShipmentKey, reason: &str) -> Result<Raised, CoordinatorError> {
        const ACTION: &str = "raise_dispute";
        if reason.trim().is_empty() {
            return Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                ACTION,
                "dispute reason must be non-empty",
            ));
        }
        let _flight = self.services.in_flight.acquire(*key, ACTION)?;
        let shipment = self.services.shipment(key).await?;
        let ctx = GuardContext::new(actor).actor_verified(self.services.registry.is_verified(&actor.address));
        let plan = check(&shipment, &ShipmentAction::RaiseDispute, &ctx)?;

        let call = LedgerCall::RaiseDispute {
            shipment: *key,
            reason: reason.to_string(),
        };
        let name = call.name();
        let tx = self.services.submit_transition(key, actor.address, call).await?;
        let at = Timestamp::now();
        self.services
            .update_shipment(key, |s| {
                s.push_tentative(plan.to, tx, at, format!("dispute raised: {reason}"));
                true
            })
            .await?;
        let receipt = self.services.settle_transition(key, name, tx).await?;

        let id = receipt
            .events
            .iter()
            .find_map(|e| match &e.data {
                EventData::DisputeRaised { dispute, .. } => Some(*dispute),
                _ => None,
            })
            .ok_or_else(|| {
                CoordinatorError::ledger(
                    name,
                    LedgerError::InvalidResponse(format!("receipt {tx} has no DisputeRaised log")),
                )
            })?;

        let dispute = match self.services.store.dispute(id).await? {
            // The projector got there first and could not know the reason.
            Some(_) => {
                self.services
                    .update_dispute(id, |d| {
                        if !d.reason.is_empty() {
                            return false;
                        }
                        d.reason = reason.to_string();
                        true
                    })
                    .await?
            }
            None => {
                let mut dispute = Dispute::open(id, *key, actor.address, reason, receipt.block_time);
                dispute.version = self.services.store.save_dispute(&dispute, None).await?;
                dispute
            }
        };
        self.services
            .update_shipment(key, |s| {
                if s.dispute_id == Some(id) {
                    return false;
                }
                s.dispute_id = Some(id);
                true
            })
            .await?;
        tracing::info!(dispute = %id, %tx, "dispute raised");

        let hold = match self.services.store.escrow(key).await? {
            Some(escrow) if escrow.can_hold().is_ok() => {
                match self.escrow.hold_as(self.services.operator(), key).await {
                    Ok(settled) => Some(settled.tx),
                    Err(e) => {
                        tracing::warn!(dispute = %id, error = %e, "escrow hold failed; hold it manually");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Raised { dispute, tx, hold })
    }

    /// A participant or resolver attaches evidence to an open dispute.
    #[tracing::instrument(skip_all, fields(dispute = %id, actor = %actor.address))]
    pub async fn add_evidence(&self, actor: &Actor, id: DisputeId, evidence: &[u8]) -> Result<Dispute, CoordinatorError> {
        const ACTION: &str = "add_evidence";
        let dispute = self.services.dispute(id).await?;
        dispute
            .require_open()
            .map_err(|e| CoordinatorError::arbitration(ACTION, e))?;
        let shipment = self.services.shipment(&dispute.shipment).await?;
        if actor.role != Role::Resolver && !shipment.is_participant(actor) {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongActor,
                ACTION,
                "only participants and resolvers may submit evidence",
            ));
        }
        if evidence.is_empty() {
            return Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                ACTION,
                "evidence is empty",
            ));
        }

        let cid = self
            .services
            .content
            .put_bytes(evidence)
            .await
            .map_err(|e| CoordinatorError::Storage(e.to_string()))?;
        let call = LedgerCall::AddEvidence {
            dispute: id,
            evidence_hash: cid.as_str().to_string(),
        };
        let name = call.name();
        let tx = self.services.submit(actor.address, call).await?;
        let receipt = self.services.confirm(name, &tx).await?;

        let hash = cid.as_str().to_string();
        let dispute = self
            .services
            .update_dispute(id, |d| {
                if let Some(existing) = d.evidence.iter_mut().find(|e| e.evidence_hash == hash) {
                    if existing.tx.is_some() {
                        return false;
                    }
                    existing.tx = Some(tx);
                    return true;
                }
                d.add_evidence(Evidence {
                    submitter: actor.address,
                    evidence_hash: hash.clone(),
                    timestamp: receipt.block_time,
                    tx: Some(tx),
                })
                .is_ok()
            })
            .await?;
        tracing::info!(%tx, evidence = %cid, "evidence added");
        Ok(dispute)
    }

    /// A resolver decides an open dispute and settles a live escrow
    /// accordingly.
    ///
    /// A dispute already resolved on the ledger whose escrow is still live
    /// (the settlement failed after the decision landed) can be driven again
    /// with the same resolution: only the settlement is re-run.
    #[tracing::instrument(skip_all, fields(dispute = %id, resolver = %resolver.address, resolution = ?resolution))]
    pub async fn resolve(
        &self,
        resolver: &Actor,
        id: DisputeId,
        resolution: Resolution,
        note: &str,
    ) -> Result<Decision, CoordinatorError> {
        const ACTION: &str = "resolve_dispute";
        let (dispute, _flight) = self.decidable(resolver, id, ACTION).await?;
        let key = dispute.shipment;

        let (dispute, tx) = match dispute.status {
            DisputeStatus::Open => {
                let call = LedgerCall::ResolveDispute {
                    dispute: id,
                    resolution: resolution.ledger_code(),
                    note: note.to_string(),
                };
                let name = call.name();
                let tx = self.services.submit(resolver.address, call).await?;
                let receipt = self.services.confirm(name, &tx).await?;
                let dispute = self
                    .services
                    .update_dispute(id, |d| {
                        if d.resolve(resolution, note, receipt.block_time).is_ok() {
                            return true;
                        }
                        // Already folded from the event, which carries no note.
                        if d.resolution == Some(resolution) && d.note.as_deref().map_or(true, str::is_empty) {
                            d.note = Some(note.to_string());
                            return true;
                        }
                        false
                    })
                    .await?;
                tracing::info!(%tx, "dispute resolved");
                (dispute, Some(tx))
            }
            DisputeStatus::Resolved if dispute.resolution == Some(resolution) && self.escrow_live(&key).await? => {
                tracing::info!("dispute already resolved; settling the escrow");
                (dispute, None)
            }
            _ => {
                return Err(match dispute.resolution {
                    Some(decided) if dispute.status == DisputeStatus::Resolved && decided != resolution => {
                        CoordinatorError::rejected(
                            RejectionReason::WrongState,
                            ACTION,
                            format!("dispute {id} was resolved as {decided:?}"),
                        )
                    }
                    _ => CoordinatorError::arbitration(
                        ACTION,
                        ArbitrationError::TerminalState {
                            dispute_id: id.to_string(),
                            state: dispute.status.as_str().to_string(),
                        },
                    ),
                })
            }
        };

        let settlement = if self.escrow_live(&key).await? {
            let settled = match resolution {
                Resolution::ReleaseFunds => self.escrow.release_as(resolver.address, &key).await,
                Resolution::RefundPayer => self.escrow.refund_as(resolver.address, &key).await,
            };
            match settled {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::error!(shipment = %key, error = %e, "dispute resolved but escrow not settled; resolve again to retry");
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Decision {
            dispute,
            tx,
            settlement,
        })
    }

    /// A resolver dismisses an open dispute. The escrow is left as it is.
    #[tracing::instrument(skip_all, fields(dispute = %id, resolver = %resolver.address))]
    pub async fn reject(&self, resolver: &Actor, id: DisputeId, note: &str) -> Result<Decision, CoordinatorError> {
        const ACTION: &str = "reject_dispute";
        let (_, _flight) = self.open_for(resolver, id, ACTION).await?;

        let call = LedgerCall::RejectDispute {
            dispute: id,
            note: note.to_string(),
        };
        let name = call.name();
        let tx = self.services.submit(resolver.address, call).await?;
        let receipt = self.services.confirm(name, &tx).await?;
        let dispute = self
            .services
            .update_dispute(id, |d| {
                if d.reject(note, receipt.block_time).is_ok() {
                    return true;
                }
                if d.note.as_deref().map_or(true, str::is_empty) {
                    d.note = Some(note.to_string());
                    return true;
                }
                false
            })
            .await?;
        tracing::info!(%tx, "dispute rejected");
        Ok(Decision {
            dispute,
            tx: Some(tx),
            settlement: None,
        })
    }

    /// Disputes raised against a shipment.
    pub async fn for_shipment(&self, key: &ShipmentKey) -> Result<Vec<Dispute>, CoordinatorError> {
        Ok(self.services.store.disputes_for(key).await?)
    }

    /// Resolver check, open dispute, and the shipment's in-flight slot.
    async fn open_for(
        &self,
        resolver: &Actor,
        id: DisputeId,
        action: &'static str,
    ) -> Result<(Dispute, crate::guard::InFlightGuard<'_>), CoordinatorError> {
        let (dispute, flight) = self.decidable(resolver, id, action).await?;
        dispute
            .require_open()
            .map_err(|e| CoordinatorError::arbitration(action, e))?;
        Ok((dispute, flight))
    }

    /// Resolver check and the shipment's in-flight slot, in any dispute
    /// status.
    async fn decidable(
        &self,
        resolver: &Actor,
        id: DisputeId,
        action: &'static str,
    ) -> Result<(Dispute, crate::guard::InFlightGuard<'_>), CoordinatorError> {
        if resolver.role != Role::Resolver {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongActor,
                action,
                format!("only a resolver may decide disputes, caller is {}", resolver.role),
            ));
        }
        let dispute = self.services.dispute(id).await?;
        let flight = self.services.in_flight.acquire(dispute.shipment, action)?;
        Ok((dispute, flight))
    }

    async fn escrow_live(&self, key: &ShipmentKey) -> Result<bool, CoordinatorError> {
        Ok(self
            .services
            .store
            .escrow(key)
            .await?
            .map_or(false, |e| e.status.is_live()))
    }
}
