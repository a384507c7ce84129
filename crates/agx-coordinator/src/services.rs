//! # Shared Services
//!
//! The handles every coordinator component works through, and the steps
//! they share: compare-and-swap updates of projection records, submission
//! with error mapping, receipt settlement, and the forced re-sync that runs
//! when the ledger refuses a transition the projection thought was valid.

use std::sync::Arc;

use agx_arbitration::{Dispute, EscrowRecord};
use agx_core::{Address, DisputeId, ShipmentKey, Timestamp, TxHash};
use agx_crypto::{AttestationService, ContentStore};
use agx_ledger::{wait_for_receipt, LedgerCall, LedgerClient, LedgerError, TxReceipt};
use agx_state::{resync_target, Confirmation, EscrowFacts, LedgerState, Shipment};
use agx_sync::projector::CAS_ATTEMPTS;
use agx_sync::ProjectionStore;

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::guard::InFlight;
use crate::registry::ParticipantRegistry;

/// Handles shared by the shipment machine, escrow coordinator, and dispute
/// resolver.
pub struct Services {
    pub(crate) store: Arc<dyn ProjectionStore>,
    pub(crate) ledger: Arc<dyn LedgerClient>,
    pub(crate) attestor: Arc<AttestationService>,
    pub(crate) content: Arc<dyn ContentStore>,
    pub(crate) registry: Arc<ParticipantRegistry>,
    pub(crate) config: CoordinatorConfig,
    pub(crate) in_flight: InFlight,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("attestor", &self.attestor.signer_address())
            .field("config", &self.config)
            .field("participants", &self.registry.len())
            .finish()
    }
}

impl Services {
    /// Bundle the handles.
    pub fn new(
        store: Arc<dyn ProjectionStore>,
        ledger: Arc<dyn LedgerClient>,
        attestor: Arc<AttestationService>,
        content: Arc<dyn ContentStore>,
        registry: Arc<ParticipantRegistry>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            attestor,
            content,
            registry,
            config,
            in_flight: InFlight::new(),
        }
    }

    /// Account submitting attestor-signed calls and escrow holds.
    pub fn operator(&self) -> Address {
        self.config.operator.unwrap_or_else(|| self.attestor.signer_address())
    }

    /// The projection store.
    pub fn store(&self) -> &Arc<dyn ProjectionStore> {
        &self.store
    }

    /// The ledger client.
    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// The participant registry.
    pub fn registry(&self) -> &Arc<ParticipantRegistry> {
        &self.registry
    }

    /// Coordinator settings.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// A tracked shipment.
    pub async fn shipment(&self, key: &ShipmentKey) -> Result<Shipment, CoordinatorError> {
        self.store
            .shipment(key)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                kind: "shipment",
                key: key.to_string(),
            })
    }

    /// A tracked dispute.
    pub async fn dispute(&self, id: DisputeId) -> Result<Dispute, CoordinatorError> {
        self.store
            .dispute(id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                kind: "dispute",
                key: id.to_string(),
            })
    }

    /// What the guards need to know about a shipment's escrow.
    pub async fn escrow_facts(&self, key: &ShipmentKey) -> Result<Option<EscrowFacts>, CoordinatorError> {
        Ok(self.store.escrow(key).await?.map(|e| EscrowFacts {
            live: e.status.is_live(),
            amount: e.terms.amount,
        }))
    }

    /// Read, mutate, CAS-write a shipment, re-reading on a lost race. `f`
    /// returns whether it changed anything; an unchanged record is not
    /// written.
    pub async fn update_shipment(
        &self,
        key: &ShipmentKey,
        mut f: impl FnMut(&mut Shipment) -> bool + Send,
    ) -> Result<Shipment, CoordinatorError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut shipment = self.shipment(key).await?;
            let version = shipment.version;
            if !f(&mut shipment) {
                return Ok(shipment);
            }
            match self.store.save_shipment(&shipment, Some(version)).await {
                Ok(next) => {
                    shipment.version = next;
                    return Ok(shipment);
                }
                Err(e) if e.is_conflict() && attempt < CAS_ATTEMPTS => {
                    tracing::debug!(shipment = %key, attempt, "shipment write conflict, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// [`Services::update_shipment`] for escrow records.
    pub async fn update_escrow(
        &self,
        key: &ShipmentKey,
        mut f: impl FnMut(&mut EscrowRecord) -> bool + Send,
    ) -> Result<EscrowRecord, CoordinatorError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut escrow = self
                .store
                .escrow(key)
                .await?
                .ok_or_else(|| CoordinatorError::NotFound {
                    kind: "escrow",
                    key: key.to_string(),
                })?;
            let version = escrow.version;
            if !f(&mut escrow) {
                return Ok(escrow);
            }
            match self.store.save_escrow(&escrow, Some(version)).await {
                Ok(next) => {
                    escrow.version = next;
                    return Ok(escrow);
                }
                Err(e) if e.is_conflict() && attempt < CAS_ATTEMPTS => {
                    tracing::debug!(shipment = %key, attempt, "escrow write conflict, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// [`Services::update_shipment`] for disputes.
    pub async fn update_dispute(
        &self,
        id: DisputeId,
        mut f: impl FnMut(&mut Dispute) -> bool + Send,
    ) -> Result<Dispute, CoordinatorError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut dispute = self.dispute(id).await?;
            let version = dispute.version;
            if !f(&mut dispute) {
                return Ok(dispute);
            }
            match self.store.save_dispute(&dispute, Some(version)).await {
                Ok(next) => {
                    dispute.version = next;
                    return Ok(dispute);
                }
                Err(e) if e.is_conflict() && attempt < CAS_ATTEMPTS => {
                    tracing::debug!(dispute = %id, attempt, "dispute write conflict, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Submit a call that does not move a shipment.
    pub async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, CoordinatorError> {
        let name = call.name();
        let tx = self
            .ledger
            .submit(from, call)
            .await
            .map_err(|e| CoordinatorError::ledger(name, e))?;
        tracing::info!(%tx, call = name, %from, "transaction submitted");
        Ok(tx)
    }

    /// Submit a call that moves `key`. A ledger rejection is checked
    /// against the ledger's view of the shipment and surfaces as a
    /// [`CoordinatorError::ProjectionConflict`] when the projection was
    /// stale.
    pub async fn submit_transition(
        &self,
        key: &ShipmentKey,
        from: Address,
        call: LedgerCall,
    ) -> Result<TxHash, CoordinatorError> {
        let name = call.name();
        match self.ledger.submit(from, call).await {
            Ok(tx) => {
                tracing::info!(shipment = %key, %tx, call = name, "transition submitted");
                Ok(tx)
            }
            Err(e @ LedgerError::Rejected { .. }) => Err(self.refused(key, name, e).await),
            Err(e) => Err(CoordinatorError::ledger(name, e)),
        }
    }

    /// Wait for the receipt of a call that does not move a shipment.
    pub async fn confirm(&self, call: &str, tx: &TxHash) -> Result<TxReceipt, CoordinatorError> {
        wait_for_receipt(self.ledger.as_ref(), tx, self.config.receipt)
            .await
            .map_err(|e| CoordinatorError::ledger(call, e))
    }

    /// Wait for the receipt of a transition on `key`.
    ///
    /// On success the tentative entry is left for the projector to confirm.
    /// On revert the entry is failed and the previous status restored. On
    /// timeout the entry stays tentative: the transaction may still land.
    pub async fn settle_transition(
        &self,
        key: &ShipmentKey,
        call: &str,
        tx: TxHash,
    ) -> Result<TxReceipt, CoordinatorError> {
        match wait_for_receipt(self.ledger.as_ref(), &tx, self.config.receipt).await {
            Ok(receipt) => Ok(receipt),
            Err(LedgerError::Reverted { reason, .. }) => {
                let at = Timestamp::now();
                self.update_shipment(key, |s| s.fail_tx(&tx, at, &reason)).await?;
                tracing::warn!(shipment = %key, %tx, call, %reason, "transition reverted");
                Err(self.refused(key, call, LedgerError::Reverted { tx, reason }).await)
            }
            Err(e) => {
                if matches!(e, LedgerError::Timeout { .. }) {
                    tracing::warn!(shipment = %key, %tx, call, "transition unconfirmed, left tentative");
                }
                Err(CoordinatorError::ledger(call, e))
            }
        }
    }

    /// Bring the projection of `key` in line with the ledger if they
    /// disagree. Returns the ledger state it was re-synced to.
    pub async fn resync(&self, key: &ShipmentKey) -> Result<Option<LedgerState>, CoordinatorError> {
        let Some(current) = self
            .ledger
            .shipment(key)
            .await
            .map_err(|e| CoordinatorError::ledger("getShipment", e))?
            .and_then(|s| LedgerState::from_code(s.state))
        else {
            return Ok(None);
        };
        let at = Timestamp::now();
        let mut resynced = false;
        self.update_shipment(key, |s| {
            resynced = s.status.ledger_state() != current;
            if !resynced {
                return false;
            }
            let target = resync_target(s.status, current);
            tracing::warn!(
                shipment = %key,
                projected = %s.status,
                ledger = %current,
                resynced = %target,
                "projection disagrees with ledger, re-syncing"
            );
            s.tentative = None;
            s.push_status(target, at, format!("resynced to ledger {current}"), Confirmation::Local);
            true
        })
        .await?;
        Ok(resynced.then_some(current))
    }

    /// Map a ledger refusal of `call` on `key`, re-syncing first.
    async fn refused(&self, key: &ShipmentKey, call: &str, e: LedgerError) -> CoordinatorError {
        let mapped = CoordinatorError::ledger(call, e);
        if matches!(mapped, CoordinatorError::Signature(_)) {
            return mapped;
        }
        match self.resync(key).await {
            Ok(Some(state)) => CoordinatorError::ProjectionConflict {
                shipment: key.to_string(),
                detail: format!("{mapped}; projection re-synced to ledger {state}"),
            },
            Ok(None) => mapped,
            Err(re) => {
                tracing::warn!(shipment = %key, error = %re, "re-sync after ledger refusal failed");
                mapped
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testkit::*;
    use super::*;
    use agx_core::{ShipmentRef, TokenAmount};
    use agx_state::ShipmentStatus;

    async fn seed(kit: &Kit) -> Shipment {
        let reference = ShipmentRef::new("S1").unwrap();
        let shipment = Shipment::create(
            reference,
            &kit.farmer,
            TokenAmount::from_base_units(1000),
            Timestamp::now(),
            Confirmation::Local,
        );
        let v = kit.services.store.save_shipment(&shipment, None).await.unwrap();
        Shipment { version: v, ..shipment }
    }

    #[tokio::test]
    async fn missing_shipment_is_not_found() {
        let kit = Kit::new();
        let err = kit.services.shipment(&kit.key()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound { kind: "shipment", .. }));
    }

    #[tokio::test]
    async fn unchanged_update_is_not_written() {
        let kit = Kit::new();
        let seeded = seed(&kit).await;
        let after = kit.services.update_shipment(&kit.key(), |_| false).await.unwrap();
        assert_eq!(after.version, seeded.version);
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let kit = Kit::new();
        let seeded = seed(&kit).await;
        let after = kit
            .services
            .update_shipment(&kit.key(), |s| {
                s.push_status(ShipmentStatus::OfferMade, Timestamp::now(), "offer", Confirmation::Local);
                true
            })
            .await
            .unwrap();
        assert_eq!(after.version, seeded.version + 1);
        assert_eq!(kit.services.shipment(&kit.key()).await.unwrap().status, ShipmentStatus::OfferMade);
    }

    #[tokio::test]
    async fn resync_is_a_no_op_for_untracked_ledger_shipment() {
        let kit = Kit::new();
        seed(&kit).await;
        assert_eq!(kit.services.resync(&kit.key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ledger_rejection_of_stale_projection_is_a_conflict() {
        let kit = Kit::new();
        seed(&kit).await;
        // Ledger moves on without the projection seeing it.
        kit.ledger
            .submit(
                kit.farmer.address,
                LedgerCall::CreateShipment {
                    shipment: kit.key(),
                    ask_price: TokenAmount::from_base_units(1000),
                },
            )
            .await
            .unwrap();
        kit.ledger
            .submit(kit.industry.address, LedgerCall::SetIndustry { shipment: kit.key() })
            .await
            .unwrap();
        kit.services
            .update_shipment(&kit.key(), |s| {
                s.push_status(ShipmentStatus::Delivered, Timestamp::now(), "drift", Confirmation::Local);
                true
            })
            .await
            .unwrap();

        let err = kit
            .services
            .submit_transition(&kit.key(), kit.industry.address, LedgerCall::SetIndustry { shipment: kit.key() })
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ProjectionConflict { .. }), "{err}");

        let after = kit.services.shipment(&kit.key()).await.unwrap();
        assert_eq!(after.status.ledger_state(), LedgerState::Open);
        assert!(after.timeline.last().unwrap().details.starts_with("resynced to ledger"));
        assert!(after.invariants_hold());
    }

    #[tokio::test]
    async fn rejection_in_sync_stays_a_ledger_rejection() {
        let kit = Kit::new();
        seed(&kit).await;
        let err = kit
            .services
            .submit_transition(&kit.key(), kit.industry.address, LedgerCall::SetIndustry { shipment: kit.key() })
            .await
            .unwrap_err();
        // Unknown on the ledger: nothing to re-sync against.
        assert!(matches!(err, CoordinatorError::LedgerRejected { .. }), "{err}");
    }

    #[tokio::test]
    async fn operator_defaults_to_attestor() {
        let kit = Kit::new();
        assert_eq!(kit.services.operator(), kit.services.attestor.signer_address());
    }
}
