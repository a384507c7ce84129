//! # Attestations
//!
//! Off-chain facts the coordinator signs and anchors: weighments, proof
//! documents, and participant KYC. The document itself goes to the content
//! store; only its content id is signed and submitted.
//!
//! Weighment and proof records are appended to the shipment before
//! submission with no transaction and removed again if the ledger refuses
//! them. The `WeighmentAttached` / `ProofAttached` events fill in the
//! transaction when the receipt path has not.

use std::sync::Arc;

use agx_core::{Actor, Address, ShipmentKey, TxHash};
use agx_crypto::ProofType;
use agx_ledger::LedgerCall;
use agx_state::{ProofRecord, RejectionReason, Shipment, Weighment};

use crate::error::CoordinatorError;
use crate::registry::Participant;
use crate::services::Services;

/// Signs and anchors attestations.
#[derive(Debug, Clone)]
pub struct AttestationDesk {
    services: Arc<Services>,
}

impl AttestationDesk {
    /// A desk over `services`.
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Record a weigh-bridge ticket for a shipment.
    #[tracing::instrument(skip_all, fields(shipment = %key, weight_kg))]
    pub async fn attach_weighment(
        &self,
        actor: &Actor,
        key: &ShipmentKey,
        weight_kg: u128,
        ticket: &[u8],
    ) -> Result<Weighment, CoordinatorError> {
        const ACTION: &str = "attach_weighment";
        if weight_kg == 0 {
            return Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                ACTION,
                "weight must be positive",
            ));
        }
        self.open_shipment(actor, key, ticket, ACTION).await?;

        let cid = self.store_document(ticket).await?;
        let hash = cid.as_str().to_string();
        let attestation = self.services.attestor.attest_weighment(*key, weight_kg, hash.clone()).await?;
        let record = Weighment {
            weight_kg,
            timestamp: attestation.payload.timestamp,
            attestor: attestation.signer,
            weigh_hash: hash.clone(),
            tx: None,
        };
        let pending = record.clone();
        self.services
            .update_shipment(key, move |s| {
                s.weighments.push(pending.clone());
                true
            })
            .await?;

        let tx = match self.anchor(LedgerCall::Attested(attestation)).await {
            Ok(tx) => tx,
            Err(e) => {
                self.services
                    .update_shipment(key, |s| {
                        let before = s.weighments.len();
                        s.weighments.retain(|w| !(w.weigh_hash == hash && w.tx.is_none()));
                        s.weighments.len() != before
                    })
                    .await?;
                return Err(e);
            }
        };
        self.services
            .update_shipment(key, |s| {
                match s.weighments.iter_mut().find(|w| w.weigh_hash == hash && w.tx.is_none()) {
                    Some(w) => {
                        w.tx = Some(tx);
                        true
                    }
                    None => false,
                }
            })
            .await?;
        tracing::info!(%tx, weigh_hash = %hash, "weighment attached");
        Ok(Weighment {
            tx: Some(tx),
            ..record
        })
    }

    /// Record a proof document for a shipment.
    #[tracing::instrument(skip_all, fields(shipment = %key, proof_type = ?proof_type))]
    pub async fn attach_proof(
        &self,
        actor: &Actor,
        key: &ShipmentKey,
        proof_type: ProofType,
        document: &[u8],
    ) -> Result<ProofRecord, CoordinatorError> {
        const ACTION: &str = "attach_proof";
        self.open_shipment(actor, key, document, ACTION).await?;

        let cid = self.store_document(document).await?;
        let hash = cid.as_str().to_string();
        let attestation = self.services.attestor.attest_proof(*key, proof_type, hash.clone()).await?;
        let record = ProofRecord {
            proof_type,
            proof_hash: hash.clone(),
            attestor: attestation.signer,
            timestamp: attestation.payload.timestamp,
            tx: None,
        };
        let pending = record.clone();
        self.services
            .update_shipment(key, move |s| {
                s.proofs.push(pending.clone());
                true
            })
            .await?;

        let tx = match self.anchor(LedgerCall::Attested(attestation)).await {
            Ok(tx) => tx,
            Err(e) => {
                self.services
                    .update_shipment(key, |s| {
                        let before = s.proofs.len();
                        s.proofs.retain(|p| !(p.proof_hash == hash && p.tx.is_none()));
                        s.proofs.len() != before
                    })
                    .await?;
                return Err(e);
            }
        };
        self.services
            .update_shipment(key, |s| {
                match s.proofs.iter_mut().find(|p| p.proof_hash == hash && p.tx.is_none()) {
                    Some(p) => {
                        p.tx = Some(tx);
                        true
                    }
                    None => false,
                }
            })
            .await?;
        tracing::info!(%tx, proof_hash = %hash, "proof attached");
        Ok(ProofRecord {
            tx: Some(tx),
            ..record
        })
    }

    /// KYC-attest a participant. The record is stored as JSON and its
    /// content id signed with the participant's role.
    #[tracing::instrument(skip_all, fields(participant = %subject.address, role = %subject.role))]
    pub async fn attest_kyc(
        &self,
        subject: &Actor,
        record: &serde_json::Value,
    ) -> Result<Participant, CoordinatorError> {
        let registry = &self.services.registry;
        registry.register(subject.address, subject.profile_id.clone(), subject.role);

        let cid = self
            .services
            .content
            .put_json(record)
            .await
            .map_err(|e| CoordinatorError::Storage(e.to_string()))?;
        let attestation = self
            .services
            .attestor
            .attest_kyc(subject.address, subject.role, cid.as_str())
            .await?;
        let call = LedgerCall::Attested(attestation);
        let name = call.name();
        let tx = self.services.submit(self.services.operator(), call).await?;
        let receipt = self.services.confirm(name, &tx).await?;
        registry.record_kyc(subject.address, subject.role, cid.as_str(), receipt.block_time);
        tracing::info!(%tx, "participant verified");

        registry.get(&subject.address).ok_or_else(|| CoordinatorError::NotFound {
            kind: "participant",
            key: subject.address.to_string(),
        })
    }

    /// A participant's registry entry.
    pub fn participant(&self, address: &Address) -> Option<Participant> {
        self.services.registry.get(address)
    }

    async fn open_shipment(
        &self,
        actor: &Actor,
        key: &ShipmentKey,
        document: &[u8],
        action: &'static str,
    ) -> Result<Shipment, CoordinatorError> {
        let shipment = self.services.shipment(key).await?;
        if !shipment.is_participant(actor) {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongActor,
                action,
                "only shipment participants may attach documents",
            ));
        }
        if shipment.status.is_terminal() {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongState,
                action,
                format!("shipment is {}", shipment.status),
            ));
        }
        if document.is_empty() {
            return Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                action,
                "document is empty",
            ));
        }
        Ok(shipment)
    }

    async fn store_document(&self, bytes: &[u8]) -> Result<agx_crypto::ContentId, CoordinatorError> {
        self.services
            .content
            .put_bytes(bytes)
            .await
            .map_err(|e| CoordinatorError::Storage(e.to_string()))
    }

    /// Submit from the operator account and wait for the receipt.
    async fn anchor(&self, call: LedgerCall) -> Result<TxHash, CoordinatorError> {
        let name = call.name();
        let tx = self.services.submit(self.services.operator(), call).await?;
        self.services.confirm(name, &tx).await?;
        Ok(tx)
    }
}
