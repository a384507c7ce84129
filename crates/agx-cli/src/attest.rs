//! # Attest Subcommand
//!
//! Signs an attestation offline with the key in `AGX_ATTESTOR_KEY` and
//! prints the signed payload as JSON. Nothing is submitted; the output is
//! what a ledger call carries.

use std::sync::Arc;

use agx_core::{Address, Role, ShipmentRef};
use agx_crypto::{AttestationService, ProofType, SignedAttestation};
use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};

use crate::config::AgxConfig;
use crate::runtime::{attestation_service, env_signer};

/// Arguments for `agx attest`.
#[derive(Args, Debug)]
pub struct AttestArgs {
    #[command(subcommand)]
    pub command: AttestCommand,
}

/// Attestation kinds.
#[derive(Subcommand, Debug)]
pub enum AttestCommand {
    /// A ledger state update (0=OPEN .. 7=CANCELLED).
    StateUpdate {
        /// Shipment reference.
        #[arg(long)]
        shipment: String,
        /// Target ledger state code.
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=7))]
        state: u8,
    },

    /// A participant KYC attestation.
    Kyc {
        /// Participant account.
        #[arg(long, value_parser = parse_address)]
        participant: Address,
        /// Participant role.
        #[arg(long)]
        role: Role,
        /// Content id of the KYC record.
        #[arg(long)]
        meta_data_hash: String,
    },

    /// A weigh-bridge ticket.
    Weighment {
        /// Shipment reference.
        #[arg(long)]
        shipment: String,
        /// Measured weight in kilograms.
        #[arg(long)]
        weight_kg: u128,
        /// Content id of the ticket.
        #[arg(long)]
        weigh_hash: String,
    },

    /// A proof document.
    Proof {
        /// Shipment reference.
        #[arg(long)]
        shipment: String,
        /// Kind of proof.
        #[arg(long, value_enum)]
        proof_type: ProofKind,
        /// Content id of the document.
        #[arg(long)]
        proof_hash: String,
    },
}

/// Command-line spelling of [`ProofType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProofKind {
    /// Captured at pickup.
    Pickup,
    /// Captured at delivery.
    Delivery,
    /// Quality or grading certificate.
    Quality,
    /// Anything else.
    Other,
}

impl From<ProofKind> for ProofType {
    fn from(kind: ProofKind) -> Self {
        match kind {
            ProofKind::Pickup => ProofType::Pickup,
            ProofKind::Delivery => ProofType::Delivery,
            ProofKind::Quality => ProofType::Quality,
            ProofKind::Other => ProofType::Other,
        }
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    Address::parse(s).map_err(|e| e.to_string())
}

/// Entry point for `agx attest`.
pub async fn run_attest(args: &AttestArgs, config: &AgxConfig) -> Result<u8> {
    let service = attestation_service(config, env_signer()?);
    let signed = sign(&args.command, &service).await?;
    tracing::info!(
        signer = %signed.signer,
        nonce = %signed.payload.nonce,
        "attestation signed"
    );
    println!("{}", serde_json::to_string_pretty(&signed)?);
    Ok(0)
}

/// Build and sign the attestation `command` describes.
pub async fn sign(command: &AttestCommand, service: &Arc<AttestationService>) -> Result<SignedAttestation> {
    let signed = match command {
        AttestCommand::StateUpdate { shipment, state } => {
            service.attest_state_update(ShipmentRef::new(shipment)?.key(), *state).await?
        }
        AttestCommand::Kyc {
            participant,
            role,
            meta_data_hash,
        } => service.attest_kyc(*participant, *role, meta_data_hash.clone()).await?,
        AttestCommand::Weighment {
            shipment,
            weight_kg,
            weigh_hash,
        } => {
            service
                .attest_weighment(ShipmentRef::new(shipment)?.key(), *weight_kg, weigh_hash.clone())
                .await?
        }
        AttestCommand::Proof {
            shipment,
            proof_type,
            proof_hash,
        } => {
            service
                .attest_proof(ShipmentRef::new(shipment)?.key(), (*proof_type).into(), proof_hash.clone())
                .await?
        }
    };
    Ok(signed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_crypto::{AttestationConfig, LocalKeySigner, PayloadBody};

    fn service() -> Arc<AttestationService> {
        Arc::new(AttestationService::new(
            AttestationConfig::default(),
            Arc::new(LocalKeySigner::generate()),
        ))
    }

    #[tokio::test]
    async fn state_update_is_signed_for_the_shipment_key() {
        let service = service();
        let cmd = AttestCommand::StateUpdate {
            shipment: "S-77".into(),
            state: 3,
        };
        let signed = sign(&cmd, &service).await.unwrap();
        signed.verify(&service.signer_address()).unwrap();
        match signed.payload.body {
            PayloadBody::StateUpdate { shipment, new_state } => {
                assert_eq!(shipment, ShipmentRef::new("S-77").unwrap().key());
                assert_eq!(new_state, 3);
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn proof_kind_maps_to_proof_type() {
        let cmd = AttestCommand::Proof {
            shipment: "S-77".into(),
            proof_type: ProofKind::Delivery,
            proof_hash: "Qm-delivery".into(),
        };
        let signed = sign(&cmd, &service()).await.unwrap();
        assert!(matches!(
            signed.payload.body,
            PayloadBody::Proof {
                proof_type: ProofType::Delivery,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_shipment_reference_is_refused() {
        let cmd = AttestCommand::Weighment {
            shipment: String::new(),
            weight_kg: 10,
            weigh_hash: "Qm".into(),
        };
        assert!(sign(&cmd, &service()).await.is_err());
    }
}
