//! # Attestation Service
//!
//! Builds payloads, signs them through the injected [`AttestationSigner`],
//! and recovers the signer locally before returning. A payload whose
//! timestamp is outside the skew window or whose chain id differs from the
//! configured chain is refused without asking the signer.

use std::sync::Arc;

use agx_core::{Address, Hash32, Role, ShipmentKey, Timestamp};
use serde::{Deserialize, Serialize};

use crate::ecdsa::{personal_message_hash, recover_address, EthSignature};
use crate::error::CryptoError;
use crate::nonce::{MonotonicNonce, NonceSource};
use crate::payload::{AttestationPayload, PayloadBody, ProofType};
use crate::signer::AttestationSigner;

/// Attestation service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationConfig {
    /// Ledger chain id every payload commits to.
    pub chain_id: u64,
    /// Accepted distance between payload timestamp and local time.
    pub skew_window_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            chain_id: 31_337,
            skew_window_secs: 300,
        }
    }
}

impl AttestationConfig {
    /// Set the chain id.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Set the skew window.
    pub fn with_skew_window_secs(mut self, secs: u64) -> Self {
        self.skew_window_secs = secs;
        self
    }
}

/// A payload with its hash and verified signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttestation {
    /// What was signed.
    pub payload: AttestationPayload,
    /// `keccak256` of the encoded payload (before prefixing).
    pub payload_hash: Hash32,
    /// Recoverable signature over the prefixed hash.
    pub signature: EthSignature,
    /// Address the signature recovers to.
    pub signer: Address,
}

impl SignedAttestation {
    /// Recover the signer again and compare with `expected`.
    pub fn verify(&self, expected: &Address) -> Result<(), CryptoError> {
        let recomputed = self.payload.hash();
        let recovered = recover_address(&personal_message_hash(&recomputed), &self.signature)?;
        if recovered != *expected {
            return Err(CryptoError::SignerMismatch {
                expected: *expected,
                recovered,
            });
        }
        Ok(())
    }
}

/// Builds and signs attestation payloads.
#[derive(Clone)]
pub struct AttestationService {
    config: AttestationConfig,
    signer: Arc<dyn AttestationSigner>,
    nonces: Arc<dyn NonceSource>,
}

impl AttestationService {
    /// Service with a [`MonotonicNonce`] source.
    pub fn new(config: AttestationConfig, signer: Arc<dyn AttestationSigner>) -> Self {
        Self {
            config,
            signer,
            nonces: Arc::new(MonotonicNonce::new()),
        }
    }

    /// Replace the nonce source.
    pub fn with_nonce_source(mut self, nonces: Arc<dyn NonceSource>) -> Self {
        self.nonces = nonces;
        self
    }

    /// The configured chain id.
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// The attestor address.
    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// Build a payload stamped with the current time and a fresh nonce.
    pub fn build(&self, body: PayloadBody) -> AttestationPayload {
        let nonce = self.nonces.next_nonce(&body.subject());
        AttestationPayload {
            chain_id: self.config.chain_id,
            body,
            timestamp: Timestamp::now(),
            nonce,
        }
    }

    /// Sign a payload and verify the signature recovers to the signer.
    #[tracing::instrument(skip(self, payload), fields(kind = payload.body.kind(), signer = %self.signer.address()))]
    pub async fn sign(&self, payload: AttestationPayload) -> Result<SignedAttestation, CryptoError> {
        if payload.chain_id != self.config.chain_id {
            return Err(CryptoError::ChainMismatch {
                payload: payload.chain_id,
                configured: self.config.chain_id,
            });
        }
        let skew = payload.timestamp.abs_diff_secs(&Timestamp::now());
        if skew > self.config.skew_window_secs {
            return Err(CryptoError::TimestampSkew {
                timestamp: payload.timestamp.unix_secs(),
                skew_secs: skew,
                window_secs: self.config.skew_window_secs,
            });
        }

        let payload_hash = payload.hash();
        let signature = self.signer.sign_hash(&payload_hash).await?;
        let expected = self.signer.address();
        let recovered = recover_address(&personal_message_hash(&payload_hash), &signature)?;
        if recovered != expected {
            tracing::error!(%expected, %recovered, "signature does not recover to signer");
            return Err(CryptoError::SignerMismatch {
                expected,
                recovered,
            });
        }

        tracing::debug!(hash = %payload_hash, nonce = payload.nonce, "attestation signed");
        Ok(SignedAttestation {
            payload,
            payload_hash,
            signature,
            signer: expected,
        })
    }

    /// Build and sign a weighment.
    pub async fn attest_weighment(
        &self,
        shipment: ShipmentKey,
        weight_kg: u128,
        weigh_hash: impl Into<String>,
    ) -> Result<SignedAttestation, CryptoError> {
        self.sign(self.build(PayloadBody::Weighment {
            shipment,
            weight_kg,
            weigh_hash: weigh_hash.into(),
        }))
        .await
    }

    /// Build and sign a proof.
    pub async fn attest_proof(
        &self,
        shipment: ShipmentKey,
        proof_type: ProofType,
        proof_hash: impl Into<String>,
    ) -> Result<SignedAttestation, CryptoError> {
        self.sign(self.build(PayloadBody::Proof {
            shipment,
            proof_type,
            proof_hash: proof_hash.into(),
        }))
        .await
    }

    /// Build and sign a ledger state update.
    pub async fn attest_state_update(
        &self,
        shipment: ShipmentKey,
        new_state: u8,
    ) -> Result<SignedAttestation, CryptoError> {
        self.sign(self.build(PayloadBody::StateUpdate { shipment, new_state }))
            .await
    }

    /// Build and sign a KYC attestation.
    pub async fn attest_kyc(
        &self,
        participant: Address,
        role: Role,
        meta_data_hash: impl Into<String>,
    ) -> Result<SignedAttestation, CryptoError> {
        self.sign(self.build(PayloadBody::Kyc {
            participant,
            role,
            meta_data_hash: meta_data_hash.into(),
        }))
        .await
    }
}

impl std::fmt::Debug for AttestationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationService")
            .field("config", &self.config)
            .field("signer", &self.signer.signer_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::LocalKeySigner;
    use agx_core::ShipmentRef;
    use async_trait::async_trait;

    fn service() -> AttestationService {
        AttestationService::new(
            AttestationConfig::default().with_chain_id(84_532),
            Arc::new(LocalKeySigner::from_secret(&[5u8; 32]).unwrap()),
        )
    }

    fn key() -> ShipmentKey {
        ShipmentRef::new("ship-a").unwrap().key()
    }

    #[tokio::test]
    async fn weighment_signature_verifies() {
        let svc = service();
        let signed = svc.attest_weighment(key(), 1200, "bafyticket").await.unwrap();
        assert_eq!(signed.signer, svc.signer_address());
        assert_eq!(signed.payload_hash, signed.payload.hash());
        signed.verify(&svc.signer_address()).unwrap();
    }

    #[tokio::test]
    async fn verify_against_other_address_fails() {
        let signed = service().attest_state_update(key(), 2).await.unwrap();
        let err = signed.verify(&Address::from_bytes([1; 20])).unwrap_err();
        assert!(matches!(err, CryptoError::SignerMismatch { .. }));
    }

    #[tokio::test]
    async fn tampered_payload_fails_verification() {
        let svc = service();
        let mut signed = svc.attest_weighment(key(), 1200, "bafyticket").await.unwrap();
        if let PayloadBody::Weighment { weight_kg, .. } = &mut signed.payload.body {
            *weight_kg += 1;
        }
        assert!(signed.verify(&svc.signer_address()).is_err());
    }

    #[tokio::test]
    async fn stale_timestamp_rejected_before_signing() {
        let svc = service();
        let mut payload = svc.build(PayloadBody::StateUpdate {
            shipment: key(),
            new_state: 3,
        });
        payload.timestamp = payload.timestamp.plus_secs(-3_600);
        let err = svc.sign(payload).await.unwrap_err();
        assert!(matches!(err, CryptoError::TimestampSkew { .. }));
    }

    #[tokio::test]
    async fn chain_mismatch_rejected() {
        let svc = service();
        let mut payload = svc.build(PayloadBody::StateUpdate {
            shipment: key(),
            new_state: 3,
        });
        payload.chain_id = 1;
        assert!(matches!(
            svc.sign(payload).await,
            Err(CryptoError::ChainMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn consecutive_payloads_get_distinct_nonces() {
        let svc = service();
        let a = svc.attest_state_update(key(), 2).await.unwrap();
        let b = svc.attest_state_update(key(), 2).await.unwrap();
        assert_ne!(a.payload.nonce, b.payload.nonce);
        assert_ne!(a.payload_hash, b.payload_hash);
    }

    struct LyingSigner {
        honest: LocalKeySigner,
        claimed: Address,
    }

    #[async_trait]
    impl AttestationSigner for LyingSigner {
        fn address(&self) -> Address {
            self.claimed
        }
        async fn sign_hash(&self, h: &Hash32) -> Result<EthSignature, CryptoError> {
            self.honest.sign_hash(h).await
        }
        fn signer_name(&self) -> &str {
            "LyingSigner"
        }
    }

    #[tokio::test]
    async fn signer_that_misreports_its_address_is_caught() {
        let svc = AttestationService::new(
            AttestationConfig::default(),
            Arc::new(LyingSigner {
                honest: LocalKeySigner::generate(),
                claimed: Address::from_bytes([0x42; 20]),
            }),
        );
        let err = svc.attest_kyc(Address::from_bytes([1; 20]), Role::Farmer, "meta").await.unwrap_err();
        assert!(matches!(err, CryptoError::SignerMismatch { .. }));
    }
}
