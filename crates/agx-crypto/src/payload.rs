//! # Attestation Payloads
//!
//! Four payload shapes, each encoded as a sequence of 32-byte words in the
//! exact order the ledger uses when it rebuilds the hash:
//!
//! | Shape | Words |
//! |---|---|
//! | Weighment | chainId, shipmentId, weightKg, keccak(weighHash), timestamp, nonce |
//! | Proof | chainId, shipmentId, proofType, keccak(proofHash), timestamp, nonce |
//! | StateUpdate | chainId, shipmentId, newState, timestamp, nonce |
//! | Kyc | chainId, participant, role, keccak(metaDataHash), timestamp, nonce |
//!
//! Free-text fields (content identifiers) are hashed to a `bytes32` before
//! they enter the word sequence, so the word count is fixed per shape.

use agx_core::abi::{address_word, uint_word};
use agx_core::{keccak256, Address, Hash32, Role, ShipmentKey, Timestamp};
use serde::{Deserialize, Serialize};

/// Kind of evidence attached with `attachProof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    /// Photo or document captured at pickup.
    Pickup,
    /// Photo or document captured at delivery.
    Delivery,
    /// Quality or grading certificate.
    Quality,
    /// Anything else.
    Other,
}

impl ProofType {
    /// The `uint8` the ledger stores.
    pub fn ledger_code(&self) -> u8 {
        match self {
            Self::Pickup => 0,
            Self::Delivery => 1,
            Self::Quality => 2,
            Self::Other => 3,
        }
    }

    /// Inverse of [`ProofType::ledger_code`]; unknown codes map to `Other`.
    pub fn from_ledger_code(code: u8) -> Self {
        match code {
            0 => Self::Pickup,
            1 => Self::Delivery,
            2 => Self::Quality,
            _ => Self::Other,
        }
    }
}

/// Shape-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadBody {
    /// A weight measurement.
    Weighment {
        /// Subject shipment.
        shipment: ShipmentKey,
        /// Measured weight in kilograms.
        weight_kg: u128,
        /// Content identifier of the weighbridge ticket.
        weigh_hash: String,
    },
    /// A proof document.
    Proof {
        /// Subject shipment.
        shipment: ShipmentKey,
        /// Evidence kind.
        proof_type: ProofType,
        /// Content identifier of the document.
        proof_hash: String,
    },
    /// An oracle-driven ledger state change.
    StateUpdate {
        /// Subject shipment.
        shipment: ShipmentKey,
        /// Target ledger state code.
        new_state: u8,
    },
    /// Identity verification of a participant.
    Kyc {
        /// Subject account.
        participant: Address,
        /// Role being attested.
        role: Role,
        /// Content identifier of the KYC record.
        meta_data_hash: String,
    },
}

impl PayloadBody {
    /// The 32-byte subject word: the shipment key, or the padded participant
    /// address for KYC.
    pub fn subject(&self) -> Hash32 {
        match self {
            Self::Weighment { shipment, .. }
            | Self::Proof { shipment, .. }
            | Self::StateUpdate { shipment, .. } => *shipment.as_hash(),
            Self::Kyc { participant, .. } => Hash32::from_bytes(address_word(participant)),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Weighment { .. } => "weighment",
            Self::Proof { .. } => "proof",
            Self::StateUpdate { .. } => "state_update",
            Self::Kyc { .. } => "kyc",
        }
    }
}

/// A complete payload ready to hash and sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationPayload {
    /// Ledger chain id.
    pub chain_id: u64,
    /// Shape-specific fields.
    pub body: PayloadBody,
    /// Attestation time.
    pub timestamp: Timestamp,
    /// Replay-protection nonce, unique per subject.
    pub nonce: u128,
}

impl AttestationPayload {
    /// The word sequence the ledger hashes.
    pub fn words(&self) -> Vec<[u8; 32]> {
        let chain = uint_word(u128::from(self.chain_id));
        let ts = uint_word(u128::from(self.timestamp.unix_secs()));
        let nonce = uint_word(self.nonce);
        match &self.body {
            PayloadBody::Weighment {
                shipment,
                weight_kg,
                weigh_hash,
            } => vec![
                chain,
                *shipment.as_hash().as_bytes(),
                uint_word(*weight_kg),
                *keccak256(weigh_hash.as_bytes()).as_bytes(),
                ts,
                nonce,
            ],
            PayloadBody::Proof {
                shipment,
                proof_type,
                proof_hash,
            } => vec![
                chain,
                *shipment.as_hash().as_bytes(),
                uint_word(u128::from(proof_type.ledger_code())),
                *keccak256(proof_hash.as_bytes()).as_bytes(),
                ts,
                nonce,
            ],
            PayloadBody::StateUpdate {
                shipment,
                new_state,
            } => vec![
                chain,
                *shipment.as_hash().as_bytes(),
                uint_word(u128::from(*new_state)),
                ts,
                nonce,
            ],
            PayloadBody::Kyc {
                participant,
                role,
                meta_data_hash,
            } => vec![
                chain,
                address_word(participant),
                uint_word(u128::from(role.ledger_code())),
                *keccak256(meta_data_hash.as_bytes()).as_bytes(),
                ts,
                nonce,
            ],
        }
    }

    /// Concatenated words.
    pub fn encode(&self) -> Vec<u8> {
        self.words().concat()
    }

    /// `keccak256(encode())`, the value the signer is asked to sign.
    pub fn hash(&self) -> Hash32 {
        keccak256(self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::ShipmentRef;
    use proptest::prelude::*;

    fn shipment() -> ShipmentKey {
        ShipmentRef::new("ship-1").unwrap().key()
    }

    fn weighment(weight: u128, hash: &str, ts: u64, nonce: u128) -> AttestationPayload {
        AttestationPayload {
            chain_id: 84_532,
            body: PayloadBody::Weighment {
                shipment: shipment(),
                weight_kg: weight,
                weigh_hash: hash.into(),
            },
            timestamp: Timestamp::from_unix_secs(ts).unwrap(),
            nonce,
        }
    }

    #[test]
    fn weighment_word_layout() {
        let p = weighment(1250, "bafyticket", 1_700_000_000, 9);
        let words = p.words();
        assert_eq!(words.len(), 6);
        assert_eq!(words[0], uint_word(84_532));
        assert_eq!(&words[1], shipment().as_hash().as_bytes());
        assert_eq!(words[2], uint_word(1250));
        assert_eq!(&words[3], keccak256(b"bafyticket").as_bytes());
        assert_eq!(words[4], uint_word(1_700_000_000));
        assert_eq!(words[5], uint_word(9));
        assert_eq!(p.encode().len(), 192);
    }

    #[test]
    fn state_update_has_five_words() {
        let p = AttestationPayload {
            chain_id: 1,
            body: PayloadBody::StateUpdate {
                shipment: shipment(),
                new_state: 2,
            },
            timestamp: Timestamp::from_unix_secs(5).unwrap(),
            nonce: 1,
        };
        assert_eq!(p.words().len(), 5);
        assert_eq!(p.words()[2], uint_word(2));
    }

    #[test]
    fn kyc_subject_is_padded_address() {
        let participant = Address::from_bytes([0xab; 20]);
        let body = PayloadBody::Kyc {
            participant,
            role: Role::Transporter,
            meta_data_hash: "bafykyc".into(),
        };
        let subject = body.subject();
        assert_eq!(&subject.as_bytes()[..12], &[0u8; 12]);
        assert_eq!(&subject.as_bytes()[12..], &[0xab; 20]);
        let p = AttestationPayload {
            chain_id: 1,
            body,
            timestamp: Timestamp::from_unix_secs(5).unwrap(),
            nonce: 1,
        };
        assert_eq!(p.words()[2], uint_word(1));
    }

    #[test]
    fn same_input_same_hash() {
        let a = weighment(10, "h", 100, 1);
        let b = weighment(10, "h", 100, 1);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn proof_type_codes() {
        for t in [ProofType::Pickup, ProofType::Delivery, ProofType::Quality, ProofType::Other] {
            assert_eq!(ProofType::from_ledger_code(t.ledger_code()), t);
        }
    }

    proptest! {
        #[test]
        fn single_field_mutation_changes_hash(
            weight in 0u128..1_000_000,
            ts in 1u64..4_000_000_000,
            nonce in 0u128..u128::MAX,
            text in "[a-z0-9]{1,24}",
        ) {
            let base = weighment(weight, &text, ts, nonce);
            let h = base.hash();
            prop_assert_ne!(weighment(weight + 1, &text, ts, nonce).hash(), h);
            prop_assert_ne!(weighment(weight, &format!("{text}x"), ts, nonce).hash(), h);
            prop_assert_ne!(weighment(weight, &text, ts + 1, nonce).hash(), h);
            prop_assert_ne!(weighment(weight, &text, ts, nonce.wrapping_add(1)).hash(), h);
            let mut other_chain = base.clone();
            other_chain.chain_id += 1;
            prop_assert_ne!(other_chain.hash(), h);
            let mut other_subject = base.clone();
            if let PayloadBody::Weighment { shipment, .. } = &mut other_subject.body {
                *shipment = ShipmentRef::new("ship-2").unwrap().key();
            }
            prop_assert_ne!(other_subject.hash(), h);
        }

        #[test]
        fn state_update_mutation_changes_hash(
            reference in "[A-Z0-9-]{1,16}",
            new_state in 0u8..7,
            ts in 1u64..4_000_000_000,
            nonce in 0u128..u128::MAX,
        ) {
            let update = |reference: &str, new_state: u8, ts: u64, nonce: u128| AttestationPayload {
                chain_id: 84_532,
                body: PayloadBody::StateUpdate {
                    shipment: ShipmentRef::new(reference).unwrap().key(),
                    new_state,
                },
                timestamp: Timestamp::from_unix_secs(ts).unwrap(),
                nonce,
            };
            let h = update(&reference, new_state, ts, nonce).hash();
            prop_assert_ne!(update(&format!("{reference}x"), new_state, ts, nonce).hash(), h);
            prop_assert_ne!(update(&reference, new_state + 1, ts, nonce).hash(), h);
            prop_assert_ne!(update(&reference, new_state, ts + 1, nonce).hash(), h);
            prop_assert_ne!(update(&reference, new_state, ts, nonce.wrapping_add(1)).hash(), h);
        }

        #[test]
        fn kyc_mutation_changes_hash(
            byte in 0u8..255,
            ts in 1u64..4_000_000_000,
            nonce in 0u128..u128::MAX,
            text in "[a-z0-9]{1,24}",
        ) {
            let kyc = |byte: u8, role: Role, text: &str, ts: u64, nonce: u128| AttestationPayload {
                chain_id: 84_532,
                body: PayloadBody::Kyc {
                    participant: Address::from_bytes([byte; 20]),
                    role,
                    meta_data_hash: text.to_string(),
                },
                timestamp: Timestamp::from_unix_secs(ts).unwrap(),
                nonce,
            };
            let h = kyc(byte, Role::Farmer, &text, ts, nonce).hash();
            prop_assert_ne!(kyc(byte + 1, Role::Farmer, &text, ts, nonce).hash(), h);
            prop_assert_ne!(kyc(byte, Role::Transporter, &text, ts, nonce).hash(), h);
            prop_assert_ne!(kyc(byte, Role::Farmer, &format!("{text}x"), ts, nonce).hash(), h);
            prop_assert_ne!(kyc(byte, Role::Farmer, &text, ts + 1, nonce).hash(), h);
            prop_assert_ne!(kyc(byte, Role::Farmer, &text, ts, nonce.wrapping_add(1)).hash(), h);
        }
    }
}
