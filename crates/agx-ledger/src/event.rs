//! # Ledger Events
//!
//! Typed view of the contract logs. `topic0` is `keccak256` of the event
//! signature; indexed parameters follow as topics, the rest is ABI data.
//!
//! [`EventData::to_log`] and [`EventData::decode`] are inverses. The mock
//! ledger emits through `to_log` so every event the projector sees has gone
//! through the same decoding path as logs read from a real node.

use agx_core::abi::{address_word, encode, uint_word, Decoder, Token};
use agx_core::{
    keccak256, Address, DisputeId, EventId, Hash32, LedgerPosition, ShipmentKey, Timestamp,
    TokenAmount, TxHash,
};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A raw log as returned by `eth_getLogs` or a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// `topic0` followed by indexed parameters.
    pub topics: Vec<Hash32>,
    /// Non-indexed parameters.
    pub data: Vec<u8>,
    /// Containing block.
    pub block_number: u64,
    /// Emitting transaction.
    pub tx_hash: TxHash,
    /// Index within the block.
    pub log_index: u64,
}

/// Decoded event fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EventData {
    /// `ShipmentCreated(bytes32 indexed, address indexed, uint256)`
    ShipmentCreated {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Farmer account.
        farmer: Address,
        /// Asking price.
        ask_price: TokenAmount,
    },
    /// `IndustrySet(bytes32 indexed, address indexed)`
    IndustrySet {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Industry account.
        industry: Address,
    },
    /// `TransporterAssigned(bytes32 indexed, address indexed)`
    TransporterAssigned {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Transporter account.
        transporter: Address,
    },
    /// `ShipmentStateChanged(bytes32 indexed, uint8, uint8)`
    ShipmentStateChanged {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Previous ledger state code.
        old_state: u8,
        /// New ledger state code.
        new_state: u8,
    },
    /// `WeighmentAttached(bytes32 indexed, uint256, string)`
    WeighmentAttached {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Weight in kilograms.
        weight_kg: u128,
        /// Ticket content id.
        weigh_hash: String,
    },
    /// `ProofAttached(bytes32 indexed, uint8, string)`
    ProofAttached {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Proof type code.
        proof_type: u8,
        /// Document content id.
        proof_hash: String,
    },
    /// `KycAttested(address indexed, uint8, string)`
    KycAttested {
        /// Verified account.
        participant: Address,
        /// Role code.
        role: u8,
        /// KYC record content id.
        meta_data_hash: String,
    },
    /// `PaymentDeposited(bytes32 indexed, address indexed, uint256)`
    PaymentDeposited {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Paying account.
        payer: Address,
        /// Escrowed amount.
        amount: TokenAmount,
    },
    /// `PaymentHeld(bytes32 indexed)`
    PaymentHeld {
        /// Shipment key.
        shipment: ShipmentKey,
    },
    /// `PaymentReleased(bytes32 indexed, uint256)`
    PaymentReleased {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Amount paid out.
        amount: TokenAmount,
    },
    /// `PaymentRefunded(bytes32 indexed, uint256)`
    PaymentRefunded {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Amount returned.
        amount: TokenAmount,
    },
    /// `DisputeRaised(uint256 indexed, bytes32 indexed, address)`
    DisputeRaised {
        /// Ledger-assigned dispute id.
        dispute: DisputeId,
        /// Shipment key.
        shipment: ShipmentKey,
        /// Raising account.
        raised_by: Address,
    },
    /// `EvidenceAdded(uint256 indexed, address, string)`
    EvidenceAdded {
        /// Dispute id.
        dispute: DisputeId,
        /// Submitting account.
        submitter: Address,
        /// Evidence content id.
        evidence_hash: String,
    },
    /// `DisputeResolved(uint256 indexed, uint8)`
    DisputeResolved {
        /// Dispute id.
        dispute: DisputeId,
        /// Resolution code.
        resolution: u8,
    },
    /// `DisputeRejected(uint256 indexed)`
    DisputeRejected {
        /// Dispute id.
        dispute: DisputeId,
    },
    /// ERC-20 `Approval(address indexed, address indexed, uint256)`
    Approval {
        /// Token owner.
        owner: Address,
        /// Approved spender.
        spender: Address,
        /// New allowance.
        amount: TokenAmount,
    },
}

const SHIPMENT_CREATED: &str = "ShipmentCreated(bytes32,address,uint256)";
const INDUSTRY_SET: &str = "IndustrySet(bytes32,address)";
const TRANSPORTER_ASSIGNED: &str = "TransporterAssigned(bytes32,address)";
const STATE_CHANGED: &str = "ShipmentStateChanged(bytes32,uint8,uint8)";
const WEIGHMENT_ATTACHED: &str = "WeighmentAttached(bytes32,uint256,string)";
const PROOF_ATTACHED: &str = "ProofAttached(bytes32,uint8,string)";
const KYC_ATTESTED: &str = "KycAttested(address,uint8,string)";
const PAYMENT_DEPOSITED: &str = "PaymentDeposited(bytes32,address,uint256)";
const PAYMENT_HELD: &str = "PaymentHeld(bytes32)";
const PAYMENT_RELEASED: &str = "PaymentReleased(bytes32,uint256)";
const PAYMENT_REFUNDED: &str = "PaymentRefunded(bytes32,uint256)";
const DISPUTE_RAISED: &str = "DisputeRaised(uint256,bytes32,address)";
const EVIDENCE_ADDED: &str = "EvidenceAdded(uint256,address,string)";
const DISPUTE_RESOLVED: &str = "DisputeResolved(uint256,uint8)";
const DISPUTE_REJECTED: &str = "DisputeRejected(uint256)";
const APPROVAL: &str = "Approval(address,address,uint256)";

fn topic_of(signature: &str) -> Hash32 {
    keccak256(signature.as_bytes())
}

fn key_topic(key: &ShipmentKey) -> Hash32 {
    *key.as_hash()
}

fn address_topic(address: &Address) -> Hash32 {
    Hash32::from_bytes(address_word(address))
}

fn id_topic(id: &DisputeId) -> Hash32 {
    Hash32::from_bytes(uint_word(u128::from(id.value())))
}

fn topic(topics: &[Hash32], index: usize) -> Result<&Hash32, LedgerError> {
    topics
        .get(index)
        .ok_or_else(|| LedgerError::InvalidResponse(format!("log is missing topic {index}")))
}

fn topic_address(topics: &[Hash32], index: usize) -> Result<Address, LedgerError> {
    Ok(Decoder::new(topic(topics, index)?.as_bytes()).address(0)?)
}

fn topic_id(topics: &[Hash32], index: usize) -> Result<DisputeId, LedgerError> {
    Ok(DisputeId::new(Decoder::new(topic(topics, index)?.as_bytes()).u64(0)?))
}

fn topic_key(topics: &[Hash32], index: usize) -> Result<ShipmentKey, LedgerError> {
    Ok(ShipmentKey::from_hash(*topic(topics, index)?))
}

impl EventData {
    /// Event name as declared in the contract.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ShipmentCreated { .. } => "ShipmentCreated",
            Self::IndustrySet { .. } => "IndustrySet",
            Self::TransporterAssigned { .. } => "TransporterAssigned",
            Self::ShipmentStateChanged { .. } => "ShipmentStateChanged",
            Self::WeighmentAttached { .. } => "WeighmentAttached",
            Self::ProofAttached { .. } => "ProofAttached",
            Self::KycAttested { .. } => "KycAttested",
            Self::PaymentDeposited { .. } => "PaymentDeposited",
            Self::PaymentHeld { .. } => "PaymentHeld",
            Self::PaymentReleased { .. } => "PaymentReleased",
            Self::PaymentRefunded { .. } => "PaymentRefunded",
            Self::DisputeRaised { .. } => "DisputeRaised",
            Self::EvidenceAdded { .. } => "EvidenceAdded",
            Self::DisputeResolved { .. } => "DisputeResolved",
            Self::DisputeRejected { .. } => "DisputeRejected",
            Self::Approval { .. } => "Approval",
        }
    }

    /// Shipment the event concerns, when it names one.
    pub fn shipment(&self) -> Option<ShipmentKey> {
        match self {
            Self::ShipmentCreated { shipment, .. }
            | Self::IndustrySet { shipment, .. }
            | Self::TransporterAssigned { shipment, .. }
            | Self::ShipmentStateChanged { shipment, .. }
            | Self::WeighmentAttached { shipment, .. }
            | Self::ProofAttached { shipment, .. }
            | Self::PaymentDeposited { shipment, .. }
            | Self::PaymentHeld { shipment }
            | Self::PaymentReleased { shipment, .. }
            | Self::PaymentRefunded { shipment, .. }
            | Self::DisputeRaised { shipment, .. } => Some(*shipment),
            _ => None,
        }
    }

    /// Topics and data for this event.
    pub fn to_log(&self) -> (Vec<Hash32>, Vec<u8>) {
        let amount = |a: &TokenAmount| Token::Uint(a.base_units());
        match self {
            Self::ShipmentCreated {
                shipment,
                farmer,
                ask_price,
            } => (
                vec![topic_of(SHIPMENT_CREATED), key_topic(shipment), address_topic(farmer)],
                encode(&[amount(ask_price)]),
            ),
            Self::IndustrySet { shipment, industry } => (
                vec![topic_of(INDUSTRY_SET), key_topic(shipment), address_topic(industry)],
                Vec::new(),
            ),
            Self::TransporterAssigned {
                shipment,
                transporter,
            } => (
                vec![
                    topic_of(TRANSPORTER_ASSIGNED),
                    key_topic(shipment),
                    address_topic(transporter),
                ],
                Vec::new(),
            ),
            Self::ShipmentStateChanged {
                shipment,
                old_state,
                new_state,
            } => (
                vec![topic_of(STATE_CHANGED), key_topic(shipment)],
                encode(&[
                    Token::Uint(u128::from(*old_state)),
                    Token::Uint(u128::from(*new_state)),
                ]),
            ),
            Self::WeighmentAttached {
                shipment,
                weight_kg,
                weigh_hash,
            } => (
                vec![topic_of(WEIGHMENT_ATTACHED), key_topic(shipment)],
                encode(&[Token::Uint(*weight_kg), Token::String(weigh_hash.clone())]),
            ),
            Self::ProofAttached {
                shipment,
                proof_type,
                proof_hash,
            } => (
                vec![topic_of(PROOF_ATTACHED), key_topic(shipment)],
                encode(&[
                    Token::Uint(u128::from(*proof_type)),
                    Token::String(proof_hash.clone()),
                ]),
            ),
            Self::KycAttested {
                participant,
                role,
                meta_data_hash,
            } => (
                vec![topic_of(KYC_ATTESTED), address_topic(participant)],
                encode(&[
                    Token::Uint(u128::from(*role)),
                    Token::String(meta_data_hash.clone()),
                ]),
            ),
            Self::PaymentDeposited {
                shipment,
                payer,
                amount: value,
            } => (
                vec![topic_of(PAYMENT_DEPOSITED), key_topic(shipment), address_topic(payer)],
                encode(&[amount(value)]),
            ),
            Self::PaymentHeld { shipment } => {
                (vec![topic_of(PAYMENT_HELD), key_topic(shipment)], Vec::new())
            }
            Self::PaymentReleased {
                shipment,
                amount: value,
            } => (
                vec![topic_of(PAYMENT_RELEASED), key_topic(shipment)],
                encode(&[amount(value)]),
            ),
            Self::PaymentRefunded {
                shipment,
                amount: value,
            } => (
                vec![topic_of(PAYMENT_REFUNDED), key_topic(shipment)],
                encode(&[amount(value)]),
            ),
            Self::DisputeRaised {
                dispute,
                shipment,
                raised_by,
            } => (
                vec![topic_of(DISPUTE_RAISED), id_topic(dispute), key_topic(shipment)],
                encode(&[Token::Address(*raised_by)]),
            ),
            Self::EvidenceAdded {
                dispute,
                submitter,
                evidence_hash,
            } => (
                vec![topic_of(EVIDENCE_ADDED), id_topic(dispute)],
                encode(&[
                    Token::Address(*submitter),
                    Token::String(evidence_hash.clone()),
                ]),
            ),
            Self::DisputeResolved {
                dispute,
                resolution,
            } => (
                vec![topic_of(DISPUTE_RESOLVED), id_topic(dispute)],
                encode(&[Token::Uint(u128::from(*resolution))]),
            ),
            Self::DisputeRejected { dispute } => {
                (vec![topic_of(DISPUTE_REJECTED), id_topic(dispute)], Vec::new())
            }
            Self::Approval {
                owner,
                spender,
                amount: value,
            } => (
                vec![topic_of(APPROVAL), address_topic(owner), address_topic(spender)],
                encode(&[amount(value)]),
            ),
        }
    }

    /// Decode a log. Unknown `topic0` yields `Ok(None)`.
    pub fn decode(topics: &[Hash32], data: &[u8]) -> Result<Option<Self>, LedgerError> {
        let Some(topic0) = topics.first() else {
            return Ok(None);
        };
        let d = Decoder::new(data);
        let event = if *topic0 == topic_of(SHIPMENT_CREATED) {
            Self::ShipmentCreated {
                shipment: topic_key(topics, 1)?,
                farmer: topic_address(topics, 2)?,
                ask_price: TokenAmount::from_base_units(d.uint(0)?),
            }
        } else if *topic0 == topic_of(INDUSTRY_SET) {
            Self::IndustrySet {
                shipment: topic_key(topics, 1)?,
                industry: topic_address(topics, 2)?,
            }
        } else if *topic0 == topic_of(TRANSPORTER_ASSIGNED) {
            Self::TransporterAssigned {
                shipment: topic_key(topics, 1)?,
                transporter: topic_address(topics, 2)?,
            }
        } else if *topic0 == topic_of(STATE_CHANGED) {
            Self::ShipmentStateChanged {
                shipment: topic_key(topics, 1)?,
                old_state: d.u8(0)?,
                new_state: d.u8(1)?,
            }
        } else if *topic0 == topic_of(WEIGHMENT_ATTACHED) {
            Self::WeighmentAttached {
                shipment: topic_key(topics, 1)?,
                weight_kg: d.uint(0)?,
                weigh_hash: d.string(1)?,
            }
        } else if *topic0 == topic_of(PROOF_ATTACHED) {
            Self::ProofAttached {
                shipment: topic_key(topics, 1)?,
                proof_type: d.u8(0)?,
                proof_hash: d.string(1)?,
            }
        } else if *topic0 == topic_of(KYC_ATTESTED) {
            Self::KycAttested {
                participant: topic_address(topics, 1)?,
                role: d.u8(0)?,
                meta_data_hash: d.string(1)?,
            }
        } else if *topic0 == topic_of(PAYMENT_DEPOSITED) {
            Self::PaymentDeposited {
                shipment: topic_key(topics, 1)?,
                payer: topic_address(topics, 2)?,
                amount: TokenAmount::from_base_units(d.uint(0)?),
            }
        } else if *topic0 == topic_of(PAYMENT_HELD) {
            Self::PaymentHeld {
                shipment: topic_key(topics, 1)?,
            }
        } else if *topic0 == topic_of(PAYMENT_RELEASED) {
            Self::PaymentReleased {
                shipment: topic_key(topics, 1)?,
                amount: TokenAmount::from_base_units(d.uint(0)?),
            }
        } else if *topic0 == topic_of(PAYMENT_REFUNDED) {
            Self::PaymentRefunded {
                shipment: topic_key(topics, 1)?,
                amount: TokenAmount::from_base_units(d.uint(0)?),
            }
        } else if *topic0 == topic_of(DISPUTE_RAISED) {
            Self::DisputeRaised {
                dispute: topic_id(topics, 1)?,
                shipment: topic_key(topics, 2)?,
                raised_by: d.address(0)?,
            }
        } else if *topic0 == topic_of(EVIDENCE_ADDED) {
            Self::EvidenceAdded {
                dispute: topic_id(topics, 1)?,
                submitter: d.address(0)?,
                evidence_hash: d.string(1)?,
            }
        } else if *topic0 == topic_of(DISPUTE_RESOLVED) {
            Self::DisputeResolved {
                dispute: topic_id(topics, 1)?,
                resolution: d.u8(0)?,
            }
        } else if *topic0 == topic_of(DISPUTE_REJECTED) {
            Self::DisputeRejected {
                dispute: topic_id(topics, 1)?,
            }
        } else if *topic0 == topic_of(APPROVAL) {
            Self::Approval {
                owner: topic_address(topics, 1)?,
                spender: topic_address(topics, 2)?,
                amount: TokenAmount::from_base_units(d.uint(0)?),
            }
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }
}

/// A decoded log with its ledger coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Re-delivery-stable identity.
    pub id: EventId,
    /// Position in ledger order.
    pub position: LedgerPosition,
    /// Timestamp of the containing block.
    pub block_time: Timestamp,
    /// Emitting contract.
    pub emitter: Address,
    /// Decoded fields.
    pub data: EventData,
}

impl LedgerEvent {
    /// Decode a raw log. Unknown events yield `Ok(None)`.
    pub fn from_log(log: &LogEntry, block_time: Timestamp) -> Result<Option<Self>, LedgerError> {
        Ok(EventData::decode(&log.topics, &log.data)?.map(|data| Self {
            id: EventId {
                tx_hash: log.tx_hash,
                log_index: log.log_index,
            },
            position: LedgerPosition::new(log.block_number, log.log_index),
            block_time,
            emitter: log.address,
            data,
        }))
    }

    /// Transaction that emitted this event.
    pub fn tx_hash(&self) -> &TxHash {
        &self.id.tx_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::ShipmentRef;

    fn key() -> ShipmentKey {
        ShipmentRef::new("SHP-9").unwrap().key()
    }

    #[test]
    fn state_changed_decodes() {
        let ev = EventData::ShipmentStateChanged {
            shipment: key(),
            old_state: 1,
            new_state: 2,
        };
        let (topics, data) = ev.to_log();
        assert_eq!(topics[0], keccak256(STATE_CHANGED));
        assert_eq!(EventData::decode(&topics, &data).unwrap(), Some(ev));
    }

    #[test]
    fn dispute_raised_keeps_ledger_id() {
        let ev = EventData::DisputeRaised {
            dispute: DisputeId::new(42),
            shipment: key(),
            raised_by: Address::from_bytes([8; 20]),
        };
        let (topics, data) = ev.to_log();
        match EventData::decode(&topics, &data).unwrap() {
            Some(EventData::DisputeRaised { dispute, .. }) => assert_eq!(dispute.value(), 42),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_topic_is_skipped() {
        let topics = vec![keccak256("Transfer(address,address,uint256)")];
        assert_eq!(EventData::decode(&topics, &[]).unwrap(), None);
        assert_eq!(EventData::decode(&[], &[]).unwrap(), None);
    }

    #[test]
    fn truncated_data_is_an_error() {
        let (topics, _) = EventData::PaymentReleased {
            shipment: key(),
            amount: TokenAmount::from_base_units(9),
        }
        .to_log();
        assert!(matches!(
            EventData::decode(&topics, &[0u8; 8]),
            Err(LedgerError::Abi(_))
        ));
    }

    #[test]
    fn from_log_sets_identity() {
        let (topics, data) = EventData::PaymentHeld { shipment: key() }.to_log();
        let tx = TxHash::from_hash(keccak256("tx"));
        let log = LogEntry {
            address: Address::from_bytes([2; 20]),
            topics,
            data,
            block_number: 17,
            tx_hash: tx,
            log_index: 3,
        };
        let ev = LedgerEvent::from_log(&log, Timestamp::from_unix_secs(1_700_000_000).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(ev.id.log_index, 3);
        assert_eq!(ev.position, LedgerPosition::new(17, 3));
        assert_eq!(ev.tx_hash(), &tx);
        assert_eq!(ev.data.shipment(), Some(key()));
    }
}
