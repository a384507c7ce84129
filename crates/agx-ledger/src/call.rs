//! # Contract Calls
//!
//! One variant per state-changing contract function. Each call knows its
//! Solidity signature, which contract it targets, and how to ABI-encode
//! itself into calldata.
//!
//! Attested calls (`attachWeighment`, `attachProof`, `updateShipmentState`,
//! `kycAttestation`) are built from a [`SignedAttestation`]: the contract
//! rebuilds the payload from the arguments, recovers the signer, and checks
//! it against its attestor set. The payload's own `chain_id` is never sent;
//! the contract substitutes `block.chainid`.

use agx_core::abi::{encode_call, Token};
use agx_core::{Address, DisputeId, ShipmentKey, SplitBps, TokenAmount};
use agx_crypto::{PayloadBody, SignedAttestation};
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;

/// Which contract a call is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Shipment registry.
    Shipments,
    /// Escrow vault.
    Escrow,
    /// An ERC-20 token.
    Token(Address),
}

impl Target {
    /// Resolve to a concrete address.
    pub fn address(&self, config: &LedgerConfig) -> Address {
        match self {
            Self::Shipments => config.shipment_contract,
            Self::Escrow => config.escrow_contract,
            Self::Token(token) => *token,
        }
    }
}

/// A state-changing contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum LedgerCall {
    /// Register a shipment; the sender becomes the farmer.
    CreateShipment {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Asking price in token base units.
        ask_price: TokenAmount,
    },
    /// Attach the sender as the buying industry.
    SetIndustry {
        /// Shipment key.
        shipment: ShipmentKey,
    },
    /// Assign a KYC-verified transporter.
    AssignTransporter {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Transporter account.
        transporter: Address,
    },
    /// Any attestor-signed call.
    Attested(SignedAttestation),
    /// Move `amount` of `token` from the sender into escrow.
    DepositPayment {
        /// Shipment key.
        shipment: ShipmentKey,
        /// ERC-20 token.
        token: Address,
        /// Amount in base units.
        amount: TokenAmount,
        /// Farmer payout account.
        farmer: Address,
        /// Transporter payout account.
        transporter: Address,
        /// Payout split.
        splits: SplitBps,
    },
    /// Freeze a deposited escrow.
    HoldPayment {
        /// Shipment key.
        shipment: ShipmentKey,
    },
    /// Pay the escrow out by its split.
    ReleasePayment {
        /// Shipment key.
        shipment: ShipmentKey,
    },
    /// Return the escrow to the payer.
    RefundPayment {
        /// Shipment key.
        shipment: ShipmentKey,
    },
    /// Payer-initiated refund within the cancellation window.
    CancelByPayer {
        /// Shipment key.
        shipment: ShipmentKey,
    },
    /// Open a dispute.
    RaiseDispute {
        /// Shipment key.
        shipment: ShipmentKey,
        /// Free-text reason.
        reason: String,
    },
    /// Attach evidence to an open dispute.
    AddEvidence {
        /// Dispute id.
        dispute: DisputeId,
        /// Content identifier.
        evidence_hash: String,
    },
    /// Decide an open dispute.
    ResolveDispute {
        /// Dispute id.
        dispute: DisputeId,
        /// Resolution code.
        resolution: u8,
        /// Resolver's note.
        note: String,
    },
    /// Dismiss an open dispute.
    RejectDispute {
        /// Dispute id.
        dispute: DisputeId,
        /// Resolver's note.
        note: String,
    },
    /// ERC-20 `approve`.
    Approve {
        /// Token contract.
        token: Address,
        /// Approved spender.
        spender: Address,
        /// Allowance.
        amount: TokenAmount,
    },
}

impl LedgerCall {
    /// Contract function name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateShipment { .. } => "createShipment",
            Self::SetIndustry { .. } => "setIndustry",
            Self::AssignTransporter { .. } => "assignTransporter",
            Self::Attested(att) => match att.payload.body {
                PayloadBody::Weighment { .. } => "attachWeighment",
                PayloadBody::Proof { .. } => "attachProof",
                PayloadBody::StateUpdate { .. } => "updateShipmentState",
                PayloadBody::Kyc { .. } => "kycAttestation",
            },
            Self::DepositPayment { .. } => "depositPayment",
            Self::HoldPayment { .. } => "holdPayment",
            Self::ReleasePayment { .. } => "releasePayment",
            Self::RefundPayment { .. } => "refundPayment",
            Self::CancelByPayer { .. } => "cancelByPayer",
            Self::RaiseDispute { .. } => "raiseDispute",
            Self::AddEvidence { .. } => "addEvidence",
            Self::ResolveDispute { .. } => "resolveDispute",
            Self::RejectDispute { .. } => "rejectDispute",
            Self::Approve { .. } => "approve",
        }
    }

    /// Solidity function signature used for the selector.
    pub fn signature(&self) -> &'static str {
        match self {
            Self::CreateShipment { .. } => "createShipment(bytes32,uint256)",
            Self::SetIndustry { .. } => "setIndustry(bytes32)",
            Self::AssignTransporter { .. } => "assignTransporter(bytes32,address)",
            Self::Attested(att) => match att.payload.body {
                PayloadBody::Weighment { .. } => {
                    "attachWeighment(bytes32,uint256,string,uint256,uint256,bytes)"
                }
                PayloadBody::Proof { .. } => {
                    "attachProof(bytes32,uint8,string,uint256,uint256,bytes)"
                }
                PayloadBody::StateUpdate { .. } => {
                    "updateShipmentState(bytes32,uint8,uint256,uint256,bytes)"
                }
                PayloadBody::Kyc { .. } => {
                    "kycAttestation(address,uint8,string,uint256,uint256,bytes)"
                }
            },
            Self::DepositPayment { .. } => {
                "depositPayment(bytes32,address,uint256,address,address,uint16,uint16,uint16)"
            }
            Self::HoldPayment { .. } => "holdPayment(bytes32)",
            Self::ReleasePayment { .. } => "releasePayment(bytes32)",
            Self::RefundPayment { .. } => "refundPayment(bytes32)",
            Self::CancelByPayer { .. } => "cancelByPayer(bytes32)",
            Self::RaiseDispute { .. } => "raiseDispute(bytes32,string)",
            Self::AddEvidence { .. } => "addEvidence(uint256,string)",
            Self::ResolveDispute { .. } => "resolveDispute(uint256,uint8,string)",
            Self::RejectDispute { .. } => "rejectDispute(uint256,string)",
            Self::Approve { .. } => "approve(address,uint256)",
        }
    }

    /// The contract this call is sent to.
    pub fn target(&self) -> Target {
        match self {
            Self::DepositPayment { .. }
            | Self::HoldPayment { .. }
            | Self::ReleasePayment { .. }
            | Self::RefundPayment { .. }
            | Self::CancelByPayer { .. } => Target::Escrow,
            Self::Approve { token, .. } => Target::Token(*token),
            _ => Target::Shipments,
        }
    }

    /// The shipment this call concerns, when it names one directly.
    pub fn shipment(&self) -> Option<ShipmentKey> {
        match self {
            Self::CreateShipment { shipment, .. }
            | Self::SetIndustry { shipment }
            | Self::AssignTransporter { shipment, .. }
            | Self::DepositPayment { shipment, .. }
            | Self::HoldPayment { shipment }
            | Self::ReleasePayment { shipment }
            | Self::RefundPayment { shipment }
            | Self::CancelByPayer { shipment }
            | Self::RaiseDispute { shipment, .. } => Some(*shipment),
            Self::Attested(att) => match &att.payload.body {
                PayloadBody::Weighment { shipment, .. }
                | PayloadBody::Proof { shipment, .. }
                | PayloadBody::StateUpdate { shipment, .. } => Some(*shipment),
                PayloadBody::Kyc { .. } => None,
            },
            _ => None,
        }
    }

    /// ABI-encoded calldata.
    pub fn encode(&self) -> Vec<u8> {
        encode_call(self.signature(), &self.tokens())
    }

    fn tokens(&self) -> Vec<Token> {
        let key = |k: &ShipmentKey| Token::Bytes32(*k.as_hash());
        let id = |d: &DisputeId| Token::Uint(u128::from(d.value()));
        match self {
            Self::CreateShipment { shipment, ask_price } => {
                vec![key(shipment), Token::Uint(ask_price.base_units())]
            }
            Self::SetIndustry { shipment }
            | Self::HoldPayment { shipment }
            | Self::ReleasePayment { shipment }
            | Self::RefundPayment { shipment }
            | Self::CancelByPayer { shipment } => vec![key(shipment)],
            Self::AssignTransporter {
                shipment,
                transporter,
            } => vec![key(shipment), Token::Address(*transporter)],
            Self::Attested(att) => attested_tokens(att),
            Self::DepositPayment {
                shipment,
                token,
                amount,
                farmer,
                transporter,
                splits,
            } => vec![
                key(shipment),
                Token::Address(*token),
                Token::Uint(amount.base_units()),
                Token::Address(*farmer),
                Token::Address(*transporter),
                Token::Uint(u128::from(splits.farmer_bps)),
                Token::Uint(u128::from(splits.transporter_bps)),
                Token::Uint(u128::from(splits.platform_bps)),
            ],
            Self::RaiseDispute { shipment, reason } => {
                vec![key(shipment), Token::String(reason.clone())]
            }
            Self::AddEvidence {
                dispute,
                evidence_hash,
            } => vec![id(dispute), Token::String(evidence_hash.clone())],
            Self::ResolveDispute {
                dispute,
                resolution,
                note,
            } => vec![
                id(dispute),
                Token::Uint(u128::from(*resolution)),
                Token::String(note.clone()),
            ],
            Self::RejectDispute { dispute, note } => {
                vec![id(dispute), Token::String(note.clone())]
            }
            Self::Approve {
                spender, amount, ..
            } => vec![Token::Address(*spender), Token::Uint(amount.base_units())],
        }
    }
}

fn attested_tokens(att: &SignedAttestation) -> Vec<Token> {
    let ts = Token::Uint(u128::from(att.payload.timestamp.unix_secs()));
    let nonce = Token::Uint(att.payload.nonce);
    let sig = Token::Bytes(att.signature.as_bytes().to_vec());
    let mut tokens = match &att.payload.body {
        PayloadBody::Weighment {
            shipment,
            weight_kg,
            weigh_hash,
        } => vec![
            Token::Bytes32(*shipment.as_hash()),
            Token::Uint(*weight_kg),
            Token::String(weigh_hash.clone()),
        ],
        PayloadBody::Proof {
            shipment,
            proof_type,
            proof_hash,
        } => vec![
            Token::Bytes32(*shipment.as_hash()),
            Token::Uint(u128::from(proof_type.ledger_code())),
            Token::String(proof_hash.clone()),
        ],
        PayloadBody::StateUpdate {
            shipment,
            new_state,
        } => vec![
            Token::Bytes32(*shipment.as_hash()),
            Token::Uint(u128::from(*new_state)),
        ],
        PayloadBody::Kyc {
            participant,
            role,
            meta_data_hash,
        } => vec![
            Token::Address(*participant),
            Token::Uint(u128::from(role.ledger_code())),
            Token::String(meta_data_hash.clone()),
        ],
    };
    tokens.extend([ts, nonce, sig]);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::abi::Decoder;
    use agx_core::{selector, ShipmentRef};

    fn key() -> ShipmentKey {
        ShipmentRef::new("SHP-1").unwrap().key()
    }

    #[test]
    fn escrow_calls_target_escrow_contract() {
        let cfg = LedgerConfig::new(1, Address::from_bytes([1; 20]), Address::from_bytes([2; 20]));
        let call = LedgerCall::ReleasePayment { shipment: key() };
        assert_eq!(call.target().address(&cfg), cfg.escrow_contract);
        let call = LedgerCall::RaiseDispute {
            shipment: key(),
            reason: "late".into(),
        };
        assert_eq!(call.target().address(&cfg), cfg.shipment_contract);
        let token = Address::from_bytes([9; 20]);
        let call = LedgerCall::Approve {
            token,
            spender: cfg.escrow_contract,
            amount: TokenAmount::from_base_units(5),
        };
        assert_eq!(call.target().address(&cfg), token);
    }

    #[test]
    fn deposit_calldata_layout() {
        let splits = SplitBps::new(8000, 1500, 500).unwrap();
        let call = LedgerCall::DepositPayment {
            shipment: key(),
            token: Address::from_bytes([3; 20]),
            amount: TokenAmount::from_base_units(1_000),
            farmer: Address::from_bytes([4; 20]),
            transporter: Address::from_bytes([5; 20]),
            splits,
        };
        let data = call.encode();
        assert_eq!(&data[..4], &selector(call.signature()));
        let d = Decoder::new(&data[4..]);
        assert_eq!(d.bytes32(0).unwrap(), *key().as_hash());
        assert_eq!(d.uint(2).unwrap(), 1_000);
        assert_eq!(d.address(4).unwrap(), Address::from_bytes([5; 20]));
        assert_eq!(d.u64(5).unwrap(), 8000);
        assert_eq!(d.u64(7).unwrap(), 500);
    }

    #[test]
    fn dispute_calls_carry_the_id() {
        let call = LedgerCall::ResolveDispute {
            dispute: DisputeId::new(7),
            resolution: 1,
            note: "paid in full".into(),
        };
        let data = call.encode();
        let d = Decoder::new(&data[4..]);
        assert_eq!(d.uint(0).unwrap(), 7);
        assert_eq!(d.u8(1).unwrap(), 1);
        assert_eq!(d.string(2).unwrap(), "paid in full");
        assert_eq!(call.shipment(), None);
    }
}
