//! # Mock Ledger
//!
//! In-process simulation of the shipment, escrow, and token contracts.
//!
//! The mock enforces the contract rules rather than echoing calls back:
//! role checks, ledger state order, attestor signature recovery, per-subject
//! nonce replay, the timestamp window, ERC-20 allowances and balances, and
//! escrow status. Submission dry-runs the call against current state (as a
//! node's gas estimation would) and rejects it before a hash is issued.
//! Mining executes for real; a call that became invalid in between produces
//! a failed receipt.
//!
//! ## Test controls
//!
//! - `set_auto_mine(false)` keeps submitted transactions pending until
//!   [`MockLedger::mine`].
//! - [`MockLedger::fail_next_submits`], [`MockLedger::fail_next_calls`] and
//!   [`MockLedger::set_offline`] inject transport failures.
//! - [`MockLedger::advance_time`] moves block time forward for window tests.

use std::collections::{HashMap, HashSet};

use agx_core::{
    keccak256, Address, DisputeId, Hash32, LedgerPosition, Role, ShipmentKey, SplitBps, Timestamp,
    TokenAmount, TxHash,
};
use agx_crypto::{personal_message_hash, recover_address, AttestationPayload, PayloadBody, SignedAttestation};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::call::LedgerCall;
use crate::client::{LedgerClient, OnChainEscrow, OnChainShipment, TxReceipt};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::event::{EventData, LedgerEvent, LogEntry};

/// Ledger shipment state codes.
pub mod state {
    /// Listed, no transporter.
    pub const OPEN: u8 = 0;
    /// Transporter assigned, awaiting payment.
    pub const ASSIGNED: u8 = 1;
    /// Paid and released for carriage.
    pub const IN_TRANSIT: u8 = 2;
    /// Delivered.
    pub const DELIVERED: u8 = 3;
    /// Delivery verified.
    pub const VERIFIED: u8 = 4;
    /// Escrow paid out.
    pub const PAID: u8 = 5;
    /// Under dispute.
    pub const DISPUTED: u8 = 6;
    /// Cancelled.
    pub const CANCELLED: u8 = 7;
}

/// Escrow status codes.
pub mod escrow_status {
    /// Funds held by the vault.
    pub const DEPOSITED: u8 = 1;
    /// Frozen by a dispute.
    pub const HELD: u8 = 2;
    /// Paid out.
    pub const RELEASED: u8 = 3;
    /// Returned to the payer.
    pub const REFUNDED: u8 = 4;
}

const DISPUTE_OPEN: u8 = 0;
const DISPUTE_RESOLVED: u8 = 1;
const DISPUTE_REJECTED: u8 = 2;

#[derive(Debug, Clone)]
struct ShipmentRow {
    state: u8,
    farmer: Address,
    industry: Address,
    transporter: Address,
    ask_price: u128,
}

impl ShipmentRow {
    fn is_party(&self, account: &Address) -> bool {
        !account.is_zero()
            && (*account == self.farmer || *account == self.industry || *account == self.transporter)
    }
}

#[derive(Debug, Clone)]
struct EscrowRow {
    token: Address,
    amount: u128,
    payer: Address,
    farmer: Address,
    transporter: Address,
    splits: SplitBps,
    status: u8,
    deposited_at: u64,
}

impl EscrowRow {
    fn is_live(&self) -> bool {
        matches!(self.status, escrow_status::DEPOSITED | escrow_status::HELD)
    }
}

#[derive(Debug, Clone)]
struct DisputeRow {
    shipment: ShipmentKey,
    status: u8,
}

/// Contract storage. Cloned for dry runs and for atomic execution.
#[derive(Debug, Clone, Default)]
struct Contracts {
    shipments: HashMap<ShipmentKey, ShipmentRow>,
    escrows: HashMap<ShipmentKey, EscrowRow>,
    disputes: HashMap<u64, DisputeRow>,
    next_dispute: u64,
    balances: HashMap<(Address, Address), u128>,
    allowances: HashMap<(Address, Address, Address), u128>,
    used_nonces: HashSet<(Hash32, u128)>,
    kyc: HashMap<Address, u8>,
    attestors: HashSet<Address>,
    resolvers: HashSet<Address>,
}

impl Contracts {
    fn balance(&self, token: Address, owner: Address) -> u128 {
        self.balances.get(&(token, owner)).copied().unwrap_or(0)
    }

    fn transfer(&mut self, token: Address, from: Address, to: Address, amount: u128) -> Result<(), String> {
        let available = self.balance(token, from);
        if available < amount {
            return Err("insufficient balance".into());
        }
        self.balances.insert((token, from), available - amount);
        *self.balances.entry((token, to)).or_insert(0) += amount;
        Ok(())
    }
}

#[derive(Debug)]
struct Pending {
    tx: TxHash,
    from: Address,
    call: LedgerCall,
}

#[derive(Debug)]
struct Chain {
    contracts: Contracts,
    block: u64,
    block_time: u64,
    time_offset: i64,
    auto_mine: bool,
    pending: Vec<Pending>,
    receipts: HashMap<TxHash, TxReceipt>,
    logs: Vec<LedgerEvent>,
    tx_counter: u64,
    fail_submits: u32,
    fail_calls: HashMap<&'static str, u32>,
    offline: bool,
    submissions: Vec<&'static str>,
}

impl Chain {
    fn clock(&self) -> u64 {
        let wall = Timestamp::now().unix_secs() as i64 + self.time_offset;
        self.block_time.max(wall.max(0) as u64)
    }
}

fn require(cond: bool, reason: &str) -> Result<(), String> {
    if cond {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}

/// In-process ledger. See the module docs.
#[derive(Debug)]
pub struct MockLedger {
    config: LedgerConfig,
    skew_window_secs: u64,
    cancel_window_secs: u64,
    chain: Mutex<Chain>,
}

impl MockLedger {
    /// A ledger at block 0 with the given contract addresses.
    pub fn new(config: LedgerConfig) -> Self {
        let contracts = Contracts {
            next_dispute: 1,
            ..Contracts::default()
        };
        Self {
            config,
            skew_window_secs: 900,
            cancel_window_secs: 3600,
            chain: Mutex::new(Chain {
                contracts,
                block: 0,
                block_time: Timestamp::now().unix_secs(),
                time_offset: 0,
                auto_mine: true,
                pending: Vec::new(),
                receipts: HashMap::new(),
                logs: Vec::new(),
                tx_counter: 0,
                fail_submits: 0,
                fail_calls: HashMap::new(),
                offline: false,
                submissions: Vec::new(),
            }),
        }
    }

    /// Chain 31337 with fixed contract addresses.
    pub fn local() -> Self {
        Self::new(LedgerConfig::new(
            31337,
            Address::from_bytes([0x5e; 20]),
            Address::from_bytes([0xe5; 20]),
        ))
    }

    /// Attestation timestamp window enforced by the contract.
    pub fn with_skew_window_secs(mut self, secs: u64) -> Self {
        self.skew_window_secs = secs;
        self
    }

    /// Payer cancellation window enforced by the escrow contract.
    pub fn with_cancel_window_secs(mut self, secs: u64) -> Self {
        self.cancel_window_secs = secs;
        self
    }

    /// Add an account to the attestor set.
    pub fn register_attestor(&self, account: Address) {
        self.chain.lock().contracts.attestors.insert(account);
    }

    /// Add an account to the resolver set.
    pub fn register_resolver(&self, account: Address) {
        self.chain.lock().contracts.resolvers.insert(account);
    }

    /// Credit `amount` of `token` to `owner`.
    pub fn mint(&self, token: Address, owner: Address, amount: TokenAmount) {
        let mut chain = self.chain.lock();
        *chain.contracts.balances.entry((token, owner)).or_insert(0) += amount.base_units();
    }

    /// ERC-20 balance.
    pub fn balance_of(&self, token: Address, owner: Address) -> TokenAmount {
        TokenAmount::from_base_units(self.chain.lock().contracts.balance(token, owner))
    }

    /// Role recorded by `kycAttestation`, if any.
    pub fn kyc_role(&self, account: &Address) -> Option<Role> {
        let code = self.chain.lock().contracts.kyc.get(account).copied()?;
        Role::from_ledger_code(code).ok()
    }

    /// Mine each submission into its own block immediately (default) or
    /// leave it pending.
    pub fn set_auto_mine(&self, enabled: bool) {
        self.chain.lock().auto_mine = enabled;
    }

    /// Make every call fail with [`LedgerError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.chain.lock().offline = offline;
    }

    /// Fail the next `n` submissions with [`LedgerError::Unavailable`].
    pub fn fail_next_submits(&self, n: u32) {
        self.chain.lock().fail_submits = n;
    }

    /// Fail the next `n` submissions of the contract function `name` with
    /// [`LedgerError::Unavailable`]. Other calls go through.
    pub fn fail_next_calls(&self, name: &'static str, n: u32) {
        self.chain.lock().fail_calls.insert(name, n);
    }

    /// Move the ledger clock forward.
    pub fn advance_time(&self, secs: u64) {
        self.chain.lock().time_offset += secs as i64;
    }

    /// Mine all pending transactions into one block. Returns the block
    /// number.
    pub fn mine(&self) -> u64 {
        let mut chain = self.chain.lock();
        self.mine_locked(&mut chain);
        chain.block
    }

    /// Mine `n` empty blocks.
    pub fn mine_empty(&self, n: u64) {
        let mut chain = self.chain.lock();
        for _ in 0..n {
            chain.block += 1;
            chain.block_time = chain.clock().max(chain.block_time + 1);
        }
    }

    /// Transactions waiting to be mined.
    pub fn pending_count(&self) -> usize {
        self.chain.lock().pending.len()
    }

    /// Function names of every accepted submission, in order.
    pub fn submissions(&self) -> Vec<&'static str> {
        self.chain.lock().submissions.clone()
    }

    /// Number of accepted submissions of `name`.
    pub fn submission_count(&self, name: &str) -> usize {
        self.chain
            .lock()
            .submissions
            .iter()
            .filter(|n| **n == name)
            .count()
    }

    fn mine_locked(&self, chain: &mut Chain) {
        chain.block += 1;
        chain.block_time = chain.clock().max(chain.block_time + 1);
        let block = chain.block;
        let now = chain.block_time;
        let block_time = Timestamp::from_unix_secs(now).unwrap_or_else(|_| Timestamp::now());
        let mut log_index = 0u64;

        for pending in std::mem::take(&mut chain.pending) {
            let mut next = chain.contracts.clone();
            let receipt = match self.execute(&mut next, pending.from, &pending.call, now) {
                Ok(emitted) => {
                    chain.contracts = next;
                    let mut events = Vec::with_capacity(emitted.len());
                    for (emitter, data) in emitted {
                        let (topics, bytes) = data.to_log();
                        let log = LogEntry {
                            address: emitter,
                            topics,
                            data: bytes,
                            block_number: block,
                            tx_hash: pending.tx,
                            log_index,
                        };
                        log_index += 1;
                        if let Ok(Some(event)) = LedgerEvent::from_log(&log, block_time) {
                            events.push(event);
                        }
                    }
                    chain.logs.extend(events.iter().cloned());
                    TxReceipt {
                        tx_hash: pending.tx,
                        block_number: block,
                        block_time,
                        success: true,
                        revert_reason: None,
                        events,
                    }
                }
                Err(reason) => {
                    tracing::debug!(tx = %pending.tx, call = pending.call.name(), %reason, "mock transaction reverted");
                    TxReceipt {
                        tx_hash: pending.tx,
                        block_number: block,
                        block_time,
                        success: false,
                        revert_reason: Some(reason),
                        events: Vec::new(),
                    }
                }
            };
            chain.receipts.insert(pending.tx, receipt);
        }
    }

    fn verify_attestation(
        &self,
        c: &mut Contracts,
        att: &SignedAttestation,
        now: u64,
    ) -> Result<(), String> {
        // Rebuilt with this chain's id: a payload signed for another chain
        // recovers to a different address.
        let payload = AttestationPayload {
            chain_id: self.config.chain_id,
            body: att.payload.body.clone(),
            timestamp: att.payload.timestamp,
            nonce: att.payload.nonce,
        };
        let digest = personal_message_hash(&payload.hash());
        let signer = recover_address(&digest, &att.signature).map_err(|_| "invalid signature".to_string())?;
        require(c.attestors.contains(&signer), "signer is not an attestor")?;
        require(
            payload.timestamp.unix_secs().abs_diff(now) <= self.skew_window_secs,
            "attestation timestamp outside window",
        )?;
        require(
            c.used_nonces.insert((payload.body.subject(), payload.nonce)),
            "nonce already used",
        )
    }

    fn execute(
        &self,
        c: &mut Contracts,
        from: Address,
        call: &LedgerCall,
        now: u64,
    ) -> Result<Vec<(Address, EventData)>, String> {
        let registry = self.config.shipment_contract;
        let vault = self.config.escrow_contract;
        let mut out = Vec::new();

        match call {
            LedgerCall::CreateShipment { shipment, ask_price } => {
                require(!c.shipments.contains_key(shipment), "shipment exists")?;
                require(!ask_price.is_zero(), "ask price is zero")?;
                c.shipments.insert(
                    *shipment,
                    ShipmentRow {
                        state: state::OPEN,
                        farmer: from,
                        industry: Address::ZERO,
                        transporter: Address::ZERO,
                        ask_price: ask_price.base_units(),
                    },
                );
                out.push((
                    registry,
                    EventData::ShipmentCreated {
                        shipment: *shipment,
                        farmer: from,
                        ask_price: *ask_price,
                    },
                ));
            }

            LedgerCall::SetIndustry { shipment } => {
                let row = c.shipments.get_mut(shipment).ok_or("unknown shipment")?;
                require(row.state == state::OPEN, "shipment not open")?;
                require(row.industry.is_zero(), "industry already set")?;
                require(from != row.farmer, "farmer cannot buy own shipment")?;
                row.industry = from;
                out.push((
                    registry,
                    EventData::IndustrySet {
                        shipment: *shipment,
                        industry: from,
                    },
                ));
            }

            LedgerCall::AssignTransporter {
                shipment,
                transporter,
            } => {
                let verified = c.kyc.get(transporter) == Some(&Role::Transporter.ledger_code());
                let row = c.shipments.get_mut(shipment).ok_or("unknown shipment")?;
                require(row.state == state::OPEN, "shipment not open")?;
                require(!row.industry.is_zero(), "no industry")?;
                require(from == row.farmer || from == row.industry, "not a party")?;
                require(verified, "transporter not verified")?;
                row.transporter = *transporter;
                row.state = state::ASSIGNED;
                out.push((
                    registry,
                    EventData::TransporterAssigned {
                        shipment: *shipment,
                        transporter: *transporter,
                    },
                ));
                out.push((
                    registry,
                    EventData::ShipmentStateChanged {
                        shipment: *shipment,
                        old_state: state::OPEN,
                        new_state: state::ASSIGNED,
                    },
                ));
            }

            LedgerCall::Attested(att) => {
                self.verify_attestation(c, att, now)?;
                match &att.payload.body {
                    PayloadBody::Weighment {
                        shipment,
                        weight_kg,
                        weigh_hash,
                    } => {
                        require(c.shipments.contains_key(shipment), "unknown shipment")?;
                        out.push((
                            registry,
                            EventData::WeighmentAttached {
                                shipment: *shipment,
                                weight_kg: *weight_kg,
                                weigh_hash: weigh_hash.clone(),
                            },
                        ));
                    }
                    PayloadBody::Proof {
                        shipment,
                        proof_type,
                        proof_hash,
                    } => {
                        require(c.shipments.contains_key(shipment), "unknown shipment")?;
                        out.push((
                            registry,
                            EventData::ProofAttached {
                                shipment: *shipment,
                                proof_type: proof_type.ledger_code(),
                                proof_hash: proof_hash.clone(),
                            },
                        ));
                    }
                    PayloadBody::StateUpdate {
                        shipment,
                        new_state,
                    } => {
                        let vault_status = c.escrows.get(shipment).map(|e| e.status);
                        let row = c.shipments.get_mut(shipment).ok_or("unknown shipment")?;
                        let old_state = row.state;
                        match (old_state, *new_state) {
                            (state::ASSIGNED, state::IN_TRANSIT) => require(
                                vault_status == Some(escrow_status::DEPOSITED),
                                "payment not deposited",
                            )?,
                            (state::IN_TRANSIT, state::DELIVERED)
                            | (state::DELIVERED, state::VERIFIED) => {}
                            (old, state::CANCELLED) if old <= state::VERIFIED => require(
                                !matches!(
                                    vault_status,
                                    Some(escrow_status::DEPOSITED | escrow_status::HELD)
                                ),
                                "escrow still live",
                            )?,
                            _ => return Err("invalid state transition".into()),
                        }
                        row.state = *new_state;
                        out.push((
                            registry,
                            EventData::ShipmentStateChanged {
                                shipment: *shipment,
                                old_state,
                                new_state: *new_state,
                            },
                        ));
                    }
                    PayloadBody::Kyc {
                        participant,
                        role,
                        meta_data_hash,
                    } => {
                        c.kyc.insert(*participant, role.ledger_code());
                        out.push((
                            registry,
                            EventData::KycAttested {
                                participant: *participant,
                                role: role.ledger_code(),
                                meta_data_hash: meta_data_hash.clone(),
                            },
                        ));
                    }
                }
            }

            LedgerCall::DepositPayment {
                shipment,
                token,
                amount,
                farmer,
                transporter,
                splits,
            } => {
                let row = c.shipments.get(shipment).cloned().ok_or("unknown shipment")?;
                require(row.state == state::ASSIGNED, "shipment not awaiting payment")?;
                require(from == row.industry, "only the industry can pay")?;
                require(*farmer == row.farmer, "farmer mismatch")?;
                require(*transporter == row.transporter, "transporter mismatch")?;
                require(!amount.is_zero(), "amount is zero")?;
                require(splits.validate().is_ok(), "split exceeds 10000 bps")?;
                if let Some(existing) = c.escrows.get(shipment) {
                    require(existing.status == escrow_status::REFUNDED, "escrow exists")?;
                }
                let value = amount.base_units();
                let allowance = c.allowances.get(&(*token, from, vault)).copied().unwrap_or(0);
                require(allowance >= value, "insufficient allowance")?;
                c.transfer(*token, from, vault, value)?;
                c.allowances.insert((*token, from, vault), allowance - value);
                c.escrows.insert(
                    *shipment,
                    EscrowRow {
                        token: *token,
                        amount: value,
                        payer: from,
                        farmer: *farmer,
                        transporter: *transporter,
                        splits: *splits,
                        status: escrow_status::DEPOSITED,
                        deposited_at: now,
                    },
                );
                out.push((
                    vault,
                    EventData::PaymentDeposited {
                        shipment: *shipment,
                        payer: from,
                        amount: *amount,
                    },
                ));
            }

            LedgerCall::HoldPayment { shipment } => {
                let privileged = c.attestors.contains(&from) || c.resolvers.contains(&from);
                let escrow = c.escrows.get_mut(shipment).ok_or("no escrow")?;
                require(escrow.status == escrow_status::DEPOSITED, "escrow not deposited")?;
                require(privileged, "not authorized")?;
                escrow.status = escrow_status::HELD;
                out.push((vault, EventData::PaymentHeld { shipment: *shipment }));
            }

            LedgerCall::ReleasePayment { shipment } => {
                let escrow = c.escrows.get(shipment).cloned().ok_or("no escrow")?;
                require(escrow.is_live(), "escrow not live")?;
                let row = c.shipments.get(shipment).cloned().ok_or("unknown shipment")?;
                let by_farmer = from == row.farmer && row.state == state::VERIFIED;
                let by_resolver = c.resolvers.contains(&from) && row.state == state::DISPUTED;
                require(by_farmer || by_resolver, "not authorized")?;

                let payout = escrow.splits.apply(TokenAmount::from_base_units(escrow.amount));
                c.transfer(escrow.token, vault, escrow.farmer, payout.farmer.base_units())?;
                c.transfer(escrow.token, vault, escrow.transporter, payout.transporter.base_units())?;
                c.transfer(escrow.token, vault, escrow.payer, payout.residual.base_units())?;
                // Platform share stays in the vault.
                if let Some(e) = c.escrows.get_mut(shipment) {
                    e.status = escrow_status::RELEASED;
                }
                out.push((
                    vault,
                    EventData::PaymentReleased {
                        shipment: *shipment,
                        amount: TokenAmount::from_base_units(escrow.amount),
                    },
                ));
                if by_farmer {
                    if let Some(r) = c.shipments.get_mut(shipment) {
                        r.state = state::PAID;
                    }
                    out.push((
                        registry,
                        EventData::ShipmentStateChanged {
                            shipment: *shipment,
                            old_state: state::VERIFIED,
                            new_state: state::PAID,
                        },
                    ));
                }
            }

            LedgerCall::RefundPayment { shipment } => {
                let escrow = c.escrows.get(shipment).cloned().ok_or("no escrow")?;
                require(escrow.is_live(), "escrow not live")?;
                let row = c.shipments.get(shipment).cloned().ok_or("unknown shipment")?;
                require(c.resolvers.contains(&from), "not authorized")?;
                require(row.state == state::DISPUTED, "shipment not disputed")?;
                c.transfer(escrow.token, vault, escrow.payer, escrow.amount)?;
                if let Some(e) = c.escrows.get_mut(shipment) {
                    e.status = escrow_status::REFUNDED;
                }
                out.push((
                    vault,
                    EventData::PaymentRefunded {
                        shipment: *shipment,
                        amount: TokenAmount::from_base_units(escrow.amount),
                    },
                ));
            }

            LedgerCall::CancelByPayer { shipment } => {
                let escrow = c.escrows.get(shipment).cloned().ok_or("no escrow")?;
                require(escrow.status == escrow_status::DEPOSITED, "escrow not deposited")?;
                require(from == escrow.payer, "not the payer")?;
                require(
                    now <= escrow.deposited_at + self.cancel_window_secs,
                    "cancellation window closed",
                )?;
                c.transfer(escrow.token, vault, escrow.payer, escrow.amount)?;
                if let Some(e) = c.escrows.get_mut(shipment) {
                    e.status = escrow_status::REFUNDED;
                }
                out.push((
                    vault,
                    EventData::PaymentRefunded {
                        shipment: *shipment,
                        amount: TokenAmount::from_base_units(escrow.amount),
                    },
                ));
            }

            LedgerCall::RaiseDispute { shipment, reason } => {
                let verified = c.kyc.contains_key(&from);
                let row = c.shipments.get_mut(shipment).ok_or("unknown shipment")?;
                require(row.state <= state::VERIFIED, "shipment not disputable")?;
                require(
                    row.state != state::OPEN || !row.industry.is_zero(),
                    "shipment has no counterparty",
                )?;
                require(row.is_party(&from), "not a participant")?;
                require(verified, "participant not verified")?;
                require(!reason.trim().is_empty(), "empty reason")?;
                let old_state = row.state;
                row.state = state::DISPUTED;
                let id = c.next_dispute;
                c.next_dispute += 1;
                c.disputes.insert(
                    id,
                    DisputeRow {
                        shipment: *shipment,
                        status: DISPUTE_OPEN,
                    },
                );
                out.push((
                    registry,
                    EventData::DisputeRaised {
                        dispute: DisputeId::new(id),
                        shipment: *shipment,
                        raised_by: from,
                    },
                ));
                out.push((
                    registry,
                    EventData::ShipmentStateChanged {
                        shipment: *shipment,
                        old_state,
                        new_state: state::DISPUTED,
                    },
                ));
            }

            LedgerCall::AddEvidence {
                dispute,
                evidence_hash,
            } => {
                let row = c.disputes.get(&dispute.value()).cloned().ok_or("unknown dispute")?;
                require(row.status == DISPUTE_OPEN, "dispute closed")?;
                let party = c
                    .shipments
                    .get(&row.shipment)
                    .map(|s| s.is_party(&from))
                    .unwrap_or(false);
                require(party || c.resolvers.contains(&from), "not authorized")?;
                require(!evidence_hash.trim().is_empty(), "empty evidence")?;
                out.push((
                    registry,
                    EventData::EvidenceAdded {
                        dispute: *dispute,
                        submitter: from,
                        evidence_hash: evidence_hash.clone(),
                    },
                ));
            }

            LedgerCall::ResolveDispute {
                dispute,
                resolution,
                ..
            } => {
                require(c.resolvers.contains(&from), "not a resolver")?;
                require(*resolution <= 1, "invalid resolution")?;
                let row = c.disputes.get_mut(&dispute.value()).ok_or("unknown dispute")?;
                require(row.status == DISPUTE_OPEN, "dispute closed")?;
                row.status = DISPUTE_RESOLVED;
                out.push((
                    registry,
                    EventData::DisputeResolved {
                        dispute: *dispute,
                        resolution: *resolution,
                    },
                ));
            }

            LedgerCall::RejectDispute { dispute, .. } => {
                require(c.resolvers.contains(&from), "not a resolver")?;
                let row = c.disputes.get_mut(&dispute.value()).ok_or("unknown dispute")?;
                require(row.status == DISPUTE_OPEN, "dispute closed")?;
                row.status = DISPUTE_REJECTED;
                out.push((registry, EventData::DisputeRejected { dispute: *dispute }));
            }

            LedgerCall::Approve {
                token,
                spender,
                amount,
            } => {
                c.allowances
                    .insert((*token, from, *spender), amount.base_units());
                out.push((
                    *token,
                    EventData::Approval {
                        owner: from,
                        spender: *spender,
                        amount: *amount,
                    },
                ));
            }
        }

        Ok(out)
    }

    fn ensure_online(chain: &Chain) -> Result<(), LedgerError> {
        if chain.offline {
            return Err(LedgerError::Unavailable("mock ledger offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, LedgerError> {
        let mut chain = self.chain.lock();
        Self::ensure_online(&chain)?;
        if chain.fail_submits > 0 {
            chain.fail_submits -= 1;
            return Err(LedgerError::Unavailable("injected submit failure".into()));
        }
        if let Some(left) = chain.fail_calls.get_mut(call.name()).filter(|n| **n > 0) {
            *left -= 1;
            return Err(LedgerError::Unavailable(format!("injected {} failure", call.name())));
        }

        let now = chain.clock();
        let mut scratch = chain.contracts.clone();
        if let Err(reason) = self.execute(&mut scratch, from, &call, now) {
            return Err(LedgerError::Rejected {
                call: call.name(),
                reason,
            });
        }

        chain.tx_counter += 1;
        let mut preimage = chain.tx_counter.to_be_bytes().to_vec();
        preimage.extend_from_slice(from.as_bytes());
        preimage.extend_from_slice(&call.encode());
        let tx = TxHash::from_hash(keccak256(&preimage));

        tracing::debug!(%tx, call = call.name(), %from, "mock transaction submitted");
        chain.submissions.push(call.name());
        chain.pending.push(Pending { tx, from, call });
        if chain.auto_mine {
            self.mine_locked(&mut chain);
        }
        Ok(tx)
    }

    async fn receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, LedgerError> {
        let chain = self.chain.lock();
        Self::ensure_online(&chain)?;
        Ok(chain.receipts.get(tx).cloned())
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        let chain = self.chain.lock();
        Self::ensure_online(&chain)?;
        Ok(chain.block)
    }

    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<LedgerEvent>, LedgerError> {
        let chain = self.chain.lock();
        Self::ensure_online(&chain)?;
        let sources = self.config.log_sources();
        let from = LedgerPosition::new(from_block, 0);
        Ok(chain
            .logs
            .iter()
            .filter(|e| e.position >= from && e.position.block <= to_block)
            .filter(|e| sources.contains(&e.emitter))
            .cloned()
            .collect())
    }

    async fn shipment(&self, key: &ShipmentKey) -> Result<Option<OnChainShipment>, LedgerError> {
        let chain = self.chain.lock();
        Self::ensure_online(&chain)?;
        Ok(chain.contracts.shipments.get(key).map(|row| OnChainShipment {
            shipment: *key,
            state: row.state,
            farmer: row.farmer,
            industry: row.industry,
            transporter: row.transporter,
            ask_price: TokenAmount::from_base_units(row.ask_price),
        }))
    }

    async fn escrow(&self, key: &ShipmentKey) -> Result<Option<OnChainEscrow>, LedgerError> {
        let chain = self.chain.lock();
        Self::ensure_online(&chain)?;
        Ok(chain.contracts.escrows.get(key).map(|row| OnChainEscrow {
            shipment: *key,
            token: row.token,
            amount: TokenAmount::from_base_units(row.amount),
            payer: row.payer,
            splits: row.splits,
            status: row.status,
            deposited_at: Timestamp::from_unix_secs(row.deposited_at).unwrap_or_else(|_| Timestamp::now()),
        }))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<TokenAmount, LedgerError> {
        let chain = self.chain.lock();
        Self::ensure_online(&chain)?;
        Ok(TokenAmount::from_base_units(
            chain
                .contracts
                .allowances
                .get(&(token, owner, spender))
                .copied()
                .unwrap_or(0),
        ))
    }
}
