//! # Escrow Coordinator
//!
//! Deposits, holds, releases, and refunds of a shipment's payment.
//!
//! A deposit is checked locally first: the split, the amount against the
//! ask price, the shipment's status and parties, and that no live escrow
//! exists. Then the payer's allowance for the escrow contract decides the
//! path:
//!
//! - Sufficient: `depositPayment` is submitted at once.
//! - Short: `approve` is submitted and a [`DepositIntent`] is stored under
//!   the approve transaction. When the projector observes the matching
//!   `Approval` event, [`EscrowCoordinator`] (as an [`EventObserver`])
//!   submits the deposit.
//!
//! Either way the escrow record itself is written by the projector when
//! `PaymentDeposited` arrives; that is also what moves the shipment to
//! ReadyForPickup and queues the attested IN_TRANSIT update.

use std::sync::Arc;

use agx_arbitration::{DepositTerms, EscrowRecord};
use agx_core::{Actor, Address, Role, ShipmentKey, SplitBps, Timestamp, TokenAmount, TxHash};
use agx_ledger::{EventData, LedgerCall, LedgerEvent};
use agx_state::{check, GuardContext, RejectionReason, ShipmentAction, ShipmentStatus};
use agx_sync::{DepositIntent, EventObserver, IntentStage, SyncError};
use async_trait::async_trait;

use crate::error::CoordinatorError;
use crate::services::Services;

/// What the payer asks to deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRequest {
    /// Shipment being paid for.
    pub shipment: ShipmentKey,
    /// ERC-20 token.
    pub token: Address,
    /// Amount in base units; must equal the ask price.
    pub amount: TokenAmount,
    /// Farmer payout account.
    pub farmer: Address,
    /// Transporter payout account.
    pub transporter: Address,
    /// Payout split.
    pub splits: SplitBps,
}

/// How far a deposit got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    /// The allowance was short; `approve` was submitted and the deposit
    /// follows once it is observed.
    AwaitingApproval {
        /// The approve transaction.
        approve_tx: TxHash,
    },
    /// `depositPayment` was submitted and mined.
    Submitted {
        /// The deposit transaction.
        deposit_tx: TxHash,
        /// Block that included it.
        block: u64,
    },
}

/// A mined escrow operation.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// The transaction.
    pub tx: TxHash,
    /// Block that included it.
    pub block: u64,
    /// The escrow record after the local update.
    pub escrow: EscrowRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payout {
    Release,
    Refund,
}

/// Escrow operations and the deferred-deposit observer.
#[derive(Debug)]
pub struct EscrowCoordinator {
    services: Arc<Services>,
}

impl EscrowCoordinator {
    /// A coordinator over `services`.
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Start a deposit on behalf of the shipment's industry.
    #[tracing::instrument(skip_all, fields(shipment = %request.shipment, payer = %payer.address, amount = %request.amount))]
    pub async fn deposit(&self, payer: &Actor, request: DepositRequest) -> Result<DepositOutcome, CoordinatorError> {
        const ACTION: &str = "deposit";
        let terms = DepositTerms {
            shipment: request.shipment,
            token: request.token,
            amount: request.amount,
            payer: payer.address,
            farmer: request.farmer,
            transporter: request.transporter,
            splits: request.splits,
        };
        terms
            .validate()
            .map_err(|e| CoordinatorError::arbitration(ACTION, e))?;

        let key = terms.shipment;
        let _flight = self.services.in_flight.acquire(key, ACTION)?;
        let shipment = self.services.shipment(&key).await?;
        if payer.role != Role::Industry || shipment.industry_id.as_ref() != Some(&payer.profile_id) {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongActor,
                ACTION,
                "only the shipment's industry pays into escrow",
            ));
        }
        if shipment.status != ShipmentStatus::AwaitingPayment {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongState,
                ACTION,
                format!("requires {}, shipment is {}", ShipmentStatus::AwaitingPayment, shipment.status),
            ));
        }
        if terms.amount != shipment.ask_price {
            return Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                ACTION,
                format!("amount {} does not match ask price {}", terms.amount, shipment.ask_price),
            ));
        }
        if terms.farmer != shipment.farmer_address || Some(terms.transporter) != shipment.transporter {
            return Err(CoordinatorError::rejected(
                RejectionReason::PreconditionNotMet,
                ACTION,
                "payout accounts do not match the shipment's farmer and carrier",
            ));
        }
        let existing = self.services.store.escrow(&key).await?;
        EscrowRecord::ensure_replaceable(existing.as_ref(), &key)
            .map_err(|e| CoordinatorError::arbitration(ACTION, e))?;

        let escrow_contract = self.services.ledger.escrow_address();
        let allowance = self
            .services
            .ledger
            .allowance(terms.token, terms.payer, escrow_contract)
            .await
            .map_err(|e| CoordinatorError::ledger("allowance", e))?;

        match self.services.store.deposit_intent(&key).await? {
            Some(DepositIntent {
                stage: IntentStage::Submitted { deposit_tx },
                ..
            }) => {
                return Err(CoordinatorError::rejected(
                    RejectionReason::PreconditionNotMet,
                    ACTION,
                    format!("deposit {deposit_tx} already submitted"),
                ))
            }
            Some(DepositIntent {
                stage: IntentStage::AwaitingApproval { approve_tx },
                ..
            }) if allowance < terms.amount => {
                return Err(CoordinatorError::rejected(
                    RejectionReason::PreconditionNotMet,
                    ACTION,
                    format!("waiting for approval {approve_tx}"),
                ))
            }
            _ => {}
        }

        let requested_at = Timestamp::now();
        if allowance < terms.amount {
            let approve_tx = self
                .services
                .submit(
                    terms.payer,
                    LedgerCall::Approve {
                        token: terms.token,
                        spender: escrow_contract,
                        amount: terms.amount,
                    },
                )
                .await?;
            self.services
                .store
                .save_deposit_intent(&DepositIntent {
                    terms,
                    stage: IntentStage::AwaitingApproval { approve_tx },
                    requested_at,
                })
                .await?;
            tracing::info!(%approve_tx, allowance = %allowance, "allowance short, approval submitted");
            return Ok(DepositOutcome::AwaitingApproval { approve_tx });
        }

        let deposit_tx = self.services.submit(terms.payer, deposit_call(&terms)).await?;
        self.services
            .store
            .save_deposit_intent(&DepositIntent {
                terms,
                stage: IntentStage::Submitted { deposit_tx },
                requested_at,
            })
            .await?;
        match self.services.confirm("depositPayment", &deposit_tx).await {
            Ok(receipt) => Ok(DepositOutcome::Submitted {
                deposit_tx,
                block: receipt.block_number,
            }),
            Err(e @ (CoordinatorError::LedgerRejected { .. } | CoordinatorError::Signature(_))) => {
                self.services.store.remove_deposit_intent(&key).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Freeze a deposited escrow. Resolvers and attestors only.
    #[tracing::instrument(skip_all, fields(shipment = %key, actor = %actor.address))]
    pub async fn hold(&self, actor: &Actor, key: &ShipmentKey) -> Result<Settlement, CoordinatorError> {
        if !matches!(actor.role, Role::Resolver | Role::Attestor) {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongActor,
                "hold",
                format!("{} may not hold escrow", actor.role),
            ));
        }
        let _flight = self.services.in_flight.acquire(*key, "hold")?;
        self.hold_as(actor.address, key).await
    }

    /// Pay the escrow out by its split.
    ///
    /// The farmer claims a verified shipment; a resolver releases a
    /// disputed one. A second release fails before anything is submitted.
    #[tracing::instrument(skip_all, fields(shipment = %key, actor = %actor.address))]
    pub async fn release(&self, actor: &Actor, key: &ShipmentKey) -> Result<Settlement, CoordinatorError> {
        const ACTION: &str = "release";
        let _flight = self.services.in_flight.acquire(*key, ACTION)?;
        let shipment = self.services.shipment(key).await?;
        if let Some(escrow) = self.services.store.escrow(key).await? {
            escrow
                .can_release()
                .map_err(|e| CoordinatorError::arbitration(ACTION, e))?;
        }

        if actor.role == Role::Resolver {
            require_disputed(ACTION, shipment.status)?;
            return self.payout_as(actor.address, key, Payout::Release).await;
        }

        let facts = self.services.escrow_facts(key).await?;
        let plan = check(&shipment, &ShipmentAction::Claim, &GuardContext::new(actor).escrow(facts))?;
        let tx = self
            .services
            .submit_transition(key, actor.address, LedgerCall::ReleasePayment { shipment: *key })
            .await?;
        let at = Timestamp::now();
        self.services
            .update_shipment(key, |s| {
                s.push_tentative(plan.to, tx, at, "payment claimed");
                true
            })
            .await?;
        let receipt = self.services.settle_transition(key, "releasePayment", tx).await?;
        let escrow = self
            .services
            .update_escrow(key, |e| e.release(receipt.block_time, Some(tx)).is_ok())
            .await?;
        tracing::info!(%tx, "payment claimed");
        Ok(Settlement {
            tx,
            block: receipt.block_number,
            escrow,
        })
    }

    /// Return a disputed shipment's escrow to the payer. Resolvers only.
    #[tracing::instrument(skip_all, fields(shipment = %key, actor = %actor.address))]
    pub async fn refund(&self, actor: &Actor, key: &ShipmentKey) -> Result<Settlement, CoordinatorError> {
        const ACTION: &str = "refund";
        if actor.role != Role::Resolver {
            return Err(CoordinatorError::rejected(
                RejectionReason::WrongActor,
                ACTION,
                "only a resolver may refund",
            ));
        }
        let _flight = self.services.in_flight.acquire(*key, ACTION)?;
        let shipment = self.services.shipment(key).await?;
        require_disputed(ACTION, shipment.status)?;
        self.payout_as(actor.address, key, Payout::Refund).await
    }

    /// The payer takes the deposit back inside the cancellation window.
    /// The shipment keeps its status and may be cancelled afterwards.
    #[tracing::instrument(skip_all, fields(shipment = %key, payer = %payer.address))]
    pub async fn cancel_by_payer(&self, payer: &Actor, key: &ShipmentKey) -> Result<Settlement, CoordinatorError> {
        const ACTION: &str = "cancel_by_payer";
        let _flight = self.services.in_flight.acquire(*key, ACTION)?;
        let escrow = self.load(key).await?;
        let window = self.services.config.cancel_window_secs;
        let now = Timestamp::now();
        escrow
            .can_cancel_by_payer(&payer.address, now, window)
            .map_err(|e| CoordinatorError::arbitration(ACTION, e))?;

        let call = LedgerCall::CancelByPayer { shipment: *key };
        let name = call.name();
        let tx = self.services.submit(payer.address, call).await?;
        let receipt = self.services.confirm(name, &tx).await?;
        let escrow = self
            .services
            .update_escrow(key, |e| e.cancel_by_payer(&payer.address, now, window, Some(tx)).is_ok())
            .await?;
        tracing::info!(%tx, "deposit cancelled by payer");
        Ok(Settlement {
            tx,
            block: receipt.block_number,
            escrow,
        })
    }

    /// Hold from `from` without the actor checks; disputes hold through the
    /// operator account.
    pub(crate) async fn hold_as(&self, from: Address, key: &ShipmentKey) -> Result<Settlement, CoordinatorError> {
        let escrow = self.load(key).await?;
        escrow
            .can_hold()
            .map_err(|e| CoordinatorError::arbitration("hold", e))?;
        let tx = self.services.submit(from, LedgerCall::HoldPayment { shipment: *key }).await?;
        let receipt = self.services.confirm("holdPayment", &tx).await?;
        let escrow = self
            .services
            .update_escrow(key, |e| e.hold(receipt.block_time).is_ok())
            .await?;
        tracing::info!(shipment = %key, %tx, "escrow held");
        Ok(Settlement {
            tx,
            block: receipt.block_number,
            escrow,
        })
    }

    /// Release the escrow to the parties.
    pub(crate) async fn release_as(&self, from: Address, key: &ShipmentKey) -> Result<Settlement, CoordinatorError> {
        self.payout_as(from, key, Payout::Release).await
    }

    /// Refund the escrow to the payer.
    pub(crate) async fn refund_as(&self, from: Address, key: &ShipmentKey) -> Result<Settlement, CoordinatorError> {
        self.payout_as(from, key, Payout::Refund).await
    }

    async fn payout_as(&self, from: Address, key: &ShipmentKey, payout: Payout) -> Result<Settlement, CoordinatorError> {
        let escrow = self.load(key).await?;
        let (action, call) = match payout {
            Payout::Release => ("release", LedgerCall::ReleasePayment { shipment: *key }),
            Payout::Refund => ("refund", LedgerCall::RefundPayment { shipment: *key }),
        };
        match payout {
            Payout::Release => escrow.can_release(),
            Payout::Refund => escrow.can_refund(),
        }
        .map_err(|e| CoordinatorError::arbitration(action, e))?;

        let name = call.name();
        let tx = self.services.submit(from, call).await?;
        let receipt = self.services.confirm(name, &tx).await?;
        let escrow = self
            .services
            .update_escrow(key, |e| match payout {
                Payout::Release => e.release(receipt.block_time, Some(tx)).is_ok(),
                Payout::Refund => e.refund(receipt.block_time, Some(tx)).is_ok(),
            })
            .await?;
        tracing::info!(shipment = %key, %tx, status = escrow.status.as_str(), "escrow settled");
        Ok(Settlement {
            tx,
            block: receipt.block_number,
            escrow,
        })
    }

    async fn load(&self, key: &ShipmentKey) -> Result<EscrowRecord, CoordinatorError> {
        self.services
            .store
            .escrow(key)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                kind: "escrow",
                key: key.to_string(),
            })
    }
}

fn deposit_call(terms: &DepositTerms) -> LedgerCall {
    LedgerCall::DepositPayment {
        shipment: terms.shipment,
        token: terms.token,
        amount: terms.amount,
        farmer: terms.farmer,
        transporter: terms.transporter,
        splits: terms.splits,
    }
}

fn require_disputed(action: &'static str, status: ShipmentStatus) -> Result<(), CoordinatorError> {
    if status == ShipmentStatus::Disputed {
        return Ok(());
    }
    Err(CoordinatorError::rejected(
        RejectionReason::WrongState,
        action,
        format!("requires {}, shipment is {status}", ShipmentStatus::Disputed),
    ))
}

#[async_trait]
impl EventObserver for EscrowCoordinator {
    async fn observe(&self, event: &LedgerEvent) -> Result<(), SyncError> {
        let EventData::Approval { owner, spender, amount } = &event.data else {
            return Ok(());
        };
        let Some(intent) = self.services.store.intent_for_approval(event.tx_hash()).await? else {
            return Ok(());
        };
        let key = *intent.shipment();
        if *spender != self.services.ledger.escrow_address()
            || *owner != intent.terms.payer
            || *amount < intent.terms.amount
        {
            tracing::warn!(shipment = %key, approval = %event.id, "approval does not cover the deposit");
            return Ok(());
        }

        match self
            .services
            .ledger
            .submit(intent.terms.payer, deposit_call(&intent.terms))
            .await
        {
            Ok(deposit_tx) => {
                self.services
                    .store
                    .save_deposit_intent(&DepositIntent {
                        stage: IntentStage::Submitted { deposit_tx },
                        ..intent
                    })
                    .await?;
                tracing::info!(shipment = %key, %deposit_tx, "approval observed, deposit submitted");
                Ok(())
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(shipment = %key, error = %e, "deferred deposit not submitted; deposit again to resume");
                Err(e.into())
            }
            Err(e) => {
                tracing::error!(shipment = %key, error = %e, "deferred deposit rejected");
                self.services.store.remove_deposit_intent(&key).await?;
                Err(e.into())
            }
        }
    }
}
