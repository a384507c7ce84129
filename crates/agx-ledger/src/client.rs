//! # Ledger Client Trait
//!
//! Submission returns as soon as the node hands back a transaction hash.
//! That is "submitted", not "confirmed": callers record a tentative
//! timeline entry and either wait for a receipt with [`wait_for_receipt`]
//! or let the event projector confirm the entry when the matching log
//! arrives.

use std::time::{Duration, Instant};

use agx_core::{Address, ShipmentKey, SplitBps, Timestamp, TokenAmount, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::call::LedgerCall;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::event::LedgerEvent;

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Containing block.
    pub block_number: u64,
    /// Block timestamp.
    pub block_time: Timestamp,
    /// `status == 1`.
    pub success: bool,
    /// Revert reason when the node reports one.
    pub revert_reason: Option<String>,
    /// Decoded logs emitted by the transaction.
    pub events: Vec<LedgerEvent>,
}

/// `getShipment` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainShipment {
    /// Shipment key.
    pub shipment: ShipmentKey,
    /// Ledger state code.
    pub state: u8,
    /// Farmer account.
    pub farmer: Address,
    /// Industry account, zero when unset.
    pub industry: Address,
    /// Transporter account, zero when unset.
    pub transporter: Address,
    /// Asking price.
    pub ask_price: TokenAmount,
}

/// `getEscrow` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainEscrow {
    /// Shipment key.
    pub shipment: ShipmentKey,
    /// ERC-20 token.
    pub token: Address,
    /// Escrowed amount.
    pub amount: TokenAmount,
    /// Depositing account.
    pub payer: Address,
    /// Payout split.
    pub splits: SplitBps,
    /// 1 deposited, 2 held, 3 released, 4 refunded.
    pub status: u8,
    /// Deposit block time.
    pub deposited_at: Timestamp,
}

/// Confirmation policy for [`wait_for_receipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolicy {
    /// Give up after this long.
    pub timeout: Duration,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Required depth, counting the inclusion block.
    pub confirmations: u64,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            confirmations: 1,
        }
    }
}

/// Access to the shipment and escrow contracts.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Contract addresses and chain parameters.
    fn config(&self) -> &LedgerConfig;

    /// EVM chain id.
    fn chain_id(&self) -> u64 {
        self.config().chain_id
    }

    /// Escrow contract address, the spender for deposit allowances.
    fn escrow_address(&self) -> Address {
        self.config().escrow_contract
    }

    /// Submit `call` from `from`. Returns once the node accepted it.
    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, LedgerError>;

    /// Receipt of a mined transaction, `None` while pending.
    async fn receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, LedgerError>;

    /// Latest block number.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Decoded events from all configured log sources in `from..=to`.
    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<LedgerEvent>, LedgerError>;

    /// `getShipment`, `None` if never created.
    async fn shipment(&self, key: &ShipmentKey) -> Result<Option<OnChainShipment>, LedgerError>;

    /// `getEscrow`, `None` if never deposited.
    async fn escrow(&self, key: &ShipmentKey) -> Result<Option<OnChainEscrow>, LedgerError>;

    /// ERC-20 `allowance(owner, spender)`.
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<TokenAmount, LedgerError>;
}

/// Poll for a receipt until it is `policy.confirmations` deep.
///
/// Transient read failures are retried until the deadline. A reverted
/// receipt is returned as [`LedgerError::Reverted`].
pub async fn wait_for_receipt(
    client: &dyn LedgerClient,
    tx: &TxHash,
    policy: ReceiptPolicy,
) -> Result<TxReceipt, LedgerError> {
    let started = Instant::now();
    loop {
        match client.receipt(tx).await {
            Ok(Some(receipt)) => {
                if !receipt.success {
                    return Err(LedgerError::Reverted {
                        tx: *tx,
                        reason: receipt
                            .revert_reason
                            .clone()
                            .unwrap_or_else(|| "execution reverted".to_string()),
                    });
                }
                let head = client.block_number().await.unwrap_or(receipt.block_number);
                let depth = head.saturating_sub(receipt.block_number) + 1;
                if depth >= policy.confirmations.max(1) {
                    return Ok(receipt);
                }
            }
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!(%tx, error = %e, "receipt poll failed, retrying");
            }
            Err(e) => return Err(e),
        }

        if started.elapsed() >= policy.timeout {
            return Err(LedgerError::Timeout {
                operation: format!("receipt for {tx}"),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(policy.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLedger;
    use agx_core::ShipmentRef;

    fn fast() -> ReceiptPolicy {
        ReceiptPolicy {
            timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(5),
            confirmations: 1,
        }
    }

    #[tokio::test]
    async fn receipt_after_auto_mine() {
        let ledger = MockLedger::local();
        let farmer = Address::from_bytes([0x11; 20]);
        let tx = ledger
            .submit(
                farmer,
                LedgerCall::CreateShipment {
                    shipment: ShipmentRef::new("SHP-R").unwrap().key(),
                    ask_price: TokenAmount::from_base_units(100),
                },
            )
            .await
            .unwrap();
        let receipt = wait_for_receipt(&ledger, &tx, fast()).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.events.len(), 1);
    }

    #[tokio::test]
    async fn unmined_transaction_times_out() {
        let ledger = MockLedger::local();
        ledger.set_auto_mine(false);
        let tx = ledger
            .submit(
                Address::from_bytes([0x11; 20]),
                LedgerCall::CreateShipment {
                    shipment: ShipmentRef::new("SHP-T").unwrap().key(),
                    ask_price: TokenAmount::from_base_units(100),
                },
            )
            .await
            .unwrap();
        let err = wait_for_receipt(&ledger, &tx, fast()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout { .. }));

        ledger.mine();
        assert!(wait_for_receipt(&ledger, &tx, fast()).await.is_ok());
    }

    #[tokio::test]
    async fn confirmations_wait_for_depth() {
        let ledger = MockLedger::local();
        let tx = ledger
            .submit(
                Address::from_bytes([0x11; 20]),
                LedgerCall::CreateShipment {
                    shipment: ShipmentRef::new("SHP-D").unwrap().key(),
                    ask_price: TokenAmount::from_base_units(1),
                },
            )
            .await
            .unwrap();
        let deep = ReceiptPolicy {
            confirmations: 3,
            ..fast()
        };
        assert!(wait_for_receipt(&ledger, &tx, deep).await.is_err());
        ledger.mine_empty(2);
        assert!(wait_for_receipt(&ledger, &tx, deep).await.is_ok());
    }
}
