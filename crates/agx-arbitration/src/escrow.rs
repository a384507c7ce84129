//! # Escrow Accounts
//!
//! One escrow per shipment, keyed by the shipment's ledger key. The payer
//! (the buyer) deposits the ask price; on release the amount is split
//! between producer, carrier, and platform by basis points, with any
//! unallocated remainder returned to the payer.
//!
//! ## Security Invariant
//!
//! Every operation checks the current status first. `Released` and
//! `Refunded` reject all further operations, so a second release fails
//! before anything is submitted to the ledger.

use agx_core::{Address, ShipmentKey, SplitAmounts, SplitBps, Timestamp, TokenAmount, TxHash};
use serde::{Deserialize, Serialize};

use crate::error::ArbitrationError;

/// The status of an escrow account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Funds deposited.
    Deposited,
    /// Funds frozen while a dispute is open.
    Held,
    /// Funds paid out. Terminal.
    Released,
    /// Funds returned to the payer. Terminal.
    Refunded,
}

impl EscrowStatus {
    /// Whether no further operation is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    /// Deposited or Held.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Deposited | Self::Held)
    }

    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposited => "DEPOSITED",
            Self::Held => "HELD",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a deposit commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTerms {
    /// Shipment being paid for.
    pub shipment: ShipmentKey,
    /// ERC-20 token.
    pub token: Address,
    /// Amount in base units.
    pub amount: TokenAmount,
    /// Payer account.
    pub payer: Address,
    /// Producer payout account.
    pub farmer: Address,
    /// Carrier payout account.
    pub transporter: Address,
    /// Payout split.
    pub splits: SplitBps,
}

impl DepositTerms {
    /// Local validation run before any ledger call.
    pub fn validate(&self) -> Result<(), ArbitrationError> {
        self.splits.validate()?;
        if self.amount.is_zero() {
            return Err(ArbitrationError::ZeroAmount);
        }
        Ok(())
    }
}

/// An escrow account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    /// Deposit terms.
    pub terms: DepositTerms,
    /// Current status.
    pub status: EscrowStatus,
    /// When the deposit was confirmed.
    pub deposited_at: Timestamp,
    /// Last change.
    pub updated_at: Timestamp,
    /// Deposit transaction.
    pub deposit_tx: Option<TxHash>,
    /// Release or refund transaction.
    pub settlement_tx: Option<TxHash>,
    /// Compare-and-swap token.
    pub version: u64,
}

impl EscrowRecord {
    /// A freshly deposited escrow.
    pub fn deposited(
        terms: DepositTerms,
        at: Timestamp,
        deposit_tx: Option<TxHash>,
    ) -> Result<Self, ArbitrationError> {
        terms.validate()?;
        Ok(Self {
            terms,
            status: EscrowStatus::Deposited,
            deposited_at: at,
            updated_at: at,
            deposit_tx,
            settlement_tx: None,
            version: 0,
        })
    }

    /// A new deposit is allowed only when there is no escrow or the
    /// previous one was refunded.
    pub fn ensure_replaceable(
        existing: Option<&EscrowRecord>,
        shipment: &ShipmentKey,
    ) -> Result<(), ArbitrationError> {
        match existing {
            None => Ok(()),
            Some(e) if e.status == EscrowStatus::Refunded => Ok(()),
            Some(e) => Err(ArbitrationError::EscrowExists {
                shipment: shipment.to_string(),
                status: e.status.as_str().to_string(),
            }),
        }
    }

    /// Shipment key.
    pub fn shipment(&self) -> &ShipmentKey {
        &self.terms.shipment
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[EscrowStatus],
    ) -> Result<(), ArbitrationError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(ArbitrationError::InvalidEscrowOperation {
                shipment: self.terms.shipment.to_string(),
                operation,
                status: self.status.as_str().to_string(),
            })
        }
    }

    /// Check that `hold` is allowed.
    pub fn can_hold(&self) -> Result<(), ArbitrationError> {
        self.require("hold", &[EscrowStatus::Deposited])
    }

    /// Check that `release` is allowed.
    pub fn can_release(&self) -> Result<(), ArbitrationError> {
        self.require("release", &[EscrowStatus::Deposited, EscrowStatus::Held])
    }

    /// Check that `refund` is allowed.
    pub fn can_refund(&self) -> Result<(), ArbitrationError> {
        self.require("refund", &[EscrowStatus::Deposited, EscrowStatus::Held])
    }

    /// Check that the payer may cancel at `now` given a window of
    /// `window_secs` from the deposit.
    pub fn can_cancel_by_payer(
        &self,
        caller: &Address,
        now: Timestamp,
        window_secs: u64,
    ) -> Result<(), ArbitrationError> {
        self.require("cancel_by_payer", &[EscrowStatus::Deposited])?;
        if *caller != self.terms.payer {
            return Err(ArbitrationError::NotPayer {
                shipment: self.terms.shipment.to_string(),
                caller: caller.to_string(),
            });
        }
        let closes = self
            .deposited_at
            .plus_secs(i64::try_from(window_secs).unwrap_or(i64::MAX));
        if now > closes {
            return Err(ArbitrationError::CancellationWindowClosed {
                shipment: self.terms.shipment.to_string(),
                window_secs,
                closed_at: closes.to_string(),
            });
        }
        Ok(())
    }

    /// Deposited → Held.
    pub fn hold(&mut self, at: Timestamp) -> Result<(), ArbitrationError> {
        self.can_hold()?;
        self.status = EscrowStatus::Held;
        self.updated_at = at;
        Ok(())
    }

    /// Deposited | Held → Released. Returns the payout.
    pub fn release(
        &mut self,
        at: Timestamp,
        tx: Option<TxHash>,
    ) -> Result<SplitAmounts, ArbitrationError> {
        self.can_release()?;
        self.status = EscrowStatus::Released;
        self.updated_at = at;
        self.settlement_tx = tx;
        Ok(self.payout())
    }

    /// Deposited | Held → Refunded.
    pub fn refund(&mut self, at: Timestamp, tx: Option<TxHash>) -> Result<(), ArbitrationError> {
        self.can_refund()?;
        self.status = EscrowStatus::Refunded;
        self.updated_at = at;
        self.settlement_tx = tx;
        Ok(())
    }

    /// Payer cancellation inside the window. Ends Refunded.
    pub fn cancel_by_payer(
        &mut self,
        caller: &Address,
        now: Timestamp,
        window_secs: u64,
        tx: Option<TxHash>,
    ) -> Result<(), ArbitrationError> {
        self.can_cancel_by_payer(caller, now, window_secs)?;
        self.status = EscrowStatus::Refunded;
        self.updated_at = now;
        self.settlement_tx = tx;
        Ok(())
    }

    /// The split applied to the escrowed amount.
    pub fn payout(&self) -> SplitAmounts {
        self.terms.splits.apply(self.terms.amount)
    }
}
