//! # Token Amounts and Basis-Point Splits
//!
//! Amounts are held in token base units as `u128` and serialized as decimal
//! strings, the same representation the ledger reports. Human input such as
//! an ask price of `"12.5"` is converted with [`TokenAmount::parse_decimal`]
//! using the token's configured number of decimals.
//!
//! Escrow proceeds are split by basis points. The three shares must not sum
//! to more than [`BPS_DENOMINATOR`]; any remainder returns to the payer.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// One whole in basis points.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// A token amount in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TokenAmount(u128);

impl TokenAmount {
    /// Zero.
    pub const ZERO: TokenAmount = TokenAmount(0);

    /// Wrap base units.
    pub fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    /// Raw base units.
    pub fn base_units(&self) -> u128 {
        self.0
    }

    /// Whether the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a non-negative decimal string (`"12"`, `"12.50"`) into base
    /// units at `decimals` precision. More fractional digits than `decimals`
    /// is an error rather than a silent truncation.
    pub fn parse_decimal(value: &str, decimals: u8) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidAmount {
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty"));
        }
        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("no digits"));
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid("not a non-negative decimal number"));
        }
        if frac.len() > decimals as usize {
            return Err(invalid("more fractional digits than the token supports"));
        }

        let scale = 10u128
            .checked_pow(u32::from(decimals))
            .ok_or_else(|| invalid("decimals out of range"))?;
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| invalid("overflow"))?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = decimals as usize);
            padded.parse::<u128>().map_err(|_| invalid("overflow"))?
        };

        whole_units
            .checked_mul(scale)
            .and_then(|v| v.checked_add(frac_units))
            .map(Self)
            .ok_or_else(|| invalid("overflow"))
    }

    /// Checked addition.
    pub fn checked_add(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_sub(other.0).map(Self)
    }
}

impl std::fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>()
            .map(Self)
            .map_err(|e| serde::de::Error::custom(format!("invalid token amount {s:?}: {e}")))
    }
}

/// Escrow proceeds split in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitBps {
    /// Producer share.
    pub farmer_bps: u16,
    /// Carrier share.
    pub transporter_bps: u16,
    /// Platform fee share.
    pub platform_bps: u16,
}

/// Concrete amounts produced by applying a [`SplitBps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitAmounts {
    /// Paid to the producer.
    pub farmer: TokenAmount,
    /// Paid to the carrier.
    pub transporter: TokenAmount,
    /// Kept by the platform.
    pub platform: TokenAmount,
    /// Returned to the payer (rounding dust and unallocated bps).
    pub residual: TokenAmount,
}

impl SplitBps {
    /// Construct and validate.
    pub fn new(farmer_bps: u16, transporter_bps: u16, platform_bps: u16) -> Result<Self, ValidationError> {
        let split = Self {
            farmer_bps,
            transporter_bps,
            platform_bps,
        };
        split.validate()?;
        Ok(split)
    }

    /// Sum of the three shares.
    pub fn total(&self) -> u32 {
        u32::from(self.farmer_bps) + u32::from(self.transporter_bps) + u32::from(self.platform_bps)
    }

    /// Reject splits above one whole.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let total = self.total();
        if total > BPS_DENOMINATOR {
            return Err(ValidationError::SplitOverflow { total });
        }
        Ok(())
    }

    /// Apply the split to `amount`. Each share rounds down.
    pub fn apply(&self, amount: TokenAmount) -> SplitAmounts {
        let share = |bps: u16| {
            let units = amount.base_units();
            // (units / D) * bps + (units % D) * bps / D avoids overflow on large amounts.
            let d = u128::from(BPS_DENOMINATOR);
            let b = u128::from(bps);
            TokenAmount::from_base_units((units / d) * b + (units % d) * b / d)
        };
        let farmer = share(self.farmer_bps);
        let transporter = share(self.transporter_bps);
        let platform = share(self.platform_bps);
        let paid = farmer.base_units() + transporter.base_units() + platform.base_units();
        SplitAmounts {
            farmer,
            transporter,
            platform,
            residual: TokenAmount::from_base_units(amount.base_units().saturating_sub(paid)),
        }
    }
}
