//! # Error Types
//!
//! Validation failures for domain primitives and ABI decoding failures.
//! Each variant carries the rejected input so operators can diagnose
//! misconfiguration without guesswork.

use thiserror::Error;

/// Validation errors for domain primitive newtypes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Address is not `0x` followed by 40 hex digits.
    #[error("invalid address: \"{0}\" (expected 0x followed by 40 hex digits)")]
    InvalidAddress(String),

    /// A fixed-width hex value failed to parse.
    #[error("invalid hex value \"{value}\": {reason}")]
    InvalidHex {
        /// The string that failed to parse.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A string identifier was empty or whitespace.
    #[error("{kind} must be non-empty")]
    EmptyIdentifier {
        /// Which identifier kind was empty.
        kind: &'static str,
    },

    /// A token amount could not be parsed or overflowed.
    #[error("invalid amount \"{value}\": {reason}")]
    InvalidAmount {
        /// The amount as given.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Basis-point splits sum to more than the denominator.
    #[error("split basis points sum to {total}, which exceeds 10000")]
    SplitOverflow {
        /// The offending sum.
        total: u32,
    },

    /// Timestamp could not be represented.
    #[error("invalid timestamp: \"{value}\" ({reason})")]
    InvalidTimestamp {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Unknown role code or name.
    #[error("unknown role: \"{0}\"")]
    UnknownRole(String),
}

/// Errors while decoding ABI-encoded ledger data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    /// The buffer ended before the requested word.
    #[error("abi data too short: need {needed} bytes, have {available}")]
    TooShort {
        /// Bytes required to satisfy the read.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },

    /// A word did not fit the requested integer width.
    #[error("abi word at offset {offset} overflows {target}")]
    Overflow {
        /// Byte offset of the word.
        offset: usize,
        /// Type that was requested.
        target: &'static str,
    },

    /// An address word had non-zero padding.
    #[error("abi word at offset {offset} is not a left-padded address")]
    BadAddress {
        /// Byte offset of the word.
        offset: usize,
    },

    /// A dynamic string was not UTF-8.
    #[error("abi string at offset {offset} is not valid UTF-8")]
    BadString {
        /// Byte offset of the string head.
        offset: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_overflow_names_total() {
        let err = ValidationError::SplitOverflow { total: 10_500 };
        assert!(err.to_string().contains("10500"));
    }

    #[test]
    fn abi_too_short_display() {
        let err = AbiError::TooShort {
            needed: 64,
            available: 32,
        };
        let msg = err.to_string();
        assert!(msg.contains("64"));
        assert!(msg.contains("32"));
    }

    #[test]
    fn invalid_address_keeps_input() {
        let err = ValidationError::InvalidAddress("0xzz".into());
        assert!(err.to_string().contains("0xzz"));
    }
}
