//! # Cryptographic Error Types

use agx_core::Address;
use thiserror::Error;

/// Errors from signing, recovery, and attestation construction.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// A signature was not 65 bytes.
    #[error("invalid signature length: expected 65 bytes, got {0}")]
    InvalidSignatureLength(usize),

    /// The recovery byte was not 27/28 (or 0/1).
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    /// Private key material was malformed.
    #[error("invalid signing key: {0}")]
    InvalidSigningKey(String),

    /// The signer backend could not be reached or configured.
    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    /// The signer backend refused or failed to sign.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Public key recovery failed.
    #[error("signer recovery failed: {0}")]
    Recovery(String),

    /// The recovered address is not the signer that was asked to sign.
    #[error("recovered signer {recovered} does not match expected signer {expected}")]
    SignerMismatch {
        /// Address the signature should belong to.
        expected: Address,
        /// Address actually recovered from the signature.
        recovered: Address,
    },

    /// Payload timestamp is outside the accepted window around local time.
    #[error("payload timestamp {timestamp} is {skew_secs}s from local time (window {window_secs}s)")]
    TimestampSkew {
        /// Payload timestamp (Unix seconds).
        timestamp: u64,
        /// Observed distance from local time.
        skew_secs: u64,
        /// Configured tolerance.
        window_secs: u64,
    },

    /// Payload targets a different chain than the service is configured for.
    #[error("payload chain id {payload} does not match configured chain id {configured}")]
    ChainMismatch {
        /// Chain id in the payload.
        payload: u64,
        /// Chain id of the service.
        configured: u64,
    },

    /// Content store failure.
    #[error("content store error: {0}")]
    Cas(String),

    /// Hex decoding failure.
    #[error("hex decode error: {0}")]
    HexDecode(String),
}
