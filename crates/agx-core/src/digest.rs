//! # Keccak-256 Digests
//!
//! The ledger hashes with Keccak-256 (the pre-standard SHA-3 padding), so
//! every digest in the workspace is produced here. [`Hash32`] is the shared
//! 32-byte container, rendered as `0x`-prefixed lowercase hex.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::error::ValidationError;

/// A 32-byte value: a digest, a `bytes32` ledger word, or a transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32([u8; 32]);

impl Hash32 {
    /// The all-zero value.
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse `0x` followed by exactly 64 hex digits (either case).
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        let body = s.strip_prefix("0x").ok_or_else(|| ValidationError::InvalidHex {
            value: s.to_string(),
            reason: "missing 0x prefix".into(),
        })?;
        if body.len() != 64 {
            return Err(ValidationError::InvalidHex {
                value: s.to_string(),
                reason: format!("expected 64 hex digits, got {}", body.len()),
            });
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(body, &mut out).map_err(|e| ValidationError::InvalidHex {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(out))
    }

    /// Lowercase `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash32::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: impl AsRef<[u8]>) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    Hash32(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input_matches_known_vector() {
        assert_eq!(
            keccak256(b"").to_hex(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn keccak_differs_from_sha3_256() {
        // SHA3-256("") starts with a7ffc6f8; Keccak-256 must not.
        assert!(!keccak256(b"").to_hex().starts_with("0xa7ffc6f8"));
    }

    #[test]
    fn hex_round_trip_normalizes_case() {
        let upper = format!("0x{}", "AB".repeat(32));
        let h = Hash32::from_hex(&upper).unwrap();
        assert_eq!(h.to_hex(), format!("0x{}", "ab".repeat(32)));
    }

    #[test]
    fn hex_rejects_wrong_length_and_prefix() {
        assert!(Hash32::from_hex("0x1234").is_err());
        assert!(Hash32::from_hex(&"ab".repeat(32)).is_err());
        assert!(Hash32::from_hex(&format!("0x{}", "zz".repeat(32))).is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let h = keccak256(b"agx");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: Hash32 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
