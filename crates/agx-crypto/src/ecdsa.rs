//! # secp256k1 Signatures
//!
//! 65-byte recoverable signatures in `r ‖ s ‖ v` form with `v ∈ {27, 28}`,
//! the personal-message prefix, and ledger address derivation
//! (`keccak256(uncompressed_pubkey[1..])[12..]`).

use agx_core::{keccak256, Address, Hash32};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;

const PERSONAL_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// A recoverable signature as the ledger consumes it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EthSignature([u8; 65]);

impl EthSignature {
    /// Parse 65 raw bytes. `v` may be 0/1 or 27/28 and is normalized to 27/28.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 65 {
            return Err(CryptoError::InvalidSignatureLength(bytes.len()));
        }
        let mut out = [0u8; 65];
        out.copy_from_slice(bytes);
        out[64] = match out[64] {
            0 | 1 => out[64] + 27,
            27 | 28 => out[64],
            other => return Err(CryptoError::InvalidRecoveryId(other)),
        };
        Ok(Self(out))
    }

    /// Parse `0x`-prefixed hex.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let body = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(body).map_err(|e| CryptoError::HexDecode(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// The `v` byte (27 or 28).
    pub fn v(&self) -> u8 {
        self.0[64]
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    fn split(&self) -> Result<(Signature, RecoveryId), CryptoError> {
        let sig = Signature::from_slice(&self.0[..64])
            .map_err(|e| CryptoError::Recovery(e.to_string()))?;
        let recid = RecoveryId::from_byte(self.0[64] - 27)
            .ok_or(CryptoError::InvalidRecoveryId(self.0[64]))?;
        Ok((sig, recid))
    }
}

impl std::fmt::Debug for EthSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EthSignature({})", self.to_hex())
    }
}

impl Serialize for EthSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EthSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EthSignature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// `keccak256("\x19Ethereum Signed Message:\n32" ‖ hash)`.
pub fn personal_message_hash(hash: &Hash32) -> Hash32 {
    let mut buf = Vec::with_capacity(PERSONAL_PREFIX.len() + 32);
    buf.extend_from_slice(PERSONAL_PREFIX);
    buf.extend_from_slice(hash.as_bytes());
    keccak256(buf)
}

/// Ledger address of a public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.as_bytes()[12..]);
    Address::from_bytes(out)
}

/// Sign an already-prefixed digest.
pub fn sign_digest(key: &SigningKey, digest: &Hash32) -> Result<EthSignature, CryptoError> {
    let (sig, recid) = key
        .sign_prehash_recoverable(digest.as_bytes())
        .map_err(|e| CryptoError::Signing(e.to_string()))?;
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recid.to_byte() + 27;
    Ok(EthSignature(out))
}

/// Recover the signing address from a prefixed digest and signature.
pub fn recover_address(digest: &Hash32, signature: &EthSignature) -> Result<Address, CryptoError> {
    let (sig, recid) = signature.split()?;
    let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recid)
        .map_err(|e| CryptoError::Recovery(e.to_string()))?;
    Ok(address_of(&key))
}
