//! # Identity Newtypes
//!
//! Identifiers that cross the ledger boundary. Each identifier is a distinct
//! type: a [`ShipmentKey`] is the canonical on-chain form of a
//! [`ShipmentRef`], and the two are never interchangeable.
//!
//! ## Canonical shipment id
//!
//! An off-chain reference that is already `0x` followed by 64 hex digits is
//! parsed as-is. Any other reference is hashed: `keccak256(utf8(ref))`. The
//! derivation is stable, so the projection store and the ledger agree on the
//! key without a lookup table.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::digest::{keccak256, Hash32};
use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte ledger account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address. The ledger uses it for "unset".
    pub const ZERO: Address = Address([0u8; 20]);

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse `0x` followed by 40 hex digits. Checksum casing is accepted but
    /// not enforced.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| ValidationError::InvalidAddress(s.to_string()))?;
        if body.len() != 40 {
            return Err(ValidationError::InvalidAddress(s.to_string()));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(body, &mut out)
            .map_err(|_| ValidationError::InvalidAddress(s.to_string()))?;
        Ok(Self(out))
    }

    /// Whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Shipment identifiers
// ---------------------------------------------------------------------------

/// The off-chain shipment reference, as minted by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShipmentRef(String);

impl ShipmentRef {
    /// Create a reference, rejecting empty input.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier {
                kind: "shipment reference",
            });
        }
        Ok(Self(id))
    }

    /// The reference as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the canonical on-chain key.
    pub fn key(&self) -> ShipmentKey {
        ShipmentKey::derive(self)
    }
}

impl std::fmt::Display for ShipmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical 32-byte shipment identifier used on the ledger and as the
/// projection primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentKey(Hash32);

impl ShipmentKey {
    /// Canonical id derivation (see module docs).
    pub fn derive(reference: &ShipmentRef) -> Self {
        let raw = reference.as_str();
        if is_canonical(raw) {
            if let Ok(h) = Hash32::from_hex(raw) {
                return Self(h);
            }
        }
        Self(keccak256(raw.as_bytes()))
    }

    /// Wrap a 32-byte value read back from the ledger.
    pub fn from_hash(hash: Hash32) -> Self {
        Self(hash)
    }

    /// The underlying word.
    pub fn as_hash(&self) -> &Hash32 {
        &self.0
    }
}

impl std::fmt::Display for ShipmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_canonical(raw: &str) -> bool {
    raw.len() == 66
        && raw.starts_with("0x")
        && raw[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Other identifiers
// ---------------------------------------------------------------------------

/// A ledger transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(Hash32);

impl TxHash {
    /// Wrap a 32-byte hash.
    pub fn from_hash(hash: Hash32) -> Self {
        Self(hash)
    }

    /// Parse `0x` followed by 64 hex digits.
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        Hash32::from_hex(s).map(Self)
    }

    /// The underlying hash.
    pub fn as_hash(&self) -> &Hash32 {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant profile identifier in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(String);

impl ProfileId {
    /// Create a profile id, rejecting empty input.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier { kind: "profile id" });
        }
        Ok(Self(id))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger-assigned dispute identifier, captured from the `DisputeRaised`
/// event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisputeId(u64);

impl DisputeId {
    /// Wrap a ledger id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DisputeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dispute:{}", self.0)
    }
}

/// Identity of one ledger log: the transaction that emitted it and its index
/// within the block. Re-delivery of the same log carries the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    /// Emitting transaction.
    pub tx_hash: TxHash,
    /// Log index within the block.
    pub log_index: u64,
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

/// Total order of logs on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerPosition {
    /// Block number.
    pub block: u64,
    /// Log index within the block.
    pub log_index: u64,
}

impl LedgerPosition {
    /// Build a position.
    pub fn new(block: u64, log_index: u64) -> Self {
        Self { block, log_index }
    }
}
