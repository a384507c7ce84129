//! # Content-Addressed Storage Interface
//!
//! Weighbridge tickets, proof documents, KYC records, and dispute evidence
//! are stored off-ledger. Only the returned identifier reaches the ledger,
//! forwarded verbatim as `weighHash`, `proofHash`, `metaDataHash`, or
//! `evidenceHash`. The identifier format belongs to the store and is treated
//! as opaque everywhere else.

use std::collections::HashMap;

use agx_core::keccak256;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Opaque identifier returned by a content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Wrap an identifier returned by a store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Put/get contract of a content-addressed store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes and return their identifier.
    async fn put_bytes(&self, bytes: &[u8]) -> Result<ContentId, CryptoError>;

    /// Fetch bytes by identifier.
    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Store a JSON document.
    async fn put_json(&self, value: &serde_json::Value) -> Result<ContentId, CryptoError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CryptoError::Cas(e.to_string()))?;
        self.put_bytes(&bytes).await
    }
}

/// In-process store keyed by Keccak-256 of the content.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put_bytes(&self, bytes: &[u8]) -> Result<ContentId, CryptoError> {
        let digest = keccak256(bytes).to_hex();
        let id = format!("mem:{}", &digest[2..]);
        self.objects
            .write()
            .entry(id.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(ContentId(id))
    }

    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self.objects.read().get(id.as_str()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_content_addressed() {
        let store = MemoryContentStore::new();
        let a = store.put_bytes(b"ticket").await.unwrap();
        let b = store.put_bytes(b"ticket").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a).await.unwrap().unwrap(), b"ticket");
    }

    #[tokio::test]
    async fn put_json_round_trip() {
        let store = MemoryContentStore::new();
        let id = store.put_json(&serde_json::json!({"kg": 1200})).await.unwrap();
        let raw = store.get(&id).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["kg"], 1200);
    }

    #[tokio::test]
    async fn missing_id_returns_none() {
        let store = MemoryContentStore::new();
        assert!(store.get(&ContentId::new("mem:nope")).await.unwrap().is_none());
    }
}
