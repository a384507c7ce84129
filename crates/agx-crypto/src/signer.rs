//! # Signer Abstraction
//!
//! The attestor key lives behind [`AttestationSigner`] so the coordinator
//! never touches key material directly. Backends:
//!
//! - [`LocalKeySigner`]: in-memory key for development and testing.
//! - [`EnvKeySigner`]: hex-encoded 32-byte secp256k1 key loaded from an
//!   environment variable. Suitable for container deployments where secrets
//!   are injected via environment.
//!
//! The trait is async because production signers (wallet bridges, HSMs) are
//! remote. Every implementation signs the way `personal_sign` does: it is
//! handed the 32-byte payload hash and applies the message prefix itself.
//!
//! ## Security Invariants
//!
//! - `k256::ecdsa::SigningKey` zeroizes on drop; the hex string read from the
//!   environment is held in `Zeroizing` until parsed.
//! - `AttestationSigner` is `Send + Sync` for use across async tasks.

use agx_core::{Address, Hash32};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use zeroize::Zeroizing;

use crate::ecdsa::{address_of, personal_message_hash, sign_digest, EthSignature};
use crate::error::CryptoError;

/// A capability that produces personal-message signatures for one address.
#[async_trait]
pub trait AttestationSigner: Send + Sync {
    /// The address signatures recover to.
    fn address(&self) -> Address;

    /// Sign `payload_hash` under the personal-message prefix.
    async fn sign_hash(&self, payload_hash: &Hash32) -> Result<EthSignature, CryptoError>;

    /// Human-readable backend name for logs.
    fn signer_name(&self) -> &str;
}

// ─── LocalKeySigner ──────────────────────────────────────────────────────

/// In-memory secp256k1 signer.
pub struct LocalKeySigner {
    key: SigningKey,
    address: Address,
}

impl LocalKeySigner {
    /// Wrap an existing key.
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    /// Generate a random key from the OS CSPRNG.
    pub fn generate() -> Self {
        Self::new(SigningKey::random(&mut rand_core::OsRng))
    }

    /// Build from a raw 32-byte secret.
    pub fn from_secret(secret: &[u8; 32]) -> Result<Self, CryptoError> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| CryptoError::InvalidSigningKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    /// The secret as hex. Only the CLI `keys generate` command calls this.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.key.to_bytes()))
    }
}

#[async_trait]
impl AttestationSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_hash(&self, payload_hash: &Hash32) -> Result<EthSignature, CryptoError> {
        sign_digest(&self.key, &personal_message_hash(payload_hash))
    }

    fn signer_name(&self) -> &str {
        "LocalKeySigner"
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

// ─── EnvKeySigner ────────────────────────────────────────────────────────

/// Loads a secp256k1 key from an environment variable.
///
/// The variable must hold 64 hex characters, optionally `0x`-prefixed.
///
/// ```bash
/// export AGX_ATTESTOR_KEY="0x4c0883a6..."  # 64 hex chars
/// ```
pub struct EnvKeySigner {
    inner: LocalKeySigner,
    var_name: String,
}

impl EnvKeySigner {
    /// Load the key from `var_name`.
    pub fn from_env(var_name: &str) -> Result<Self, CryptoError> {
        let raw = Zeroizing::new(std::env::var(var_name).map_err(|_| {
            CryptoError::SignerUnavailable(format!("environment variable {var_name} not set"))
        })?);
        Self::from_hex(var_name, &raw)
    }

    fn from_hex(var_name: &str, raw: &str) -> Result<Self, CryptoError> {
        let body = raw.trim();
        let body = body.strip_prefix("0x").unwrap_or(body);
        let bytes = Zeroizing::new(
            hex::decode(body).map_err(|e| CryptoError::HexDecode(format!("{var_name}: {e}")))?,
        );
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidSigningKey(format!(
                "expected 32 bytes (64 hex chars) in {var_name}, got {} bytes",
                bytes.len()
            ))
        })?;
        let secret = Zeroizing::new(secret);
        Ok(Self {
            inner: LocalKeySigner::from_secret(&secret)?,
            var_name: var_name.to_string(),
        })
    }

    /// The environment variable this signer was loaded from.
    pub fn var_name(&self) -> &str {
        &self.var_name
    }
}

#[async_trait]
impl AttestationSigner for EnvKeySigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_hash(&self, payload_hash: &Hash32) -> Result<EthSignature, CryptoError> {
        self.inner.sign_hash(payload_hash).await
    }

    fn signer_name(&self) -> &str {
        "EnvKeySigner"
    }
}

impl std::fmt::Debug for EnvKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvKeySigner")
            .field("address", &self.inner.address)
            .field("var_name", &self.var_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecdsa::recover_address;
    use agx_core::keccak256;

    #[tokio::test]
    async fn local_signer_signature_recovers_to_address() {
        let signer = LocalKeySigner::generate();
        let hash = keccak256(b"payload");
        let sig = signer.sign_hash(&hash).await.unwrap();
        let recovered = recover_address(&personal_message_hash(&hash), &sig).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn from_secret_is_deterministic() {
        let a = LocalKeySigner::from_secret(&[9u8; 32]).unwrap();
        let b = LocalKeySigner::from_secret(&[9u8; 32]).unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn zero_secret_rejected() {
        assert!(matches!(
            LocalKeySigner::from_secret(&[0u8; 32]),
            Err(CryptoError::InvalidSigningKey(_))
        ));
    }

    #[test]
    fn env_signer_parses_prefixed_hex() {
        let hex_key = format!("0x{}", "11".repeat(32));
        let signer = EnvKeySigner::from_hex("TEST_KEY", &hex_key).unwrap();
        let direct = LocalKeySigner::from_secret(&[0x11; 32]).unwrap();
        assert_eq!(signer.address(), direct.address());
        assert_eq!(signer.var_name(), "TEST_KEY");
        assert_eq!(signer.signer_name(), "EnvKeySigner");
    }

    #[test]
    fn env_signer_rejects_short_key() {
        let err = EnvKeySigner::from_hex("TEST_KEY", "abcd").unwrap_err();
        assert!(err.to_string().contains("TEST_KEY"));
    }

    #[test]
    fn env_signer_missing_variable() {
        let err = EnvKeySigner::from_env("AGX_TEST_SURELY_UNSET_VARIABLE").unwrap_err();
        assert!(matches!(err, CryptoError::SignerUnavailable(_)));
    }

    #[test]
    fn debug_redacts_key() {
        let signer = LocalKeySigner::from_secret(&[3u8; 32]).unwrap();
        let dbg = format!("{signer:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains(&"03".repeat(32)));
    }

    #[test]
    fn secret_hex_round_trips() {
        let signer = LocalKeySigner::generate();
        let hex_key = signer.secret_hex();
        let back = EnvKeySigner::from_hex("K", &hex_key).unwrap();
        assert_eq!(back.address(), signer.address());
    }
}
