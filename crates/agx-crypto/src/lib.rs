//! # agx-crypto — Attestation Cryptography
//!
//! Produces signatures that the ledger accepts: the payload is encoded
//! word-for-word the way the contract encodes it, hashed with Keccak-256,
//! wrapped in the personal-message prefix, and signed with a recoverable
//! secp256k1 signature. The ledger recovers the signer from the signature and
//! compares it with the registered attestor, so one mis-ordered field breaks
//! every call. [`AttestationService`] recovers the signer locally before the
//! signature ever leaves the process.
//!
//! ## Modules
//!
//! - [`payload`]: the four payload shapes and their word layout.
//! - [`ecdsa`]: signature container, prefixing, and address recovery.
//! - [`signer`]: the [`AttestationSigner`] capability and its local and
//!   environment-backed implementations.
//! - [`nonce`]: replay-safe nonce sources.
//! - [`attestation`]: the service tying it together.
//! - [`cas`]: content-addressed store interface for free-text hashes.

pub mod attestation;
pub mod cas;
pub mod ecdsa;
pub mod error;
pub mod nonce;
pub mod payload;
pub mod signer;

pub use attestation::{AttestationConfig, AttestationService, SignedAttestation};
pub use cas::{ContentId, ContentStore, MemoryContentStore};
pub use ecdsa::{personal_message_hash, recover_address, EthSignature};
pub use error::CryptoError;
pub use nonce::{MonotonicNonce, NonceSource, RandomNonce};
pub use payload::{AttestationPayload, PayloadBody, ProofType};
pub use signer::{AttestationSigner, EnvKeySigner, LocalKeySigner};
