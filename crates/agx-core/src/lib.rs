#![deny(missing_docs)]

//! # agx-core — Foundational Types for AGX
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies, only `serde`, `thiserror`, `chrono`, `sha3`, and `hex`
//! from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** A [`ShipmentKey`] is not a
//!    [`TxHash`] even though both are 32 bytes, and an [`Address`] is never a
//!    bare string once it has been parsed.
//!
//! 2. **One encoding path.** Everything the ledger hashes or decodes goes
//!    through [`abi`], which produces the same 32-byte word layout the
//!    contract uses.
//!
//! 3. **Amounts are integers.** [`TokenAmount`] holds base units and
//!    serializes as a decimal string. Floats never touch money.
//!
//! 4. **Structured errors.** [`ValidationError`] and [`AbiError`] carry the
//!    rejected input. No `.unwrap()` outside tests.

pub mod abi;
pub mod amount;
pub mod digest;
pub mod error;
pub mod identity;
pub mod role;
pub mod temporal;

pub use abi::{selector, Token};
pub use amount::{SplitAmounts, SplitBps, TokenAmount, BPS_DENOMINATOR};
pub use digest::{keccak256, Hash32};
pub use error::{AbiError, ValidationError};
pub use identity::{
    Address, DisputeId, EventId, LedgerPosition, ProfileId, ShipmentKey, ShipmentRef, TxHash,
};
pub use role::{Actor, Role};
pub use temporal::Timestamp;
