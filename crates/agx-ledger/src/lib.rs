//! # agx-ledger — Ledger Client
//!
//! Everything that crosses the ledger boundary: the contract functions the
//! coordinator calls ([`LedgerCall`]), the logs it observes
//! ([`LedgerEvent`]), and the [`LedgerClient`] trait that separates
//! "submitted" (a transaction hash came back) from "confirmed" (a receipt
//! was observed).
//!
//! ## Implementations
//!
//! - [`MockLedger`]: in-process contract simulation. Enforces the same rules
//!   the deployed contracts do (roles, state order, signature recovery,
//!   nonce replay, allowances, escrow status), mines on demand, and can
//!   inject network failures. Used by every test in the workspace and by
//!   the CLI's `--mock` mode.
//! - `EvmLedger` (feature `evm`): JSON-RPC over HTTPS. Does not hold private
//!   keys; `eth_sendTransaction` is signed by the RPC endpoint's key
//!   management for the `from` address.

pub mod call;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
#[cfg(feature = "evm")]
pub mod evm;
pub mod mock;

pub use call::{LedgerCall, Target};
pub use client::{
    wait_for_receipt, LedgerClient, OnChainEscrow, OnChainShipment, ReceiptPolicy, TxReceipt,
};
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use event::{EventData, LedgerEvent, LogEntry};
#[cfg(feature = "evm")]
pub use evm::EvmLedger;
pub use mock::MockLedger;
