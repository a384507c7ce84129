//! # agx-cli — AGX Operator Command-Line Interface
//!
//! ## Subcommands
//!
//! - `worker` — follow the ledger, project events, and drain the pending
//!   queue
//! - `queue` — list, retry, and dismiss pending state updates
//! - `attest` — sign an attestation offline
//! - `keys` — generate an attestor key or show its address
//!
//! Argument parsing lives in `main.rs`; the handlers here delegate to the
//! library crates and return an exit code.

pub mod attest;
pub mod config;
pub mod keys;
pub mod queue;
pub mod runtime;
pub mod worker;
