#![deny(missing_docs)]

//! # agx-arbitration — Escrow and Dispute Models
//!
//! Records and status machines for the escrowed payment of a shipment and
//! for disputes raised against it. Like `agx-state`, this crate performs no
//! I/O: each operation validates the current status and mutates the record,
//! and the coordinator persists the result only after the ledger accepted
//! the matching call.
//!
//! ## Escrow
//!
//! `Deposited → Held → {Released | Refunded}`, with `Deposited` also able to
//! go directly to `Released` or `Refunded`. One live escrow per shipment.
//!
//! ## Dispute
//!
//! `Open → {Resolved | Rejected}`. Evidence is accepted only while `Open`.

pub mod dispute;
pub mod error;
pub mod escrow;

pub use dispute::{Dispute, DisputeStatus, Evidence, Resolution};
pub use error::ArbitrationError;
pub use escrow::{DepositTerms, EscrowRecord, EscrowStatus};
