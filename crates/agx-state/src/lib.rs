#![deny(missing_docs)]

//! # agx-state — Shipment State Machine
//!
//! The pure part of the shipment lifecycle: which status follows which, who
//! may drive each transition, what must hold first, and how an off-chain
//! status relates to the coarser state the ledger stores. Nothing in this
//! crate performs I/O. The coordinator runs [`transition::check`] before it
//! touches the ledger and applies the resulting [`transition::Plan`] only
//! after the ledger accepted the submission.
//!
//! ## Modules
//!
//! - [`status`]: [`ShipmentStatus`] and [`LedgerState`] with the mapping
//!   between them.
//! - [`shipment`]: the projection record and its append-only timeline.
//! - [`transition`]: actions, guards, and [`TransitionRejection`].
//! - [`reconcile`]: the rule for folding an observed ledger state into the
//!   projection.

pub mod reconcile;
pub mod shipment;
pub mod status;
pub mod transition;

pub use reconcile::{reconcile, resync_target, Reconciliation};
pub use shipment::{Confirmation, ProofRecord, Shipment, TentativeTransition, TimelineEntry, Weighment};
pub use status::{LedgerState, ShipmentStatus};
pub use transition::{
    check, EscrowFacts, GuardContext, Plan, RejectionReason, ShipmentAction, TransitionRejection,
};
