//! # agx-sync — Ledger Synchronisation
//!
//! Keeps the off-chain projection consistent with the ledger.
//!
//! - [`ProjectionStore`]: shipments, escrows, disputes, deposit intents,
//!   processed event ids, and the ledger cursor. Every record write is a
//!   compare-and-swap on `version`.
//! - [`PendingQueue`]: durable ledger writes that must happen after an
//!   observed event (the state update paired with a confirmed deposit).
//!   Keyed by `(shipment, target_state)` so enqueueing twice is a no-op.
//! - [`EventProjector`]: folds ledger events into the store. Applying the
//!   same event twice leaves the store as it was after the first.
//! - [`EventSubscriber`]: polls the ledger and feeds the projector.
//! - [`RetryWorker`]: drains the queue with exponential backoff.
//!
//! The in-memory backends are used by tests and by the CLI when no
//! `DATABASE_URL` is set; [`db`] holds the Postgres backends.

pub mod db;
pub mod error;
pub mod memory;
pub mod model;
pub mod projector;
pub mod queue;
pub mod store;
pub mod subscriber;
pub mod worker;

pub use error::SyncError;
pub use memory::{MemoryQueue, MemoryStore};
pub use model::{DepositIntent, IntentStage, PendingStateUpdate, UpdateStatus};
pub use projector::{Applied, EventObserver, EventProjector, ProjectorConfig};
pub use queue::PendingQueue;
pub use store::ProjectionStore;
pub use subscriber::EventSubscriber;
pub use worker::{RetryWorker, WorkerConfig, WorkerReport};
