//! # Sync Records
//!
//! Records owned by the sync layer rather than the domain crates.

use agx_arbitration::DepositTerms;
use agx_core::{ShipmentKey, Timestamp, TxHash};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a queued ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Waiting for its next attempt.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Observed on the ledger.
    Completed,
    /// Gave up; needs an operator.
    Failed,
}

impl UpdateStatus {
    /// Column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Inverse of [`UpdateStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attestor-signed `updateShipmentState` that must reach the ledger.
///
/// The signature is produced per attempt so the timestamp is always inside
/// the ledger's window; the entry itself only records intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStateUpdate {
    /// Entry id.
    pub id: Uuid,
    /// Subject shipment.
    pub shipment: ShipmentKey,
    /// Ledger state code when the entry was queued.
    pub current_state: u8,
    /// Target ledger state code.
    pub target_state: u8,
    /// Current status.
    pub status: UpdateStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Attempts allowed before the entry fails.
    pub max_attempts: u32,
    /// Last failure message.
    pub last_error: Option<String>,
    /// Last submitted transaction.
    pub last_tx: Option<TxHash>,
    /// Earliest time the next attempt may run.
    pub next_attempt_at: Timestamp,
    /// Enqueue time.
    pub created_at: Timestamp,
    /// Last change.
    pub updated_at: Timestamp,
}

impl PendingStateUpdate {
    /// A fresh pending entry, due immediately.
    pub fn new(shipment: ShipmentKey, current_state: u8, target_state: u8, max_attempts: u32, at: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            shipment,
            current_state,
            target_state,
            status: UpdateStatus::Pending,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            last_tx: None,
            next_attempt_at: at,
            created_at: at,
            updated_at: at,
        }
    }

    /// Put a completed or failed entry back in line for a new move from
    /// `current_state`. The id and creation time are kept.
    pub fn rearm(&mut self, current_state: u8, max_attempts: u32, at: Timestamp) {
        self.current_state = current_state;
        self.status = UpdateStatus::Pending;
        self.attempts = 0;
        self.max_attempts = max_attempts.max(1);
        self.last_error = None;
        self.last_tx = None;
        self.next_attempt_at = at;
        self.updated_at = at;
    }

    /// Whether another attempt is allowed after the current one fails.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Count a failed attempt: back to Pending at `retry_at` while attempts
    /// remain, Failed otherwise.
    pub fn record_failure(&mut self, error: &str, retry_at: Option<Timestamp>, at: Timestamp) {
        self.attempts += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = at;
        match retry_at {
            Some(next) if self.has_attempts_left() => {
                self.status = UpdateStatus::Pending;
                self.next_attempt_at = next;
            }
            _ => self.status = UpdateStatus::Failed,
        }
    }
}

/// Where a deposit stands before the ledger confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum IntentStage {
    /// `approve` submitted; deposit waits for its confirmation.
    AwaitingApproval {
        /// The approve transaction.
        approve_tx: TxHash,
    },
    /// `depositPayment` submitted.
    Submitted {
        /// The deposit transaction.
        deposit_tx: TxHash,
    },
}

/// The terms of a deposit the coordinator has started, kept until the
/// `PaymentDeposited` event turns it into an escrow record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositIntent {
    /// What will be deposited.
    pub terms: DepositTerms,
    /// Progress.
    pub stage: IntentStage,
    /// When the deposit was requested.
    pub requested_at: Timestamp,
}

impl DepositIntent {
    /// Shipment key.
    pub fn shipment(&self) -> &ShipmentKey {
        &self.terms.shipment
    }

    /// The approve transaction, while waiting on one.
    pub fn approve_tx(&self) -> Option<&TxHash> {
        match &self.stage {
            IntentStage::AwaitingApproval { approve_tx } => Some(approve_tx),
            IntentStage::Submitted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::ShipmentRef;

    #[test]
    fn rearm_clears_the_previous_run() {
        let key = ShipmentRef::new("s").unwrap().key();
        let mut entry = PendingStateUpdate::new(key, 1, 2, 1, Timestamp::now());
        entry.record_failure("timed out", None, Timestamp::now());
        assert_eq!(entry.status, UpdateStatus::Failed);

        let later = Timestamp::now().plus_secs(60);
        entry.rearm(1, 3, later);
        assert_eq!(entry.status, UpdateStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.max_attempts, 3);
        assert!(entry.last_error.is_none());
        assert_eq!(entry.next_attempt_at, later);
        assert!(entry.has_attempts_left());
    }

    #[test]
    fn status_round_trips_through_column_value() {
        for s in [
            UpdateStatus::Pending,
            UpdateStatus::Processing,
            UpdateStatus::Completed,
            UpdateStatus::Failed,
        ] {
            assert_eq!(UpdateStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(UpdateStatus::parse("done"), None);
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        let key = ShipmentRef::new("s").unwrap().key();
        let e = PendingStateUpdate::new(key, 1, 2, 0, Timestamp::now());
        assert_eq!(e.max_attempts, 1);
        assert!(e.has_attempts_left());
    }

    #[test]
    fn failures_stop_at_max_attempts() {
        let key = ShipmentRef::new("s").unwrap().key();
        let now = Timestamp::now();
        let mut e = PendingStateUpdate::new(key, 1, 2, 2, now);
        e.status = UpdateStatus::Processing;

        e.record_failure("timeout", Some(now.plus_secs(1)), now);
        assert_eq!(e.status, UpdateStatus::Pending);
        assert_eq!(e.next_attempt_at, now.plus_secs(1));

        e.record_failure("timeout", Some(now.plus_secs(2)), now);
        assert_eq!(e.status, UpdateStatus::Failed);
        assert_eq!(e.attempts, 2);
        assert_eq!(e.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn no_retry_time_fails_immediately() {
        let key = ShipmentRef::new("s").unwrap().key();
        let mut e = PendingStateUpdate::new(key, 1, 2, 5, Timestamp::now());
        e.record_failure("rejected", None, Timestamp::now());
        assert_eq!(e.status, UpdateStatus::Failed);
    }
}
