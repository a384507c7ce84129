//! Pending-update queue persistence.
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so several workers can drain one
//! table without claiming the same entry.

use agx_core::{Hash32, ShipmentKey, Timestamp, TxHash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{PendingStateUpdate, UpdateStatus};
use crate::queue::PendingQueue;

const COLUMNS: &str = "id, shipment_key, current_state, target_state, status, attempts, max_attempts, \
                       last_error, last_tx, next_attempt_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    shipment_key: String,
    current_state: i16,
    target_state: i16,
    status: String,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    last_tx: Option<String>,
    next_attempt_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QueueRow {
    fn into_entry(self) -> Result<PendingStateUpdate, SyncError> {
        let corrupt = |reason: String| SyncError::Corrupt {
            kind: "queue entry",
            key: self.id.to_string(),
            reason,
        };
        let shipment = Hash32::from_hex(&self.shipment_key)
            .map(ShipmentKey::from_hash)
            .map_err(|e| corrupt(e.to_string()))?;
        let status = UpdateStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status {}", self.status)))?;
        let last_tx = self
            .last_tx
            .as_deref()
            .map(TxHash::from_hex)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        Ok(PendingStateUpdate {
            id: self.id,
            shipment,
            current_state: u8::try_from(self.current_state)
                .map_err(|_| corrupt(format!("current state {}", self.current_state)))?,
            target_state: u8::try_from(self.target_state)
                .map_err(|_| corrupt(format!("target state {}", self.target_state)))?,
            status,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            max_attempts: u32::try_from(self.max_attempts).unwrap_or(1),
            last_error: self.last_error.clone(),
            last_tx,
            next_attempt_at: Timestamp::from_datetime(self.next_attempt_at),
            created_at: Timestamp::from_datetime(self.created_at),
            updated_at: Timestamp::from_datetime(self.updated_at),
        })
    }
}

fn count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Postgres [`PendingQueue`].
#[derive(Debug, Clone)]
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    /// Wrap a migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<PendingStateUpdate>, SyncError> {
        let sql = format!("SELECT {COLUMNS} FROM pending_state_updates WHERE id = $1");
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueueRow::into_entry).transpose()
    }

    /// The error for an update that matched no row: missing, or in the
    /// wrong status.
    async fn refused(&self, id: Uuid, operation: &'static str) -> SyncError {
        match self.fetch(id).await {
            Ok(Some(entry)) => SyncError::InvalidQueueOperation {
                id: id.to_string(),
                status: entry.status.to_string(),
                operation,
            },
            Ok(None) => SyncError::NotFound {
                kind: "queue entry",
                key: id.to_string(),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl PendingQueue for PgQueue {
    async fn enqueue(
        &self,
        shipment: ShipmentKey,
        current_state: u8,
        target_state: u8,
        max_attempts: u32,
    ) -> Result<PendingStateUpdate, SyncError> {
        let entry = PendingStateUpdate::new(shipment, current_state, target_state, max_attempts, Timestamp::now());
        sqlx::query(
            "INSERT INTO pending_state_updates
                (id, shipment_key, current_state, target_state, status, attempts, max_attempts,
                 next_attempt_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $7, $7)
             ON CONFLICT (shipment_key, target_state) DO UPDATE
                SET current_state = EXCLUDED.current_state, status = 'pending', attempts = 0,
                    max_attempts = EXCLUDED.max_attempts, last_error = NULL, last_tx = NULL,
                    next_attempt_at = EXCLUDED.next_attempt_at, updated_at = EXCLUDED.updated_at
                WHERE pending_state_updates.status IN ('completed', 'failed')",
        )
        .bind(entry.id)
        .bind(shipment.to_string())
        .bind(i16::from(current_state))
        .bind(i16::from(target_state))
        .bind(entry.status.as_str())
        .bind(count(entry.max_attempts))
        .bind(*entry.created_at.as_datetime())
        .execute(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {COLUMNS} FROM pending_state_updates WHERE shipment_key = $1 AND target_state = $2"
        );
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(shipment.to_string())
            .bind(i16::from(target_state))
            .fetch_one(&self.pool)
            .await?;
        row.into_entry()
    }

    async fn claim_due(&self, now: Timestamp, limit: usize) -> Result<Vec<PendingStateUpdate>, SyncError> {
        let sql = format!(
            "UPDATE pending_state_updates SET status = 'processing', updated_at = $1
             WHERE id IN (
                 SELECT id FROM pending_state_updates
                 WHERE status = 'pending' AND next_attempt_at <= $1
                 ORDER BY next_attempt_at, created_at
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {COLUMNS}"
        );
        let rows = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(*now.as_datetime())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        let mut claimed = rows
            .into_iter()
            .map(QueueRow::into_entry)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(claimed)
    }

    async fn mark_submitted(&self, id: Uuid, tx: TxHash) -> Result<(), SyncError> {
        let updated = sqlx::query(
            "UPDATE pending_state_updates SET last_tx = $2, updated_at = now()
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(tx.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(self.refused(id, "mark submitted").await);
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid) -> Result<(), SyncError> {
        let updated = sqlx::query(
            "UPDATE pending_state_updates SET status = 'completed', updated_at = now()
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            match self.fetch(id).await? {
                Some(e) if e.status == UpdateStatus::Completed => {}
                _ => return Err(self.refused(id, "complete").await),
            }
        }
        Ok(())
    }

    async fn complete_for(&self, shipment: &ShipmentKey, target_state: u8) -> Result<bool, SyncError> {
        let updated = sqlx::query(
            "UPDATE pending_state_updates SET status = 'completed', updated_at = now()
             WHERE shipment_key = $1 AND target_state = $2
               AND status IN ('pending', 'processing')",
        )
        .bind(shipment.to_string())
        .bind(i16::from(target_state))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn fail_attempt(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<Timestamp>,
    ) -> Result<PendingStateUpdate, SyncError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {COLUMNS} FROM pending_state_updates WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(mut entry) = row.map(QueueRow::into_entry).transpose()? else {
            return Err(SyncError::NotFound {
                kind: "queue entry",
                key: id.to_string(),
            });
        };
        if entry.status != UpdateStatus::Processing {
            return Err(SyncError::InvalidQueueOperation {
                id: id.to_string(),
                status: entry.status.to_string(),
                operation: "fail attempt",
            });
        }

        entry.record_failure(error, retry_at, Timestamp::now());
        sqlx::query(
            "UPDATE pending_state_updates
             SET status = $2, attempts = $3, last_error = $4, next_attempt_at = $5, updated_at = $6
             WHERE id = $1",
        )
        .bind(id)
        .bind(entry.status.as_str())
        .bind(count(entry.attempts))
        .bind(entry.last_error.as_deref())
        .bind(*entry.next_attempt_at.as_datetime())
        .bind(*entry.updated_at.as_datetime())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PendingStateUpdate>, SyncError> {
        self.fetch(id).await
    }

    async fn list(&self, status: Option<UpdateStatus>) -> Result<Vec<PendingStateUpdate>, SyncError> {
        let rows = match status {
            Some(s) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM pending_state_updates WHERE status = $1 ORDER BY created_at"
                );
                sqlx::query_as::<_, QueueRow>(&sql)
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {COLUMNS} FROM pending_state_updates ORDER BY created_at");
                sqlx::query_as::<_, QueueRow>(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.into_iter().map(QueueRow::into_entry).collect()
    }

    async fn retry(&self, id: Uuid) -> Result<PendingStateUpdate, SyncError> {
        let sql = format!(
            "UPDATE pending_state_updates
             SET status = 'pending', attempts = 0, next_attempt_at = $2, updated_at = $2
             WHERE id = $1 AND status = 'failed'
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(id)
            .bind(*Timestamp::now().as_datetime())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => r.into_entry(),
            None => Err(self.refused(id, "retry").await),
        }
    }

    async fn dismiss(&self, id: Uuid, note: &str) -> Result<PendingStateUpdate, SyncError> {
        let sql = format!(
            "UPDATE pending_state_updates
             SET status = 'failed', last_error = $2, updated_at = now()
             WHERE id = $1 AND status IN ('pending', 'failed')
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(id)
            .bind(format!("dismissed: {note}"))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => r.into_entry(),
            None => Err(self.refused(id, "dismiss").await),
        }
    }

    async fn release_stale(&self, before: Timestamp) -> Result<usize, SyncError> {
        let released = sqlx::query(
            "UPDATE pending_state_updates SET status = 'pending', next_attempt_at = $1
             WHERE status = 'processing' AND updated_at < $1",
        )
        .bind(*before.as_datetime())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(usize::try_from(released).unwrap_or(usize::MAX))
    }
}
