//! Projection persistence: shipments, escrows, disputes, deposit intents,
//! processed events, and the ledger cursor.

use agx_arbitration::{Dispute, EscrowRecord};
use agx_core::{DisputeId, EventId, LedgerPosition, ShipmentKey, TxHash};
use agx_state::Shipment;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;

use super::{to_i64, to_u64};
use crate::error::SyncError;
use crate::model::DepositIntent;
use crate::store::ProjectionStore;

/// Record tables. Every one has `(record_key, shipment_key, doc, version,
/// updated_at)`.
#[derive(Debug, Clone, Copy)]
enum Table {
    Shipments,
    Escrows,
    Disputes,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Self::Shipments => "shipments",
            Self::Escrows => "escrows",
            Self::Disputes => "disputes",
        }
    }

    fn kind(self) -> &'static str {
        match self {
            Self::Shipments => "shipment",
            Self::Escrows => "escrow",
            Self::Disputes => "dispute",
        }
    }
}

#[derive(sqlx::FromRow)]
struct DocRow {
    record_key: String,
    doc: serde_json::Value,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    block_number: i64,
    log_index: i64,
}

/// Postgres [`ProjectionStore`].
#[derive(Debug, Clone)]
pub struct PgProjectionStore {
    pool: PgPool,
}

impl PgProjectionStore {
    /// Wrap a migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load<T: DeserializeOwned>(
        &self,
        table: Table,
        key: &str,
        set_version: impl Fn(&mut T, u64),
    ) -> Result<Option<T>, SyncError> {
        let sql = format!(
            "SELECT record_key, doc, version FROM {} WHERE record_key = $1",
            table.name()
        );
        let row = sqlx::query_as::<_, DocRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(table, r, &set_version)).transpose()
    }

    async fn load_for_shipment<T: DeserializeOwned>(
        &self,
        table: Table,
        shipment: Option<&ShipmentKey>,
        set_version: impl Fn(&mut T, u64),
    ) -> Result<Vec<T>, SyncError> {
        let rows = match shipment {
            Some(key) => {
                let sql = format!(
                    "SELECT record_key, doc, version FROM {} WHERE shipment_key = $1 ORDER BY created_at, record_key",
                    table.name()
                );
                sqlx::query_as::<_, DocRow>(&sql)
                    .bind(key.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT record_key, doc, version FROM {} ORDER BY created_at, record_key",
                    table.name()
                );
                sqlx::query_as::<_, DocRow>(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.into_iter()
            .map(|r| decode(table, r, &set_version))
            .collect()
    }

    /// Conditional write. `None` inserts only if absent; `Some(v)` updates
    /// only while the row is still at `v`.
    async fn cas<T: Serialize>(
        &self,
        table: Table,
        key: &str,
        shipment: &ShipmentKey,
        record: &T,
        expected: Option<u64>,
    ) -> Result<u64, SyncError> {
        let next = expected.map_or(0, |v| v + 1);
        let mut doc = serde_json::to_value(record).map_err(|e| SyncError::Storage(format!(
            "failed to serialize {} {key}: {e}",
            table.kind()
        )))?;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("version".into(), serde_json::Value::from(next));
        }

        let written = match expected {
            None => {
                let sql = format!(
                    "INSERT INTO {} (record_key, shipment_key, doc, version, created_at, updated_at)
                     VALUES ($1, $2, $3, 0, now(), now())
                     ON CONFLICT (record_key) DO NOTHING",
                    table.name()
                );
                sqlx::query(&sql)
                    .bind(key)
                    .bind(shipment.to_string())
                    .bind(&doc)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
            Some(v) => {
                let sql = format!(
                    "UPDATE {} SET doc = $2, version = $3, updated_at = now()
                     WHERE record_key = $1 AND version = $4",
                    table.name()
                );
                sqlx::query(&sql)
                    .bind(key)
                    .bind(&doc)
                    .bind(to_i64("version", next)?)
                    .bind(to_i64("version", v)?)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
        };
        if written == 1 {
            return Ok(next);
        }

        let sql = format!("SELECT version FROM {} WHERE record_key = $1", table.name());
        let found: Option<i64> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let found = found.map(|v| to_u64(table.kind(), key, v)).transpose()?;
        Err(SyncError::version_mismatch(table.kind(), key, expected, found))
    }
}

fn decode<T: DeserializeOwned>(
    table: Table,
    row: DocRow,
    set_version: &impl Fn(&mut T, u64),
) -> Result<T, SyncError> {
    let mut record: T = serde_json::from_value(row.doc).map_err(|e| SyncError::Corrupt {
        kind: table.kind(),
        key: row.record_key.clone(),
        reason: e.to_string(),
    })?;
    set_version(&mut record, to_u64(table.kind(), &row.record_key, row.version)?);
    Ok(record)
}

#[async_trait]
impl ProjectionStore for PgProjectionStore {
    async fn shipment(&self, key: &ShipmentKey) -> Result<Option<Shipment>, SyncError> {
        self.load(Table::Shipments, &key.to_string(), |s: &mut Shipment, v| s.version = v)
            .await
    }

    async fn save_shipment(&self, shipment: &Shipment, expected: Option<u64>) -> Result<u64, SyncError> {
        self.cas(
            Table::Shipments,
            &shipment.key.to_string(),
            &shipment.key,
            shipment,
            expected,
        )
        .await
    }

    async fn shipments(&self) -> Result<Vec<Shipment>, SyncError> {
        self.load_for_shipment(Table::Shipments, None, |s: &mut Shipment, v| s.version = v)
            .await
    }

    async fn escrow(&self, key: &ShipmentKey) -> Result<Option<EscrowRecord>, SyncError> {
        self.load(Table::Escrows, &key.to_string(), |e: &mut EscrowRecord, v| e.version = v)
            .await
    }

    async fn save_escrow(&self, escrow: &EscrowRecord, expected: Option<u64>) -> Result<u64, SyncError> {
        let key = escrow.shipment();
        self.cas(Table::Escrows, &key.to_string(), key, escrow, expected)
            .await
    }

    async fn dispute(&self, id: DisputeId) -> Result<Option<Dispute>, SyncError> {
        self.load(Table::Disputes, &id.to_string(), |d: &mut Dispute, v| d.version = v)
            .await
    }

    async fn save_dispute(&self, dispute: &Dispute, expected: Option<u64>) -> Result<u64, SyncError> {
        self.cas(
            Table::Disputes,
            &dispute.id.to_string(),
            &dispute.shipment,
            dispute,
            expected,
        )
        .await
    }

    async fn disputes_for(&self, key: &ShipmentKey) -> Result<Vec<Dispute>, SyncError> {
        let mut out = self
            .load_for_shipment(Table::Disputes, Some(key), |d: &mut Dispute, v| d.version = v)
            .await?;
        out.sort_by_key(|d| d.id);
        Ok(out)
    }

    async fn save_deposit_intent(&self, intent: &DepositIntent) -> Result<(), SyncError> {
        let doc = serde_json::to_value(intent)
            .map_err(|e| SyncError::Storage(format!("failed to serialize deposit intent: {e}")))?;
        sqlx::query(
            "INSERT INTO deposit_intents (shipment_key, approve_tx, doc, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (shipment_key) DO UPDATE SET
                approve_tx = EXCLUDED.approve_tx,
                doc = EXCLUDED.doc,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(intent.shipment().to_string())
        .bind(intent.approve_tx().map(|t| t.to_string()))
        .bind(&doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deposit_intent(&self, key: &ShipmentKey) -> Result<Option<DepositIntent>, SyncError> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM deposit_intents WHERE shipment_key = $1")
                .bind(key.to_string())
                .fetch_optional(&self.pool)
                .await?;
        doc.map(|d| decode_intent(&key.to_string(), d)).transpose()
    }

    async fn intent_for_approval(&self, approve_tx: &TxHash) -> Result<Option<DepositIntent>, SyncError> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM deposit_intents WHERE approve_tx = $1")
                .bind(approve_tx.to_string())
                .fetch_optional(&self.pool)
                .await?;
        doc.map(|d| decode_intent(&approve_tx.to_string(), d)).transpose()
    }

    async fn remove_deposit_intent(&self, key: &ShipmentKey) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM deposit_intents WHERE shipment_key = $1")
            .bind(key.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_processed(&self, id: &EventId) -> Result<bool, SyncError> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM processed_events WHERE tx_hash = $1 AND log_index = $2",
        )
        .bind(id.tx_hash.to_string())
        .bind(to_i64("log index", id.log_index)?)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn mark_processed(&self, id: &EventId) -> Result<bool, SyncError> {
        let inserted = sqlx::query(
            "INSERT INTO processed_events (tx_hash, log_index, processed_at)
             VALUES ($1, $2, now())
             ON CONFLICT (tx_hash, log_index) DO NOTHING",
        )
        .bind(id.tx_hash.to_string())
        .bind(to_i64("log index", id.log_index)?)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn cursor(&self) -> Result<Option<LedgerPosition>, SyncError> {
        let row = sqlx::query_as::<_, CursorRow>(
            "SELECT block_number, log_index FROM ledger_cursor WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| -> Result<LedgerPosition, SyncError> {
            Ok(LedgerPosition::new(
                to_u64("cursor", "block", r.block_number)?,
                to_u64("cursor", "log_index", r.log_index)?,
            ))
        })
        .transpose()
    }

    async fn advance_cursor(&self, position: LedgerPosition) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO ledger_cursor (id, block_number, log_index) VALUES (1, $1, $2)
             ON CONFLICT (id) DO UPDATE SET
                block_number = EXCLUDED.block_number,
                log_index = EXCLUDED.log_index
             WHERE (ledger_cursor.block_number, ledger_cursor.log_index)
                 < (EXCLUDED.block_number, EXCLUDED.log_index)",
        )
        .bind(to_i64("block", position.block)?)
        .bind(to_i64("log index", position.log_index)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode_intent(key: &str, doc: serde_json::Value) -> Result<DepositIntent, SyncError> {
    serde_json::from_value(doc).map_err(|e| SyncError::Corrupt {
        kind: "deposit intent",
        key: key.to_string(),
        reason: e.to_string(),
    })
}
