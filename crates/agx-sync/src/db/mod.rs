//! # Database Persistence Layer
//!
//! Postgres backends for the projection store and the pending queue, via
//! SQLx.
//!
//! The database is **optional**. When `DATABASE_URL` is set the worker
//! persists shipments, escrows, disputes, deposit intents, processed event
//! ids, the ledger cursor, and the pending-update queue. When absent it runs
//! on the in-memory backends and nothing survives a restart.
//!
//! Records are stored as JSONB documents next to a `version` column; every
//! write is a conditional update on that column.

pub mod projection;
pub mod queue;

pub use projection::PgProjectionStore;
pub use queue::PgQueue;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::SyncError;

/// Initialize the connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only. \
                 Projection and queue will not survive restarts."
            );
            return Ok(None);
        }
    };
    connect(&url).await.map(Some)
}

/// Connect to `url` and run migrations.
pub async fn connect(url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;
    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

pub(crate) fn to_i64(kind: &'static str, value: u64) -> Result<i64, SyncError> {
    i64::try_from(value).map_err(|_| SyncError::Storage(format!("{kind} {value} exceeds BIGINT")))
}

pub(crate) fn to_u64(kind: &'static str, key: &str, value: i64) -> Result<u64, SyncError> {
    u64::try_from(value).map_err(|_| SyncError::Corrupt {
        kind,
        key: key.to_string(),
        reason: format!("negative {value}"),
    })
}
