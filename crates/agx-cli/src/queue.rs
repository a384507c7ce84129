//! # Queue Subcommand
//!
//! Operator access to the pending-update queue: list entries, put a
//! failed entry back in line, or close one for good with a note.

use agx_sync::{PendingQueue, PendingStateUpdate, UpdateStatus};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::config::AgxConfig;
use crate::runtime::open_stores;

/// Arguments for `agx queue`.
#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,
}

/// Queue subcommands.
#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// List entries, optionally only those in one status.
    List {
        /// pending, processing, completed, or failed.
        #[arg(long)]
        status: Option<String>,
    },

    /// Reset a failed entry to pending with its attempts cleared.
    Retry {
        /// Entry id.
        #[arg(long)]
        id: Uuid,
    },

    /// Fail an entry permanently.
    Dismiss {
        /// Entry id.
        #[arg(long)]
        id: Uuid,
        /// Why the entry is being closed.
        #[arg(long)]
        note: String,
    },
}

/// Entry point for `agx queue`.
pub async fn run_queue(args: &QueueArgs, config: &AgxConfig) -> Result<u8> {
    let stores = open_stores(config).await?;
    execute(&args.command, stores.queue.as_ref()).await
}

/// Run `command` against `queue`, printing JSON to stdout.
pub async fn execute(command: &QueueCommand, queue: &dyn PendingQueue) -> Result<u8> {
    match command {
        QueueCommand::List { status } => {
            let entries = list(queue, status.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        QueueCommand::Retry { id } => {
            let entry = queue.retry(*id).await.with_context(|| format!("retrying {id}"))?;
            tracing::info!(%id, shipment = %entry.shipment, "entry returned to the queue");
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        QueueCommand::Dismiss { id, note } => {
            if note.trim().is_empty() {
                bail!("a dismissal needs a note");
            }
            let entry = queue
                .dismiss(*id, note)
                .await
                .with_context(|| format!("dismissing {id}"))?;
            tracing::info!(%id, shipment = %entry.shipment, "entry dismissed");
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
    }
    Ok(0)
}

/// Entries in `status`, or all entries.
pub async fn list(queue: &dyn PendingQueue, status: Option<&str>) -> Result<Vec<PendingStateUpdate>> {
    let filter = match status {
        Some(raw) => match UpdateStatus::parse(raw) {
            Some(status) => Some(status),
            None => bail!("unknown status {raw:?}; expected pending, processing, completed, or failed"),
        },
        None => None,
    };
    Ok(queue.list(filter).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::{ShipmentRef, Timestamp};
    use agx_sync::MemoryQueue;

    async fn failed_entry(queue: &MemoryQueue) -> Uuid {
        let key = ShipmentRef::new("S-queue").unwrap().key();
        let entry = queue.enqueue(key, 1, 2, 1).await.unwrap();
        let claimed = queue.claim_due(Timestamp::now(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        queue
            .fail_attempt(entry.id, "timed out", None)
            .await
            .unwrap();
        entry.id
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let queue = MemoryQueue::new();
        failed_entry(&queue).await;
        assert_eq!(list(&queue, Some("failed")).await.unwrap().len(), 1);
        assert!(list(&queue, Some("pending")).await.unwrap().is_empty());
        assert_eq!(list(&queue, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_status_is_an_error() {
        let queue = MemoryQueue::new();
        assert!(list(&queue, Some("stuck")).await.is_err());
    }

    #[tokio::test]
    async fn retry_puts_a_failed_entry_back() {
        let queue = MemoryQueue::new();
        let id = failed_entry(&queue).await;
        execute(&QueueCommand::Retry { id }, &queue).await.unwrap();
        let entry = queue.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, UpdateStatus::Pending);
        assert_eq!(entry.attempts, 0);
    }

    #[tokio::test]
    async fn dismiss_requires_a_note() {
        let queue = MemoryQueue::new();
        let id = failed_entry(&queue).await;
        let cmd = QueueCommand::Dismiss {
            id,
            note: " ".into(),
        };
        assert!(execute(&cmd, &queue).await.is_err());
    }
}
