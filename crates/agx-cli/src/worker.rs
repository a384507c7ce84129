//! # Worker Subcommand
//!
//! Runs the event subscriber, the projector, and the retry worker until
//! Ctrl-C. The projector is caught up from its cursor before the
//! subscriber starts, so a restart resumes where the last run stopped.

use std::sync::Arc;
use std::time::Duration;

use agx_coordinator::Coordinator;
use agx_crypto::MemoryContentStore;
use agx_sync::{EventProjector, EventSubscriber, ProjectorConfig, RetryWorker, WorkerReport};
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::config::AgxConfig;
use crate::runtime::Runtime;

/// Arguments for `agx worker`.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Run against an in-process ledger instead of `AGX_RPC_URL`.
    #[arg(long)]
    pub mock: bool,

    /// Catch up and drain the queue once, then exit.
    #[arg(long)]
    pub once: bool,

    /// Start following the ledger at this block instead of the stored
    /// cursor.
    #[arg(long)]
    pub from_block: Option<u64>,
}

/// What a `--once` pass did.
#[derive(Debug, Serialize)]
pub struct PassSummary {
    /// Events applied by the projector.
    pub events_applied: usize,
    /// Queue entries completed.
    pub completed: usize,
    /// Queue entries rescheduled.
    pub retried: usize,
    /// Queue entries failed for good.
    pub failed: usize,
}

/// Wired components.
pub struct Worker {
    projector: Arc<EventProjector>,
    retry: Arc<RetryWorker>,
    runtime: Runtime,
    poll_interval: Duration,
}

impl Worker {
    /// Wire the projector (with the coordinator's observers) and the retry
    /// worker over `runtime`.
    pub fn new(runtime: Runtime, config: &AgxConfig) -> Self {
        let coordinator = Coordinator::new(
            runtime.stores.projection.clone(),
            runtime.ledger.clone(),
            runtime.attestor.clone(),
            Arc::new(MemoryContentStore::new()),
            config.coordinator_config(),
        );
        let mut projector = EventProjector::new(
            runtime.stores.projection.clone(),
            runtime.stores.queue.clone(),
            runtime.ledger.clone(),
            ProjectorConfig {
                max_attempts: config.max_attempts,
            },
        );
        for observer in coordinator.observers() {
            projector.observe(observer);
        }
        let retry = RetryWorker::new(
            runtime.stores.queue.clone(),
            runtime.ledger.clone(),
            runtime.attestor.clone(),
            runtime.operator,
            config.worker_config(),
        );
        Self {
            projector: Arc::new(projector),
            retry: Arc::new(retry),
            runtime,
            poll_interval: config.poll_interval(),
        }
    }

    /// Catch up once and drain whatever is due.
    pub async fn pass(&self) -> Result<PassSummary> {
        let events_applied = self.projector.catch_up().await.context("catching up the projection")?;
        let WorkerReport {
            completed,
            retried,
            failed,
        } = self.retry.process_due().await.context("draining the pending queue")?;
        Ok(PassSummary {
            events_applied,
            completed,
            retried,
            failed,
        })
    }

    /// Follow the ledger until `shutdown` flips.
    pub async fn run(self, from_block: Option<u64>, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.projector.catch_up().await.context("catching up the projection")?;
        let start = match from_block {
            Some(block) => block,
            None => self
                .runtime
                .stores
                .projection
                .cursor()
                .await?
                .map_or(0, |c| c.block),
        };
        tracing::info!(start, "following the ledger");

        let (events_tx, events_rx) = mpsc::channel(256);
        let subscriber = EventSubscriber::new(self.runtime.ledger.clone(), self.poll_interval, start);
        let subscriber = tokio::spawn(subscriber.run(events_tx, shutdown.clone()));

        let projector = self.projector.clone();
        let projector_shutdown = shutdown.clone();
        let projector = tokio::spawn(async move { projector.run(events_rx, projector_shutdown).await });

        let retry = self.retry.clone();
        let retry = tokio::spawn(async move { retry.run(shutdown).await });

        subscriber.await.context("subscriber task")?;
        projector.await.context("projector task")?;
        retry.await.context("retry task")??;
        Ok(())
    }
}

/// Entry point for `agx worker`.
pub async fn run_worker(args: &WorkerArgs, config: &AgxConfig) -> Result<u8> {
    let runtime = if args.mock {
        Runtime::mock(config).await?
    } else {
        Runtime::connect(config).await?
    };
    let worker = Worker::new(runtime, config);

    if args.once {
        let summary = worker.pass().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(0);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            return;
        }
        tracing::info!("shutting down");
        let _ = shutdown_tx.send(true);
    });
    worker.run(args.from_block, shutdown_rx).await?;
    Ok(0)
}
