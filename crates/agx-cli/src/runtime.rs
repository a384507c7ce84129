//! # Backend Assembly
//!
//! Builds the ledger client, stores, and attestation service the
//! subcommands run on. With `DATABASE_URL` unset the stores are in-memory
//! and the binary says so; with `--mock` the ledger is an in-process
//! [`MockLedger`] and nothing leaves the machine.

use std::sync::Arc;

use agx_core::Address;
use agx_crypto::{AttestationService, AttestationSigner, EnvKeySigner, LocalKeySigner};
use agx_ledger::evm::EvmConfig;
use agx_ledger::{EvmLedger, LedgerClient, MockLedger};
use agx_sync::db::{self, PgProjectionStore, PgQueue};
use agx_sync::{MemoryQueue, MemoryStore, PendingQueue, ProjectionStore};
use anyhow::{Context, Result};

use crate::config::{AgxConfig, ATTESTOR_KEY_VAR};

/// Projection store and pending queue.
pub struct Stores {
    /// Shipments, escrows, disputes, cursor.
    pub projection: Arc<dyn ProjectionStore>,
    /// Pending state updates.
    pub queue: Arc<dyn PendingQueue>,
    /// Whether the stores are Postgres-backed.
    pub durable: bool,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").field("durable", &self.durable).finish()
    }
}

/// Open the Postgres stores, or in-memory ones when no database is
/// configured.
pub async fn open_stores(config: &AgxConfig) -> Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let pool = db::connect(url).await.context("connecting to DATABASE_URL")?;
            Ok(Stores {
                projection: Arc::new(PgProjectionStore::new(pool.clone())),
                queue: Arc::new(PgQueue::new(pool)),
                durable: true,
            })
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only. \
                 Projection and queue will not survive restarts."
            );
            Ok(Stores {
                projection: Arc::new(MemoryStore::new()),
                queue: Arc::new(MemoryQueue::new()),
                durable: false,
            })
        }
    }
}

/// The attestor signer from `AGX_ATTESTOR_KEY`.
pub fn env_signer() -> Result<Arc<dyn AttestationSigner>> {
    let signer = EnvKeySigner::from_env(ATTESTOR_KEY_VAR).with_context(|| format!("loading {ATTESTOR_KEY_VAR}"))?;
    Ok(Arc::new(signer))
}

/// The attestation service for `config`, signing with `signer`.
pub fn attestation_service(config: &AgxConfig, signer: Arc<dyn AttestationSigner>) -> Arc<AttestationService> {
    Arc::new(AttestationService::new(config.attestation_config(), signer))
}

/// Everything the worker needs.
pub struct Runtime {
    /// Ledger client.
    pub ledger: Arc<dyn LedgerClient>,
    /// Stores.
    pub stores: Stores,
    /// Signs state updates.
    pub attestor: Arc<AttestationService>,
    /// Account submitting attestor-signed calls.
    pub operator: Address,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("chain_id", &self.ledger.config().chain_id)
            .field("stores", &self.stores)
            .field("attestor", &self.attestor.signer_address())
            .field("operator", &self.operator)
            .finish()
    }
}

impl Runtime {
    /// Connect to the configured RPC endpoint and stores.
    pub async fn connect(config: &AgxConfig) -> Result<Self> {
        let rpc_url = config
            .rpc_url
            .clone()
            .context("rpc_url is not configured (AGX_RPC_URL)")?;
        let ledger = EvmLedger::new(
            EvmConfig::new(rpc_url, config.ledger_config()?).with_timeout_secs(config.confirmation_timeout_secs),
        )
        .context("building the JSON-RPC client")?;
        let attestor = attestation_service(config, env_signer()?);
        Self::assemble(config, Arc::new(ledger), attestor).await
    }

    /// An in-process ledger that already trusts the attestor. Uses
    /// `AGX_ATTESTOR_KEY` when set, a throwaway key otherwise.
    pub async fn mock(config: &AgxConfig) -> Result<Self> {
        let ledger_config = config
            .ledger_config()
            .unwrap_or_else(|_| MockLedger::local().config().clone());
        let ledger = MockLedger::new(ledger_config).with_skew_window_secs(config.skew_window_secs);
        let signer: Arc<dyn AttestationSigner> = match env_signer() {
            Ok(signer) => signer,
            Err(_) => {
                tracing::warn!("{ATTESTOR_KEY_VAR} not set, signing with a throwaway key");
                Arc::new(LocalKeySigner::generate())
            }
        };
        let attestor = attestation_service(config, signer);
        ledger.register_attestor(attestor.signer_address());
        Self::assemble(config, Arc::new(ledger), attestor).await
    }

    async fn assemble(
        config: &AgxConfig,
        ledger: Arc<dyn LedgerClient>,
        attestor: Arc<AttestationService>,
    ) -> Result<Self> {
        let stores = open_stores(config).await?;
        let operator = config.attestor_address.unwrap_or_else(|| attestor.signer_address());
        tracing::info!(
            chain_id = ledger.config().chain_id,
            %operator,
            durable = stores.durable,
            "runtime assembled"
        );
        Ok(Self {
            ledger,
            stores,
            attestor,
            operator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_database_means_memory_stores() {
        let stores = open_stores(&AgxConfig::default()).await.unwrap();
        assert!(!stores.durable);
        assert!(stores.projection.cursor().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mock_runtime_uses_local_contracts_without_config() {
        let runtime = Runtime::mock(&AgxConfig::default()).await.unwrap();
        assert_eq!(runtime.ledger.config().chain_id, 31_337);
        assert_eq!(runtime.operator, runtime.attestor.signer_address());
    }

    #[tokio::test]
    async fn connect_requires_an_rpc_url() {
        let err = Runtime::connect(&AgxConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("AGX_RPC_URL"));
    }
}
