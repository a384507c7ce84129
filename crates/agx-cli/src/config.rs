//! # Operator Configuration
//!
//! [`AgxConfig`] is read from an optional YAML file and then overridden
//! from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `AGX_RPC_URL` | `rpc_url` |
//! | `AGX_CHAIN_ID` | `chain_id` |
//! | `AGX_SHIPMENT_CONTRACT` | `shipment_contract` |
//! | `AGX_ESCROW_CONTRACT` | `escrow_contract` |
//! | `AGX_PAYMENT_TOKEN` | `payment_token` |
//! | `AGX_ATTESTOR_ADDRESS` | `attestor_address` |
//! | `DATABASE_URL` | `database_url` |
//! | `AGX_POLL_INTERVAL_MS` | `poll_interval_ms` |
//! | `AGX_MAX_ATTEMPTS` | `max_attempts` |
//! | `AGX_CONFIRMATION_TIMEOUT_SECS` | `confirmation_timeout_secs` |
//! | `AGX_SKEW_WINDOW_SECS` | `skew_window_secs` |
//! | `AGX_CANCEL_WINDOW_SECS` | `cancel_window_secs` |
//!
//! The attestor's private key is never part of the file. It is read from
//! `AGX_ATTESTOR_KEY` by the signer when one is needed.

use std::path::Path;
use std::time::Duration;

use agx_coordinator::CoordinatorConfig;
use agx_core::Address;
use agx_crypto::AttestationConfig;
use agx_ledger::{LedgerConfig, ReceiptPolicy};
use agx_sync::WorkerConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable holding the attestor's secp256k1 key.
pub const ATTESTOR_KEY_VAR: &str = "AGX_ATTESTOR_KEY";

/// Everything the binary needs to reach the ledger and the database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgxConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: Option<String>,
    /// EVM chain id.
    pub chain_id: u64,
    /// Shipment registry contract.
    pub shipment_contract: Option<Address>,
    /// Escrow contract.
    pub escrow_contract: Option<Address>,
    /// ERC-20 used for payments; its `Approval` logs are followed.
    pub payment_token: Option<Address>,
    /// Account that submits attestor-signed calls. Defaults to the key's
    /// own address.
    pub attestor_address: Option<Address>,
    /// Postgres URL. Absent means in-memory stores.
    pub database_url: Option<String>,
    /// Ledger and queue poll interval.
    pub poll_interval_ms: u64,
    /// Attempts per queued state update.
    pub max_attempts: u32,
    /// Receipt wait bound.
    pub confirmation_timeout_secs: u64,
    /// Accepted clock skew on attestation timestamps.
    pub skew_window_secs: u64,
    /// Payer cancellation window after a deposit.
    pub cancel_window_secs: u64,
    /// Block confirmations before a receipt or event counts.
    pub confirmations: u64,
    /// Decimals of the payment token.
    pub token_decimals: u8,
}

impl Default for AgxConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            chain_id: 31_337,
            shipment_contract: None,
            escrow_contract: None,
            payment_token: None,
            attestor_address: None,
            database_url: None,
            poll_interval_ms: 2_000,
            max_attempts: 3,
            confirmation_timeout_secs: 60,
            skew_window_secs: 300,
            cancel_window_secs: 3_600,
            confirmations: 1,
            token_decimals: 18,
        }
    }
}

impl std::fmt::Debug for AgxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgxConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("shipment_contract", &self.shipment_contract)
            .field("escrow_contract", &self.escrow_contract)
            .field("payment_token", &self.payment_token)
            .field("attestor_address", &self.attestor_address)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_attempts", &self.max_attempts)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .field("skew_window_secs", &self.skew_window_secs)
            .field("cancel_window_secs", &self.cancel_window_secs)
            .field("confirmations", &self.confirmations)
            .field("token_decimals", &self.token_decimals)
            .finish()
    }
}

impl AgxConfig {
    /// Read `path` (when given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parse a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from `lookup`, which maps a variable name to its
    /// value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("AGX_RPC_URL") {
            self.rpc_url = Some(v);
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.database_url = Some(v);
        }
        override_parsed(&lookup, "AGX_CHAIN_ID", &mut self.chain_id)?;
        override_address(&lookup, "AGX_SHIPMENT_CONTRACT", &mut self.shipment_contract)?;
        override_address(&lookup, "AGX_ESCROW_CONTRACT", &mut self.escrow_contract)?;
        override_address(&lookup, "AGX_PAYMENT_TOKEN", &mut self.payment_token)?;
        override_address(&lookup, "AGX_ATTESTOR_ADDRESS", &mut self.attestor_address)?;
        override_parsed(&lookup, "AGX_POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;
        override_parsed(&lookup, "AGX_MAX_ATTEMPTS", &mut self.max_attempts)?;
        override_parsed(&lookup, "AGX_CONFIRMATION_TIMEOUT_SECS", &mut self.confirmation_timeout_secs)?;
        override_parsed(&lookup, "AGX_SKEW_WINDOW_SECS", &mut self.skew_window_secs)?;
        override_parsed(&lookup, "AGX_CANCEL_WINDOW_SECS", &mut self.cancel_window_secs)?;
        Ok(())
    }

    /// Contract addresses and chain id for the ledger client. Both contract
    /// addresses are required.
    pub fn ledger_config(&self) -> Result<LedgerConfig> {
        let Some(shipment) = self.shipment_contract else {
            bail!("shipment_contract is not configured (AGX_SHIPMENT_CONTRACT)");
        };
        let Some(escrow) = self.escrow_contract else {
            bail!("escrow_contract is not configured (AGX_ESCROW_CONTRACT)");
        };
        let mut ledger = LedgerConfig::new(self.chain_id, shipment, escrow).with_confirmations(self.confirmations);
        if let Some(token) = self.payment_token {
            ledger = ledger.watch_token(token);
        }
        Ok(ledger)
    }

    /// Signing parameters.
    pub fn attestation_config(&self) -> AttestationConfig {
        AttestationConfig::default()
            .with_chain_id(self.chain_id)
            .with_skew_window_secs(self.skew_window_secs)
    }

    /// Receipt wait bound.
    pub fn receipt_policy(&self) -> ReceiptPolicy {
        ReceiptPolicy {
            timeout: Duration::from_secs(self.confirmation_timeout_secs),
            confirmations: self.confirmations.max(1),
            ..ReceiptPolicy::default()
        }
    }

    /// Retry worker settings.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval(),
            receipt: self.receipt_policy(),
            ..WorkerConfig::default()
        }
    }

    /// Coordinator settings.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default()
            .with_token_decimals(self.token_decimals)
            .with_cancel_window_secs(self.cancel_window_secs)
            .with_max_attempts(self.max_attempts)
            .with_receipt_policy(self.receipt_policy());
        if let Some(operator) = self.attestor_address {
            config = config.with_operator(operator);
        }
        config
    }

    /// Ledger and queue poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str, field: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(var) {
        *field = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{var}={raw:?}: {e}"))?;
    }
    Ok(())
}

fn override_address(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    field: &mut Option<Address>,
) -> Result<()> {
    if let Some(raw) = lookup(var) {
        let address = Address::parse(raw.trim()).with_context(|| format!("{var}={raw:?}"))?;
        *field = Some(address);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    const SHIPMENTS: &str = "0x5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e";
    const ESCROW: &str = "0xe5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5";

    #[test]
    fn yaml_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "rpc_url: https://rpc.example\nchain_id: 137\nshipment_contract: \"{SHIPMENTS}\"\nescrow_contract: \"{ESCROW}\"\nmax_attempts: 5"
        )
        .unwrap();
        let cfg = AgxConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.chain_id, 137);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.poll_interval_ms, 2_000);
        let ledger = cfg.ledger_config().unwrap();
        assert_eq!(ledger.shipment_contract, Address::parse(SHIPMENTS).unwrap());
    }

    #[test]
    fn unknown_keys_are_refused() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chain_idd: 1").unwrap();
        assert!(AgxConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut cfg = AgxConfig {
            chain_id: 1,
            ..AgxConfig::default()
        };
        cfg.apply_env(env(&[
            ("AGX_CHAIN_ID", "80002"),
            ("AGX_ESCROW_CONTRACT", ESCROW),
            ("AGX_CANCEL_WINDOW_SECS", "600"),
            ("DATABASE_URL", "postgres://agx:secret@db/agx"),
        ]))
        .unwrap();
        assert_eq!(cfg.chain_id, 80_002);
        assert_eq!(cfg.cancel_window_secs, 600);
        assert_eq!(cfg.escrow_contract, Some(Address::parse(ESCROW).unwrap()));
        assert_eq!(cfg.coordinator_config().cancel_window_secs, 600);
    }

    #[test]
    fn malformed_override_names_the_variable() {
        let mut cfg = AgxConfig::default();
        let err = cfg.apply_env(env(&[("AGX_MAX_ATTEMPTS", "many")])).unwrap_err();
        assert!(err.to_string().contains("AGX_MAX_ATTEMPTS"));
    }

    #[test]
    fn missing_contracts_are_reported() {
        let err = AgxConfig::default().ledger_config().unwrap_err();
        assert!(err.to_string().contains("AGX_SHIPMENT_CONTRACT"));
    }

    #[test]
    fn debug_redacts_database_url() {
        let cfg = AgxConfig {
            database_url: Some("postgres://agx:hunter2@db/agx".into()),
            ..AgxConfig::default()
        };
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn attestor_address_becomes_operator() {
        let mut cfg = AgxConfig::default();
        cfg.apply_env(env(&[("AGX_ATTESTOR_ADDRESS", SHIPMENTS)])).unwrap();
        assert_eq!(cfg.coordinator_config().operator, Some(Address::parse(SHIPMENTS).unwrap()));
    }
}
