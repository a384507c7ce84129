//! # Ledger Configuration

use agx_core::Address;
use serde::{Deserialize, Serialize};

/// Addresses and chain parameters shared by every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// EVM chain id.
    pub chain_id: u64,
    /// Shipment registry contract (shipments, attestations, disputes).
    pub shipment_contract: Address,
    /// Escrow contract.
    pub escrow_contract: Address,
    /// ERC-20 tokens whose `Approval` logs the projector follows.
    #[serde(default)]
    pub watched_tokens: Vec<Address>,
    /// Blocks after inclusion before a receipt counts as confirmed.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

fn default_confirmations() -> u64 {
    1
}

impl LedgerConfig {
    /// Configuration with one confirmation and no watched tokens.
    pub fn new(chain_id: u64, shipment_contract: Address, escrow_contract: Address) -> Self {
        Self {
            chain_id,
            shipment_contract,
            escrow_contract,
            watched_tokens: Vec::new(),
            confirmations: default_confirmations(),
        }
    }

    /// Follow `Approval` logs of `token`.
    pub fn watch_token(mut self, token: Address) -> Self {
        if !self.watched_tokens.contains(&token) {
            self.watched_tokens.push(token);
        }
        self
    }

    /// Set the confirmation depth.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Every address whose logs the projector reads.
    pub fn log_sources(&self) -> Vec<Address> {
        let mut out = vec![self.shipment_contract, self.escrow_contract];
        out.extend(self.watched_tokens.iter().copied());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_token_is_idempotent() {
        let token = Address::from_bytes([7; 20]);
        let cfg = LedgerConfig::new(1, Address::from_bytes([1; 20]), Address::from_bytes([2; 20]))
            .watch_token(token)
            .watch_token(token);
        assert_eq!(cfg.log_sources().len(), 3);
    }

    #[test]
    fn serde_defaults() {
        let cfg: LedgerConfig = serde_json::from_value(serde_json::json!({
            "chain_id": 84532,
            "shipment_contract": "0x0101010101010101010101010101010101010101",
            "escrow_contract": "0x0202020202020202020202020202020202020202"
        }))
        .unwrap();
        assert_eq!(cfg.confirmations, 1);
        assert!(cfg.watched_tokens.is_empty());
        assert_eq!(cfg.chain_id, 84532);
    }
}
