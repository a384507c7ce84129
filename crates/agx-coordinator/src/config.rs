//! # Coordinator Configuration

use std::time::Duration;

use agx_core::Address;
use agx_ledger::ReceiptPolicy;

/// Settings shared by the coordinator components.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Decimals of the payment token; ask prices are parsed with these.
    pub token_decimals: u8,
    /// Seconds after a deposit during which the payer may cancel.
    pub cancel_window_secs: u64,
    /// `max_attempts` for queued state updates.
    pub max_attempts: u32,
    /// How long to wait for each receipt.
    pub receipt: ReceiptPolicy,
    /// Account that submits attestor-signed calls and escrow holds. Falls
    /// back to the attestor's own address.
    pub operator: Option<Address>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            token_decimals: 18,
            cancel_window_secs: 3600,
            max_attempts: 3,
            receipt: ReceiptPolicy::default(),
            operator: None,
        }
    }
}

impl CoordinatorConfig {
    /// Set the token decimals.
    pub fn with_token_decimals(mut self, decimals: u8) -> Self {
        self.token_decimals = decimals;
        self
    }

    /// Set the payer cancellation window.
    pub fn with_cancel_window_secs(mut self, secs: u64) -> Self {
        self.cancel_window_secs = secs;
        self
    }

    /// Set the attempts allowed per queued update.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the receipt wait bound.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.receipt.timeout = timeout;
        self
    }

    /// Set the full receipt policy.
    pub fn with_receipt_policy(mut self, policy: ReceiptPolicy) -> Self {
        self.receipt = policy;
        self
    }

    /// Set the operator account.
    pub fn with_operator(mut self, operator: Address) -> Self {
        self.operator = Some(operator);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.token_decimals, 18);
        assert!(cfg.operator.is_none());
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        assert_eq!(CoordinatorConfig::default().with_max_attempts(0).max_attempts, 1);
    }
}
