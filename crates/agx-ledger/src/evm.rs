//! # EVM JSON-RPC Ledger
//!
//! [`LedgerClient`] over an EVM JSON-RPC endpoint.
//!
//! ## How It Works
//!
//! 1. Calls are ABI-encoded and sent with `eth_sendTransaction`. The RPC
//!    endpoint (a managed signer, KMS-backed node, or unlocked dev account)
//!    signs for the `from` address.
//! 2. Receipts come from `eth_getTransactionReceipt`; block timestamps from
//!    `eth_getBlockByNumber`.
//! 3. Events come from `eth_getLogs` over the configured log sources.
//! 4. Views (`getShipment`, `getEscrow`, `allowance`) use `eth_call` at
//!    `latest`.
//!
//! ## Security
//!
//! - This client does NOT hold private keys.
//! - Every `from` address must be funded for gas.

use std::collections::HashMap;

use agx_core::abi::{encode_call, Decoder, Token};
use agx_core::{Address, Hash32, ShipmentKey, SplitBps, Timestamp, TokenAmount, TxHash};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::call::LedgerCall;
use crate::client::{LedgerClient, OnChainEscrow, OnChainShipment, TxReceipt};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::event::{LedgerEvent, LogEntry};

/// Connection settings for [`EvmLedger`].
#[derive(Debug, Clone)]
pub struct EvmConfig {
    /// JSON-RPC endpoint URL (HTTPS in production).
    pub rpc_url: String,
    /// Contract addresses and chain id.
    pub ledger: LedgerConfig,
    /// Per-request timeout in seconds (default: 30).
    pub timeout_secs: u64,
}

impl EvmConfig {
    /// Settings with a 30 second request timeout.
    pub fn new(rpc_url: impl Into<String>, ledger: LedgerConfig) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ledger,
            timeout_secs: 30,
        }
    }

    /// Override the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// JSON-RPC ledger client.
#[derive(Debug)]
pub struct EvmLedger {
    client: reqwest::Client,
    rpc_url: url::Url,
    config: LedgerConfig,
    timeout_secs: u64,
}

impl EvmLedger {
    /// Build a client. Fails on a malformed URL or zero contract address.
    pub fn new(config: EvmConfig) -> Result<Self, LedgerError> {
        let rpc_url = url::Url::parse(&config.rpc_url)
            .map_err(|e| LedgerError::Config(format!("invalid rpc url {}: {e}", config.rpc_url)))?;
        if !matches!(rpc_url.scheme(), "http" | "https") {
            return Err(LedgerError::Config(format!(
                "rpc url must be http(s): {}",
                config.rpc_url
            )));
        }
        if config.ledger.shipment_contract.is_zero() || config.ledger.escrow_contract.is_zero() {
            return Err(LedgerError::Config("contract address is zero".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            rpc_url,
            config: config.ledger,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Send a JSON-RPC request and return the `result` field.
    async fn rpc_call(&self, method: &'static str, params: Value) -> Result<Value, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Timeout {
                        operation: method.to_string(),
                        elapsed_ms: self.timeout_secs * 1000,
                    }
                } else {
                    LedgerError::Unavailable(format!("{method}: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            return Err(LedgerError::Unavailable(format!(
                "{method}: HTTP {}",
                resp.status()
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(format!("{method}: invalid JSON: {e}")))?;

        if let Some(error) = json.get("error") {
            let msg = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown RPC error");
            return Err(LedgerError::Rejected {
                call: method,
                reason: msg.to_string(),
            });
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| LedgerError::InvalidResponse(format!("{method}: missing 'result' field")))
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
        let result = self
            .rpc_call(
                "eth_call",
                json!([{ "to": to.to_string(), "data": hex_data(&data) }, "latest"]),
            )
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| LedgerError::InvalidResponse("eth_call returned non-string".into()))?;
        hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| LedgerError::InvalidResponse(format!("eth_call: {e}")))
    }

    async fn block_time(&self, block: u64) -> Result<Timestamp, LedgerError> {
        let result = self
            .rpc_call(
                "eth_getBlockByNumber",
                json!([format!("0x{block:x}"), false]),
            )
            .await?;
        let secs = quantity(result.get("timestamp"), "timestamp")?;
        Timestamp::from_unix_secs(secs).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }

    async fn decode_logs(
        &self,
        logs: &[Value],
        times: &mut HashMap<u64, Timestamp>,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let mut out = Vec::with_capacity(logs.len());
        for raw in logs {
            let log = parse_log(raw)?;
            let block_time = match times.get(&log.block_number) {
                Some(t) => *t,
                None => {
                    let t = self.block_time(log.block_number).await?;
                    times.insert(log.block_number, t);
                    t
                }
            };
            if let Some(event) = LedgerEvent::from_log(&log, block_time)? {
                out.push(event);
            }
        }
        Ok(out)
    }
}

fn hex_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

fn quantity(value: Option<&Value>, field: &str) -> Result<u64, LedgerError> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .ok_or_else(|| LedgerError::InvalidResponse(format!("missing or invalid {field}")))
}

fn parse_log(raw: &Value) -> Result<LogEntry, LedgerError> {
    let address = raw
        .get("address")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LedgerError::InvalidResponse("log missing address".into()))?;
    let address = Address::parse(address).map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

    let topics = raw
        .get("topics")
        .and_then(|v| v.as_array())
        .ok_or_else(|| LedgerError::InvalidResponse("log missing topics".into()))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| LedgerError::InvalidResponse("topic is not a string".into()))
                .and_then(|s| Hash32::from_hex(s).map_err(|e| LedgerError::InvalidResponse(e.to_string())))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let data = raw.get("data").and_then(|v| v.as_str()).unwrap_or("0x");
    let data = hex::decode(data.trim_start_matches("0x"))
        .map_err(|e| LedgerError::InvalidResponse(format!("log data: {e}")))?;

    let tx_hash = raw
        .get("transactionHash")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LedgerError::InvalidResponse("log missing transactionHash".into()))?;
    let tx_hash = TxHash::from_hex(tx_hash).map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

    Ok(LogEntry {
        address,
        topics,
        data,
        block_number: quantity(raw.get("blockNumber"), "blockNumber")?,
        tx_hash,
        log_index: quantity(raw.get("logIndex"), "logIndex")?,
    })
}

#[async_trait]
impl LedgerClient for EvmLedger {
    fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, LedgerError> {
        let tx = json!({
            "from": from.to_string(),
            "to": call.target().address(&self.config).to_string(),
            "data": hex_data(&call.encode()),
        });
        let result = self
            .rpc_call("eth_sendTransaction", json!([tx]))
            .await
            .map_err(|e| match e {
                LedgerError::Rejected { reason, .. } => LedgerError::Rejected {
                    call: call.name(),
                    reason,
                },
                other => other,
            })?;
        let hash = result.as_str().ok_or_else(|| {
            LedgerError::InvalidResponse("eth_sendTransaction returned non-string result".into())
        })?;
        let tx_hash = TxHash::from_hex(hash).map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        tracing::info!(tx = %tx_hash, call = call.name(), %from, "transaction submitted");
        Ok(tx_hash)
    }

    async fn receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, LedgerError> {
        let receipt = self
            .rpc_call("eth_getTransactionReceipt", json!([tx.to_string()]))
            .await?;
        if receipt.is_null() {
            return Ok(None);
        }

        let success = receipt.get("status").and_then(|s| s.as_str()) == Some("0x1");
        let block_number = quantity(receipt.get("blockNumber"), "blockNumber")?;
        let mut times = HashMap::new();
        times.insert(block_number, self.block_time(block_number).await?);
        let block_time = times[&block_number];
        let logs = receipt
            .get("logs")
            .and_then(|l| l.as_array())
            .cloned()
            .unwrap_or_default();
        let events = self.decode_logs(&logs, &mut times).await?;

        Ok(Some(TxReceipt {
            tx_hash: *tx,
            block_number,
            block_time,
            success,
            revert_reason: (!success).then(|| "status 0x0".to_string()),
            events,
        }))
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        let result = self.rpc_call("eth_blockNumber", json!([])).await?;
        quantity(Some(&result), "block number")
    }

    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<LedgerEvent>, LedgerError> {
        let addresses: Vec<String> = self
            .config
            .log_sources()
            .iter()
            .map(|a| a.to_string())
            .collect();
        let result = self
            .rpc_call(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("0x{from_block:x}"),
                    "toBlock": format!("0x{to_block:x}"),
                    "address": addresses,
                }]),
            )
            .await?;
        let logs = result
            .as_array()
            .ok_or_else(|| LedgerError::InvalidResponse("eth_getLogs returned non-array".into()))?;
        let mut times = HashMap::new();
        self.decode_logs(logs, &mut times).await
    }

    async fn shipment(&self, key: &ShipmentKey) -> Result<Option<OnChainShipment>, LedgerError> {
        let data = encode_call("getShipment(bytes32)", &[Token::Bytes32(*key.as_hash())]);
        let out = self.eth_call(self.config.shipment_contract, data).await?;
        let d = Decoder::new(&out);
        let farmer = d.address(1)?;
        if farmer.is_zero() {
            return Ok(None);
        }
        Ok(Some(OnChainShipment {
            shipment: *key,
            state: d.u8(0)?,
            farmer,
            industry: d.address(2)?,
            transporter: d.address(3)?,
            ask_price: TokenAmount::from_base_units(d.uint(4)?),
        }))
    }

    async fn escrow(&self, key: &ShipmentKey) -> Result<Option<OnChainEscrow>, LedgerError> {
        let data = encode_call("getEscrow(bytes32)", &[Token::Bytes32(*key.as_hash())]);
        let out = self.eth_call(self.config.escrow_contract, data).await?;
        let d = Decoder::new(&out);
        let status = d.u8(6)?;
        if status == 0 {
            return Ok(None);
        }
        let bps = |i: usize| -> Result<u16, LedgerError> {
            u16::try_from(d.u64(i)?).map_err(|_| LedgerError::InvalidResponse("split out of range".into()))
        };
        Ok(Some(OnChainEscrow {
            shipment: *key,
            token: d.address(0)?,
            amount: TokenAmount::from_base_units(d.uint(1)?),
            payer: d.address(2)?,
            splits: SplitBps {
                farmer_bps: bps(3)?,
                transporter_bps: bps(4)?,
                platform_bps: bps(5)?,
            },
            status,
            deposited_at: Timestamp::from_unix_secs(d.u64(7)?)
                .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?,
        }))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<TokenAmount, LedgerError> {
        let data = encode_call(
            "allowance(address,address)",
            &[Token::Address(owner), Token::Address(spender)],
        );
        let out = self.eth_call(token, data).await?;
        Ok(TokenAmount::from_base_units(Decoder::new(&out).uint(0)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_config() -> LedgerConfig {
        LedgerConfig::new(1, Address::from_bytes([1; 20]), Address::from_bytes([2; 20]))
    }

    #[test]
    fn config_defaults() {
        let config = EvmConfig::new("https://rpc.example.com", ledger_config());
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.with_timeout_secs(5).timeout_secs, 5);
    }

    #[test]
    fn rejects_bad_url() {
        assert!(EvmLedger::new(EvmConfig::new("not a url", ledger_config())).is_err());
        assert!(EvmLedger::new(EvmConfig::new("ftp://rpc.example.com", ledger_config())).is_err());
    }

    #[test]
    fn rejects_zero_contract() {
        let cfg = LedgerConfig::new(1, Address::ZERO, Address::from_bytes([2; 20]));
        let err = EvmLedger::new(EvmConfig::new("https://rpc.example.com", cfg)).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn builds_with_valid_config() {
        let ledger = EvmLedger::new(EvmConfig::new("https://rpc.example.com", ledger_config())).unwrap();
        assert_eq!(ledger.chain_id(), 1);
        assert!(format!("{ledger:?}").contains("EvmLedger"));
    }

    #[test]
    fn parse_log_reads_rpc_shape() {
        let raw = json!({
            "address": "0x0202020202020202020202020202020202020202",
            "topics": [format!("0x{}", "ab".repeat(32))],
            "data": "0x",
            "blockNumber": "0x1a",
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "logIndex": "0x2"
        });
        let log = parse_log(&raw).unwrap();
        assert_eq!(log.block_number, 26);
        assert_eq!(log.log_index, 2);
        assert!(log.data.is_empty());
    }

    #[test]
    fn quantity_rejects_garbage() {
        assert!(quantity(Some(&json!("0xzz")), "x").is_err());
        assert!(quantity(None, "x").is_err());
        assert_eq!(quantity(Some(&json!("0x10")), "x").unwrap(), 16);
    }
}
