//! Chain gateway with multi-RPC support and automatic failover

use super::{ChainGateway, TxStatus};
use crate::config::ChainConfig;
use crate::error::{ChainError, OperatorError, OperatorResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, JsonRpcError, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Multi-provider gateway with automatic failover
pub struct EthersGateway {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl EthersGateway {
    /// Create a new gateway over the configured RPC URLs
    pub fn new(config: ChainConfig) -> OperatorResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(500));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(OperatorError::Chain(ChainError::Unavailable {
                chain_id: config.chain_id,
            }));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Base fee of the latest block
    pub async fn latest_base_fee(&self) -> Result<U256, ChainError> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(classify_provider_error)?
            .ok_or_else(|| ChainError::Transport("No latest block".to_string()))?;

        block
            .base_fee_per_gas
            .ok_or_else(|| ChainError::Transport("No base fee in block".to_string()))
    }

    /// Fill chain-derived fields the caller left unset (fees, chain ID)
    pub async fn fill_transaction(&self, tx: &mut TypedTransaction) -> Result<(), ChainError> {
        self.http()
            .fill_transaction(tx, None)
            .await
            .map_err(classify_provider_error)
    }

    async fn status_once(&self, hash: H256) -> Result<TxStatus, ProviderError> {
        let tx = match self.http().get_transaction(hash).await? {
            Some(tx) => tx,
            None => return Ok(TxStatus::Failed),
        };

        if tx.block_number.is_none() {
            return Ok(TxStatus::Pending);
        }

        let receipt = self.http().get_transaction_receipt(hash).await?;
        Ok(match receipt.and_then(|r| r.status) {
            Some(status) if status.as_u64() == 1 => TxStatus::Confirmed,
            _ => TxStatus::Failed,
        })
    }
}

#[async_trait]
impl ChainGateway for EthersGateway {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn confirmed_transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_count(address, None).await {
                Ok(count) => return Ok(count.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get transaction count from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(ChainError::Unavailable {
            chain_id: self.config.chain_id,
        })
    }

    async fn transaction_status(&self, hash: H256) -> Result<TxStatus, ChainError> {
        for _ in 0..self.http_providers.len() {
            match self.status_once(hash).await {
                Ok(status) => return Ok(status),
                Err(e) => {
                    warn!(
                        "Failed to get status of {:?} from chain {}: {}",
                        hash, self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(ChainError::Unavailable {
            chain_id: self.config.chain_id,
        })
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError> {
        for _ in 0..self.http_providers.len() {
            match self.http().estimate_gas(tx, None).await {
                Ok(gas) => return Ok(gas),
                Err(e) => match classify_provider_error(e) {
                    ChainError::Transport(message) => {
                        warn!(
                            "Gas estimation transport failure on chain {}: {}",
                            self.config.chain_id, message
                        );
                        self.failover();
                    }
                    // Reverts and node-side rejections are deterministic
                    other => return Err(other),
                },
            }
        }

        Err(ChainError::Unavailable {
            chain_id: self.config.chain_id,
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        // No failover here: a second node may have already accepted the payload
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(classify_provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        let limit = Duration::from_secs(self.config.receipt_timeout_secs);

        let poll = async {
            loop {
                match self.http().get_transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return Ok(Some(receipt)),
                    Ok(None) => match self.http().get_transaction(hash).await {
                        Ok(None) => return Ok(None),
                        Ok(Some(_)) => {}
                        Err(e) => debug!("Transaction lookup for {:?} failed: {}", hash, e),
                    },
                    // Detached watchers retry in place; failover belongs to the dispatch path
                    Err(e) => debug!("Receipt lookup for {:?} failed: {}", hash, e),
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        timeout(limit, poll)
            .await
            .map_err(|_| ChainError::Timeout {
                operation: format!("receipt of {:?}", hash),
            })?
    }
}

/// Split a provider error into a revert payload, a node RPC error, or a transport failure
pub(crate) fn classify_provider_error(err: ProviderError) -> ChainError {
    match RpcError::as_error_response(&err) {
        Some(rpc) => classify_rpc_error(rpc),
        None => ChainError::Transport(err.to_string()),
    }
}

pub(crate) fn classify_rpc_error(rpc: &JsonRpcError) -> ChainError {
    let lowered = rpc.message.to_lowercase();
    let is_revert = lowered.contains("revert") || lowered.contains("vm exception");

    if is_revert {
        let data = rpc
            .data
            .as_ref()
            .and_then(find_revert_bytes)
            .unwrap_or_default();
        return ChainError::Reverted {
            message: rpc.message.clone(),
            data,
        };
    }

    ChainError::Rpc {
        code: rpc.code,
        message: rpc.message.clone(),
        data: rpc.data.clone(),
    }
}

/// Nodes nest the revert payload at different depths (`data`, `data.data`, ...)
fn find_revert_bytes(value: &Value) -> Option<Bytes> {
    match value {
        Value::String(s) => {
            let stripped = s.strip_prefix("0x")?;
            hex::decode(stripped).ok().map(Bytes::from)
        }
        Value::Object(map) => {
            if let Some(found) = map.get("data").and_then(find_revert_bytes) {
                return Some(found);
            }
            map.values().find_map(find_revert_bytes)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rpc(code: i64, message: &str, data: Option<Value>) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.to_string(),
            data,
        }
    }

    #[test]
    fn test_execution_reverted_with_flat_data() {
        let err = classify_rpc_error(&rpc(
            3,
            "execution reverted",
            Some(json!("0xdeadbeef")),
        ));
        assert_eq!(
            err.revert_data().map(|b| b.to_vec()),
            Some(vec![0xde, 0xad, 0xbe, 0xef])
        );
    }

    #[test]
    fn test_vm_exception_with_nested_data() {
        let err = classify_rpc_error(&rpc(
            -32603,
            "Error: VM Exception while processing transaction: reverted with custom error",
            Some(json!({ "message": "reverted", "data": { "data": "0x01020304" } })),
        ));
        assert_eq!(
            err.revert_data().map(|b| b.to_vec()),
            Some(vec![1, 2, 3, 4])
        );
    }

    #[test]
    fn test_non_revert_keeps_code() {
        let err = classify_rpc_error(&rpc(-32000, "nonce too low", None));
        match err {
            ChainError::Rpc { code, message, .. } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "nonce too low");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_revert_without_payload_is_empty() {
        let err = classify_rpc_error(&rpc(3, "execution reverted", None));
        assert_eq!(err.revert_data().map(|b| b.len()), Some(0));
    }

    #[tokio::test]
    async fn test_receipt_wait_does_not_rotate_providers() {
        // Nothing listens on port 1, so every lookup fails
        let gateway = EthersGateway::new(ChainConfig {
            chain_id: 80001,
            name: "mumbai".to_string(),
            rpc_urls: vec![
                "http://127.0.0.1:1".to_string(),
                "http://127.0.0.1:2".to_string(),
            ],
            receipt_timeout_secs: 1,
        })
        .unwrap();

        let result = gateway.wait_for_receipt(H256::repeat_byte(1)).await;

        assert!(matches!(result, Err(ChainError::Timeout { .. })));
        assert_eq!(gateway.current_provider.load(Ordering::Relaxed), 0);
    }
}
