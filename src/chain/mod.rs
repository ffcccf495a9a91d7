//! Chain module - read/write access to the operator's chain
//!
//! This module provides:
//! - The `ChainGateway` seam consumed by the nonce sequencer and dispatcher
//! - An ethers-backed gateway with multi-RPC failover
//! - Translation of provider errors into revert payloads and RPC codes

pub mod provider;

pub use provider::EthersGateway;

use crate::error::ChainError;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// On-chain outcome of a previously broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Known to the node but not mined yet
    Pending,
    /// Mined with a success status
    Confirmed,
    /// Mined and reverted, or dropped from the node entirely
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }
}

/// Access to the chain the operator account lives on
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Chain ID served by this gateway
    fn chain_id(&self) -> u64;

    /// Number of mined transactions sent from `address`
    async fn confirmed_transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    /// Status of a transaction by hash
    async fn transaction_status(&self, hash: H256) -> Result<TxStatus, ChainError>;

    /// Simulate a transaction and return its gas limit
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError>;

    /// Broadcast a signed, RLP-encoded transaction
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError>;

    /// Wait until the transaction is mined; `None` if the node forgot it
    async fn wait_for_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError>;
}
