//! Operator key custody and broadcast

use crate::chain::{ChainGateway, EthersGateway};
use crate::error::{ChainError, OperatorError, OperatorResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::{debug, info};

/// Signs transactions with the operator key and hands them to the chain
#[async_trait]
pub trait TransactionBroadcaster: Send + Sync {
    /// Operator account the key controls
    fn address(&self) -> Address;

    async fn sign_and_send(&self, tx: TypedTransaction) -> Result<H256, ChainError>;
}

/// Local private-key signer broadcasting through the ethers gateway
pub struct WalletBroadcaster {
    wallet: LocalWallet,
    gateway: Arc<EthersGateway>,
}

impl WalletBroadcaster {
    /// Load the operator key from the environment variable `key_env`
    pub fn from_env(key_env: &str, gateway: Arc<EthersGateway>) -> OperatorResult<Self> {
        let wallet = load_wallet(key_env)?.with_chain_id(gateway.chain_id());
        info!("Operator wallet loaded: {:?}", wallet.address());
        Ok(Self { wallet, gateway })
    }
}

fn load_wallet(key_env: &str) -> OperatorResult<LocalWallet> {
    let key = std::env::var(key_env)
        .map_err(|_| OperatorError::Wallet(format!("No wallet configured. Set {}", key_env)))?;

    key.trim()
        .parse::<LocalWallet>()
        .map_err(|e| OperatorError::Wallet(format!("Invalid private key: {}", e)))
}

#[async_trait]
impl TransactionBroadcaster for WalletBroadcaster {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_and_send(&self, mut tx: TypedTransaction) -> Result<H256, ChainError> {
        // Fees left unset when the gas oracle was unavailable
        self.gateway.fill_transaction(&mut tx).await?;

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        debug!("Broadcasting transaction with nonce {:?}", tx.nonce());
        self.gateway.send_raw_transaction(raw).await
    }
}
