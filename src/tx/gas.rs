//! EIP-1559 fee suggestions

use crate::chain::EthersGateway;
use crate::config::GasConfig;
use crate::error::OperatorResult;

use async_trait::async_trait;
use ethers::types::U256;
use std::sync::Arc;
use tracing::debug;

/// Fee caps injected into an outgoing transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSuggestion {
    pub max_priority_fee: U256,
    pub max_fee: U256,
}

/// Source of fee suggestions. Failures are never fatal to a dispatch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn fees(&self) -> OperatorResult<FeeSuggestion>;
}

/// Derives fees from the latest block's base fee
pub struct ProviderFeeOracle {
    gateway: Arc<EthersGateway>,
    config: GasConfig,
}

impl ProviderFeeOracle {
    pub fn new(gateway: Arc<EthersGateway>, config: GasConfig) -> Self {
        Self { gateway, config }
    }
}

#[async_trait]
impl GasOracle for ProviderFeeOracle {
    async fn fees(&self) -> OperatorResult<FeeSuggestion> {
        let base_fee = self.gateway.latest_base_fee().await?;
        let fees = suggest_fees(base_fee, &self.config);
        debug!(
            "Fee suggestion: base={} max={} priority={}",
            base_fee, fees.max_fee, fees.max_priority_fee
        );
        Ok(fees)
    }
}

/// `2 * base + priority`, plus the configured buffer, capped at the max gas price
pub fn suggest_fees(base_fee: U256, config: &GasConfig) -> FeeSuggestion {
    let priority = gwei(config.priority_fee_gwei);
    let cap = gwei(config.max_gas_price_gwei);

    let max_fee = base_fee * 2 + priority;
    let buffered: U256 = max_fee + max_fee * U256::from(config.fee_buffer_percent) / 100;
    let max_fee = buffered.min(cap);

    FeeSuggestion {
        max_priority_fee: priority.min(max_fee),
        max_fee,
    }
}

fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(9)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GasConfig {
        GasConfig {
            fee_buffer_percent: 10,
            priority_fee_gwei: 2,
            max_gas_price_gwei: 100,
        }
    }

    #[test]
    fn test_buffered_fee() {
        let fees = suggest_fees(gwei(30), &config());
        // (60 + 2) * 1.1
        assert_eq!(fees.max_fee, U256::from(68_200_000_000u64));
        assert_eq!(fees.max_priority_fee, gwei(2));
    }

    #[test]
    fn test_fee_is_capped() {
        let fees = suggest_fees(gwei(80), &config());
        assert_eq!(fees.max_fee, gwei(100));
    }

    #[test]
    fn test_priority_never_exceeds_max_fee() {
        let mut config = config();
        config.max_gas_price_gwei = 1;
        let fees = suggest_fees(gwei(5), &config);
        assert_eq!(fees.max_priority_fee, fees.max_fee);
    }
}
