//! Gas limit and fee estimation

use super::client::EvmPublicClient;
use crate::error::ChainError;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Priority fee used when the node gives no better hint (2 gwei)
const DEFAULT_PRIORITY_FEE: u64 = 2_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Adds safety buffers on top of node estimates
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// e.g. 20 = 20% on top of `eth_estimateGas`
    gas_limit_buffer_percent: u64,
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
            gas_price_buffer_percent: 10,
        }
    }

    pub fn with_buffer(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    /// Buffered gas limit for `tx`
    pub async fn estimate_gas_limit(
        &self,
        client: &dyn EvmPublicClient,
        tx: &TypedTransaction,
    ) -> Result<U256, ChainError> {
        let estimate = client.estimate_gas(tx).await?;
        let limit = self.with_buffer(estimate);
        debug!("Gas estimate {} -> limit {}", estimate, limit);
        Ok(limit)
    }

    /// EIP-1559 fees from the latest base fee, or a buffered legacy price on
    /// chains without one
    pub async fn gas_price(&self, client: &dyn EvmPublicClient) -> Result<GasPrice, ChainError> {
        let latest = client.block_number().await?;
        let base_fee = client
            .block_with_transactions(latest)
            .await?
            .and_then(|b| b.base_fee_per_gas);

        let price = match base_fee {
            Some(base_fee) => {
                let priority = U256::from(DEFAULT_PRIORITY_FEE);
                // 2x base fee absorbs a few full blocks
                GasPrice::Eip1559 {
                    max_fee_per_gas: base_fee * 2 + priority,
                    max_priority_fee_per_gas: priority,
                }
            }
            None => {
                let price = client.gas_price().await?;
                GasPrice::Legacy(price + price * self.gas_price_buffer_percent / 100)
            }
        };

        debug!("Gas price for chain {}: {:?}", client.chain_id(), price);
        Ok(price)
    }

    /// Fill missing gas limit and fee fields of `tx`
    pub async fn fill(
        &self,
        client: &dyn EvmPublicClient,
        tx: &mut TypedTransaction,
    ) -> Result<(), ChainError> {
        if tx.gas().is_none() {
            let limit = self.estimate_gas_limit(client, tx).await?;
            tx.set_gas(limit);
        }

        if has_fees(tx) {
            return Ok(());
        }

        let price = self.gas_price(client).await?;
        apply_gas_price(tx, &price);
        Ok(())
    }

    /// Scale a gas price for a stuck transaction, e.g. `factor` 125 for +25%
    pub fn speed_up_gas_price(&self, current: &GasPrice, factor: u64) -> GasPrice {
        match current {
            GasPrice::Legacy(price) => GasPrice::Legacy(*price * factor / 100),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: *max_fee_per_gas * factor / 100,
                max_priority_fee_per_gas: *max_priority_fee_per_gas * factor / 100,
            },
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20)
    }
}

fn has_fees(tx: &TypedTransaction) -> bool {
    gas_price_of(tx).is_some()
}

/// Fees currently set on `tx`
pub fn gas_price_of(tx: &TypedTransaction) -> Option<GasPrice> {
    match tx {
        TypedTransaction::Eip1559(inner) => Some(GasPrice::Eip1559 {
            max_fee_per_gas: inner.max_fee_per_gas?,
            max_priority_fee_per_gas: inner.max_priority_fee_per_gas.unwrap_or_default(),
        }),
        _ => tx.gas_price().map(GasPrice::Legacy),
    }
}

pub fn apply_gas_price(tx: &mut TypedTransaction, price: &GasPrice) {
    match (price, tx) {
        (
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            },
            TypedTransaction::Eip1559(inner),
        ) => {
            inner.max_fee_per_gas = Some(*max_fee_per_gas);
            inner.max_priority_fee_per_gas = Some(*max_priority_fee_per_gas);
        }
        (GasPrice::Eip1559 { max_fee_per_gas, .. }, tx) => {
            tx.set_gas_price(*max_fee_per_gas);
        }
        (GasPrice::Legacy(price), tx) => {
            tx.set_gas_price(*price);
        }
    }
}
