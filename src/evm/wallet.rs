//! Private-key wallet for headless execution

use super::client::{EvmPublicClient, EvmWallet};
use super::gas::{apply_gas_price, gas_price_of, GasEstimator};
use super::provider::RpcClient;
use crate::chain::ChainId;
use crate::error::{ChainError, ErrorCode, SdkError};
use crate::guard::WalletIdentity;
use crate::step::TypedDataToSign;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::{info, warn};

/// Fee bump applied once when the node reports the transaction underpriced
const SPEED_UP_PERCENT: u64 = 125;

/// Signs locally and broadcasts through the chain's [`RpcClient`]
pub struct LocalWalletClient {
    wallet: LocalWallet,
    rpc: Arc<RpcClient>,
    gas: GasEstimator,
}

impl LocalWalletClient {
    pub fn new(wallet: LocalWallet, rpc: Arc<RpcClient>, gas: GasEstimator) -> Self {
        let wallet = wallet.with_chain_id(rpc.chain_id());
        Self { wallet, rpc, gas }
    }

    /// Load the private key from the environment variable `var`
    pub fn from_env(var: &str, rpc: Arc<RpcClient>, gas: GasEstimator) -> Result<Self, SdkError> {
        let key = std::env::var(var).map_err(|_| {
            SdkError::validation(format!("No wallet configured. Set {}", var))
        })?;
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| SdkError::validation(format!("Invalid private key: {}", e)))?;

        info!("Local wallet loaded: {:?}", wallet.address());
        Ok(Self::new(wallet, rpc, gas))
    }

    async fn sign_and_send(&self, tx: &TypedTransaction) -> Result<H256, ChainError> {
        let signature = self.wallet.sign_transaction(tx).await?;
        self.rpc.send_raw_transaction(tx.rlp_signed(&signature)).await
    }

    /// Same key, connected to another chain
    pub fn on_chain(&self, rpc: Arc<RpcClient>) -> Self {
        Self::new(self.wallet.clone(), rpc, self.gas.clone())
    }
}

#[async_trait]
impl WalletIdentity for LocalWalletClient {
    async fn active_chain_id(&self) -> Result<ChainId, ChainError> {
        Ok(self.rpc.chain_id())
    }

    async fn active_address(&self) -> Result<String, ChainError> {
        Ok(format!("{:?}", self.wallet.address()))
    }
}

#[async_trait]
impl EvmWallet for LocalWalletClient {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn send_transaction(&self, mut tx: TypedTransaction) -> Result<H256, ChainError> {
        let address = self.wallet.address();
        tx.set_from(address);
        tx.set_chain_id(self.rpc.chain_id());
        if tx.nonce().is_none() {
            let nonce = self.rpc.transaction_count(address).await?;
            tx.set_nonce(nonce);
        }
        self.gas.fill(self.rpc.as_ref(), &mut tx).await?;

        let hash = match self.sign_and_send(&tx).await {
            Err(e) if e.message.contains("underpriced") => {
                let Some(current) = gas_price_of(&tx) else {
                    return Err(e);
                };
                let bumped = self.gas.speed_up_gas_price(&current, SPEED_UP_PERCENT);
                warn!("Transaction underpriced, resending with {:?}", bumped);
                apply_gas_price(&mut tx, &bumped);
                self.sign_and_send(&tx).await?
            }
            result => result?,
        };

        info!("Transaction sent on chain {}: {:?}", self.rpc.chain_id(), hash);
        Ok(hash)
    }

    async fn sign_typed_data(&self, data: &TypedDataToSign) -> Result<String, ChainError> {
        let typed: TypedData = serde_json::from_value(serde_json::json!({
            "types": data.types,
            "primaryType": data.primary_type,
            "domain": data.domain,
            "message": data.message,
        }))
        .map_err(|e| ChainError::new(format!("Invalid typed data: {}", e)))?;

        let signature = self.wallet.sign_typed_data(&typed).await?;
        Ok(format!("0x{}", hex::encode(signature.to_vec())))
    }
}

/// Build the local wallet for `chain_id` out of the configured RPC clients
pub fn local_wallet_for(
    base: &LocalWalletClient,
    rpcs: &[Arc<RpcClient>],
    chain_id: ChainId,
) -> Result<LocalWalletClient, SdkError> {
    rpcs.iter()
        .find(|r| r.chain_id() == chain_id)
        .map(|rpc| base.on_chain(rpc.clone()))
        .ok_or_else(|| {
            SdkError::new(
                ErrorCode::ChainSwitchError,
                format!("No RPC client configured for chain {}", chain_id),
            )
        })
}
