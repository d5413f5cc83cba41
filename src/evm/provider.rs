//! JSON-RPC public client with multi-RPC failover, and the per-chain client cache

use super::client::EvmPublicClient;
use crate::chain::ChainId;
use crate::config::{ChainConfig, Settings};
use crate::error::{ChainError, ErrorCode, SdkError};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Block, Bytes, Transaction, TransactionReceipt, H256, U256};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// HTTP providers for one chain, rotating to the next URL on transport errors
pub struct RpcClient {
    chain_id: ChainId,
    providers: Vec<Provider<Http>>,
    current: AtomicUsize,
}

impl RpcClient {
    pub fn new(chain_id: ChainId, rpc_urls: &[String]) -> Result<Self, SdkError> {
        let mut providers = Vec::new();

        for url in rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(SdkError::new(
                ErrorCode::ProviderUnavailable,
                format!("No valid RPC providers for chain {}", chain_id),
            ));
        }

        Ok(Self {
            chain_id,
            providers,
            current: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &ChainConfig) -> Result<Self, SdkError> {
        Self::new(config.chain_id, &config.rpc_urls)
    }

    /// The active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    /// Run `op` against each provider in turn until one answers.
    ///
    /// JSON-RPC error responses come from the node itself and are returned
    /// as-is; only transport failures move on to the next provider.
    async fn with_failover<T, F, Fut>(&self, what: &str, op: F) -> Result<T, ChainError>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.providers.len() {
            match op(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.as_error_response().is_some() => return Err(e.into()),
                Err(e) => {
                    warn!("{} failed on chain {}: {}", what, self.chain_id, e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(last_error
            .map(ChainError::from)
            .unwrap_or_else(|| ChainError::new("All providers failed")))
    }

    /// Broadcast a signed, RLP-encoded transaction
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        self.with_failover("send_raw_transaction", |p| {
            let raw = raw.clone();
            async move { p.send_raw_transaction(raw).await.map(|pending| pending.tx_hash()) }
        })
        .await
    }

    pub async fn health_check(&self) -> bool {
        self.block_number().await.is_ok()
    }
}

#[async_trait]
impl EvmPublicClient for RpcClient {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.with_failover("eth_blockNumber", |p| async move {
            p.get_block_number().await.map(|b| b.as_u64())
        })
        .await
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError> {
        self.with_failover("eth_getTransactionByHash", |p| async move {
            p.get_transaction(hash).await
        })
        .await
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        self.with_failover("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(hash).await
        })
        .await
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address, None).await
        })
        .await
    }

    async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<Block<Transaction>>, ChainError> {
        self.with_failover("eth_getBlockByNumber", |p| async move {
            p.get_block_with_txs(number).await
        })
        .await
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        self.with_failover("eth_call", |p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError> {
        self.with_failover("eth_estimateGas", |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }
}

/// Public clients by chain, built once per executor instance
#[derive(Default)]
pub struct EvmClientRegistry {
    clients: DashMap<ChainId, Arc<dyn EvmPublicClient>>,
}

impl EvmClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`RpcClient`] per enabled EVM chain
    pub fn connect(settings: &Settings) -> Result<Vec<Arc<RpcClient>>, SdkError> {
        let mut clients = Vec::new();
        for (name, chain) in settings.enabled_chains() {
            if chain.chain_type != crate::chain::ChainType::Evm {
                continue;
            }
            let client = RpcClient::from_config(chain)?;
            info!("RPC client ready for {} (ID: {})", name, chain.chain_id);
            clients.push(Arc::new(client));
        }
        Ok(clients)
    }

    pub fn from_clients(clients: &[Arc<RpcClient>]) -> Self {
        let registry = Self::new();
        for client in clients {
            registry.insert(client.clone());
        }
        registry
    }

    pub fn insert(&self, client: Arc<dyn EvmPublicClient>) {
        self.clients.insert(client.chain_id(), client);
    }

    pub fn get(&self, chain_id: ChainId) -> Result<Arc<dyn EvmPublicClient>, SdkError> {
        self.clients
            .get(&chain_id)
            .map(|c| c.clone())
            .ok_or_else(|| {
                SdkError::new(
                    ErrorCode::ProviderUnavailable,
                    format!("No RPC client configured for chain {}", chain_id),
                )
            })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
