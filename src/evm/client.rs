//! Client seams of the EVM executor
//!
//! The executor never talks to a concrete provider or wallet library; it uses
//! an [`EvmPublicClient`] for reads and an [`EvmWallet`] for anything signed.

use crate::chain::ChainId;
use crate::error::ChainError;
use crate::guard::WalletIdentity;
use crate::step::{PreparedCall, TypedDataToSign};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Block, Bytes, Transaction, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};

/// EIP-1193 code for an unsupported wallet method
pub const UNSUPPORTED_METHOD: i64 = 4200;

/// Read-only JSON-RPC access to one chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvmPublicClient: Send + Sync {
    fn chain_id(&self) -> ChainId;

    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError>;

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError>;

    /// Nonce of the next transaction `address` would send (latest block)
    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError>;

    async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<Block<Transaction>>, ChainError>;

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError>;

    async fn gas_price(&self) -> Result<U256, ChainError>;
}

/// Whether the wallet can execute EIP-5792 atomic batches on a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicBatchSupport {
    Supported,
    /// The account must first be upgraded; the user may refuse
    Ready,
    Unsupported,
}

impl AtomicBatchSupport {
    pub fn is_usable(self) -> bool {
        !matches!(self, AtomicBatchSupport::Unsupported)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReceipt {
    pub transaction_hash: H256,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Pending,
    Confirmed,
    Failed,
}

/// `wallet_getCallsStatus` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub state: BatchState,
    #[serde(default)]
    pub receipts: Vec<CallReceipt>,
}

impl BatchStatus {
    pub fn failed_call(&self) -> Option<&CallReceipt> {
        self.receipts.iter().find(|r| !r.success)
    }

    /// Hash of the transaction that settled the batch
    pub fn settlement_hash(&self) -> Option<H256> {
        self.receipts.last().map(|r| r.transaction_hash)
    }
}

/// A connected wallet able to sign for the user
#[async_trait]
pub trait EvmWallet: WalletIdentity {
    fn address(&self) -> Address;

    /// Sign and broadcast, returning the transaction hash
    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, ChainError>;

    /// EIP-712 signature as 0x-prefixed hex
    async fn sign_typed_data(&self, data: &TypedDataToSign) -> Result<String, ChainError>;

    async fn atomic_batch_support(&self, _chain_id: ChainId) -> Result<AtomicBatchSupport, ChainError> {
        Ok(AtomicBatchSupport::Unsupported)
    }

    /// `wallet_sendCalls`, returning the batch id
    async fn send_calls(
        &self,
        _chain_id: ChainId,
        _calls: &[PreparedCall],
    ) -> Result<String, ChainError> {
        Err(ChainError::new("wallet_sendCalls is not supported").with_code(UNSUPPORTED_METHOD))
    }

    async fn calls_status(&self, _batch_id: &str) -> Result<BatchStatus, ChainError> {
        Err(ChainError::new("wallet_getCallsStatus is not supported")
            .with_code(UNSUPPORTED_METHOD))
    }
}
