//! EVM chain adapter handed to every EVM task

use super::client::{EvmPublicClient, EvmWallet};
use super::errors::classify_evm_error;
use super::watch::{submitted_transaction, wait_for_receipt, EvmWatchers, ReceiptOutcome, WatchParams};
use crate::chain::ChainType;
use crate::error::{ChainError, ExecutionResult, SdkError};
use crate::pipeline::ChainAdapter;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::H256;
use std::sync::Arc;

pub struct EvmChain {
    /// Reads against the step's source chain
    pub public: Arc<dyn EvmPublicClient>,
    /// Replaced when the user switches chains mid-pipeline
    pub wallet: Arc<dyn EvmWallet>,
    pub watchers: Arc<EvmWatchers>,
}

impl EvmChain {
    pub fn new(
        public: Arc<dyn EvmPublicClient>,
        wallet: Arc<dyn EvmWallet>,
        watchers: Arc<EvmWatchers>,
    ) -> Self {
        Self {
            public,
            wallet,
            watchers,
        }
    }

    /// Sign and broadcast `tx`. The sender and nonce are remembered so a
    /// replacement is recognised even if the original never shows up in the mempool.
    pub async fn send(&self, tx: TypedTransaction) -> ExecutionResult<H256> {
        let from = tx.from().copied().unwrap_or_else(|| self.wallet.address());
        let nonce = match tx.nonce() {
            Some(nonce) => *nonce,
            None => self.public.transaction_count(from).await?,
        };
        let sent = submitted_transaction(&tx, from, nonce);

        let hash = self.wallet.send_transaction(tx).await?;
        self.watchers.remember_submitted(hash, sent);
        Ok(hash)
    }

    /// Wait for `hash` or whatever replaced it; the outcome is not judged
    pub async fn watch(&self, hash: H256, params: WatchParams) -> ExecutionResult<ReceiptOutcome> {
        wait_for_receipt(&self.watchers, self.public.clone(), hash, params).await
    }
}

impl ChainAdapter for EvmChain {
    fn chain_type(&self) -> ChainType {
        ChainType::Evm
    }

    fn classify(&self, err: &ChainError) -> SdkError {
        classify_evm_error(err)
    }
}

pub fn format_hash(hash: H256) -> String {
    format!("{:?}", hash)
}

pub fn parse_hash(value: &str) -> Result<H256, SdkError> {
    value
        .parse::<H256>()
        .map_err(|e| SdkError::validation(format!("Invalid transaction hash {}: {}", value, e)))
}
