//! Stateful EVM fake for task and executor tests

use super::abi::{selector_of, ALLOWANCE_SELECTOR, APPROVE_SELECTOR, NAME_SELECTOR, NONCES_SELECTOR};
use super::adapter::EvmChain;
use super::client::{AtomicBatchSupport, BatchState, BatchStatus, CallReceipt, EvmPublicClient, EvmWallet};
use super::errors::ATOMIC_UPGRADE_REJECTED;
use super::watch::EvmWatchers;
use crate::chain::ChainId;
use crate::error::ChainError;
use crate::guard::WalletIdentity;
use crate::interaction::ExecutionOptions;
use crate::pipeline::{ExecutionServices, ExecutionStrategy, StepContext, TaskContext, TaskState};
use crate::step::{PreparedCall, Step, TransactionRequest, TypedDataToSign};
use crate::testing::{sample_step, services_for, WALLET};

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Block, Bytes, Transaction, TransactionReceipt, H256, U256, U64};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const DIAMOND: &str = "0x4444444444444444444444444444444444444444";

/// Wallet and public client in one: every sent transaction is mined at once
pub(crate) struct FakeEvm {
    pub chain_id: ChainId,
    pub allowance: Mutex<U256>,
    pub native_permit: bool,
    pub batch_support: AtomicBatchSupport,
    pub reject_upgrade: bool,
    pub reverts: bool,
    /// Every sent transaction is superseded by a zero-value self transfer
    pub cancels: bool,
    pub sent: Mutex<Vec<TypedTransaction>>,
    pub signed: Mutex<Vec<TypedDataToSign>>,
    pub batches: Mutex<Vec<Vec<PreparedCall>>>,
    receipts: Mutex<HashMap<H256, TransactionReceipt>>,
    /// Transactions mined in block 1
    mined: Mutex<Vec<Transaction>>,
    next_hash: AtomicU64,
}

impl FakeEvm {
    pub fn on_chain(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            allowance: Mutex::new(U256::zero()),
            native_permit: false,
            batch_support: AtomicBatchSupport::Unsupported,
            reject_upgrade: false,
            reverts: false,
            cancels: false,
            sent: Mutex::new(Vec::new()),
            signed: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            mined: Mutex::new(Vec::new()),
            next_hash: AtomicU64::new(1),
        }
    }

    pub fn with_allowance(self, allowance: u64) -> Self {
        *self.allowance.lock().unwrap() = U256::from(allowance);
        self
    }

    pub fn with_native_permit(mut self) -> Self {
        self.native_permit = true;
        self
    }

    pub fn with_batch_support(mut self, support: AtomicBatchSupport) -> Self {
        self.batch_support = support;
        self
    }

    pub fn rejecting_upgrade(mut self) -> Self {
        self.reject_upgrade = true;
        self
    }

    pub fn reverting(mut self) -> Self {
        self.reverts = true;
        self
    }

    pub fn cancelling(mut self) -> Self {
        self.cancels = true;
        self
    }

    /// Hash of the transaction that cancels the `n`th sent one
    pub fn cancel_hash(n: u64) -> H256 {
        H256::from_low_u64_be(0xcc00 + n)
    }

    fn mine(&self, tx: Transaction, status: u64) {
        self.receipts.lock().unwrap().insert(
            tx.hash,
            TransactionReceipt {
                transaction_hash: tx.hash,
                status: Some(U64::from(status)),
                ..TransactionReceipt::default()
            },
        );
        self.mined.lock().unwrap().push(tx);
    }

    pub fn approvals(&self) -> Vec<TypedTransaction> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| tx.data().and_then(|d| selector_of(d)) == Some(APPROVE_SELECTOR))
            .cloned()
            .collect()
    }

    pub fn signed_types(&self) -> Vec<String> {
        self.signed
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.primary_type.clone())
            .collect()
    }
}

#[async_trait]
impl EvmPublicClient for FakeEvm {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(1)
    }

    async fn transaction(&self, _hash: H256) -> Result<Option<Transaction>, ChainError> {
        Ok(None)
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }

    async fn transaction_count(&self, _address: Address) -> Result<U256, ChainError> {
        Ok(U256::from(self.mined.lock().unwrap().len()))
    }

    async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<Block<Transaction>>, ChainError> {
        let mut block = Block::<Transaction>::default();
        if number == 1 {
            block.transactions = self.mined.lock().unwrap().clone();
        }
        Ok(Some(block))
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        let selector = tx.data().and_then(|d| selector_of(d));
        match selector {
            Some(ALLOWANCE_SELECTOR) => {
                let allowance = *self.allowance.lock().unwrap();
                Ok(Bytes::from(encode(&[Token::Uint(allowance)])))
            }
            Some(NONCES_SELECTOR) if self.native_permit => {
                Ok(Bytes::from(encode(&[Token::Uint(U256::zero())])))
            }
            Some(NONCES_SELECTOR) => Err(ChainError::new("execution reverted")),
            Some(NAME_SELECTOR) => Ok(Bytes::from(encode(&[Token::String("USD Coin".to_string())]))),
            _ => Ok(Bytes::default()),
        }
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256, ChainError> {
        Ok(U256::from(100_000))
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        Ok(U256::from(1_000_000_000u64))
    }
}

#[async_trait]
impl WalletIdentity for FakeEvm {
    async fn active_chain_id(&self) -> Result<ChainId, ChainError> {
        Ok(self.chain_id)
    }

    async fn active_address(&self) -> Result<String, ChainError> {
        Ok(WALLET.to_string())
    }
}

#[async_trait]
impl EvmWallet for FakeEvm {
    fn address(&self) -> Address {
        WALLET.parse().unwrap()
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, ChainError> {
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
        let hash = H256::from_low_u64_be(n);
        let nonce = U256::from(self.mined.lock().unwrap().len());
        let mined = if self.cancels {
            Transaction {
                hash: Self::cancel_hash(n),
                from: self.address(),
                to: Some(self.address()),
                nonce,
                ..Transaction::default()
            }
        } else {
            Transaction {
                hash,
                from: self.address(),
                to: tx.to_addr().copied(),
                nonce,
                ..Transaction::default()
            }
        };
        self.mine(mined, if self.reverts { 0 } else { 1 });
        self.sent.lock().unwrap().push(tx);
        Ok(hash)
    }

    async fn sign_typed_data(&self, data: &TypedDataToSign) -> Result<String, ChainError> {
        self.signed.lock().unwrap().push(data.clone());
        Ok(format!("0x{}", "1b".repeat(65)))
    }

    async fn atomic_batch_support(&self, _chain_id: ChainId) -> Result<AtomicBatchSupport, ChainError> {
        Ok(self.batch_support)
    }

    async fn send_calls(
        &self,
        _chain_id: ChainId,
        calls: &[PreparedCall],
    ) -> Result<String, ChainError> {
        if self.reject_upgrade {
            return Err(ChainError::new("User rejected the account upgrade")
                .with_code(ATOMIC_UPGRADE_REJECTED));
        }
        self.batches.lock().unwrap().push(calls.to_vec());
        Ok("batch-1".to_string())
    }

    async fn calls_status(&self, _batch_id: &str) -> Result<BatchStatus, ChainError> {
        Ok(BatchStatus {
            state: BatchState::Confirmed,
            receipts: vec![CallReceipt {
                transaction_hash: H256::repeat_byte(0xba),
                success: !self.reverts,
            }],
        })
    }
}

/// Step with a quoted swap transaction to the diamond
pub(crate) fn evm_step(id: &str, from_chain: ChainId, to_chain: ChainId) -> Step {
    let mut step = sample_step(id, from_chain, to_chain);
    step.transaction_request = Some(TransactionRequest {
        to: Some(DIAMOND.to_string()),
        data: Some("0xdeadbeef".to_string()),
        value: Some("0".to_string()),
        gas_limit: Some("200000".to_string()),
        ..TransactionRequest::default()
    });
    step
}

pub(crate) fn evm_context_with(
    services: Arc<ExecutionServices>,
    step_id: &str,
    strategy: ExecutionStrategy,
    options: ExecutionOptions,
    fake: Arc<FakeEvm>,
) -> TaskContext<EvmChain> {
    let chain = EvmChain::new(fake.clone(), fake, Arc::new(EvmWatchers::new()));
    TaskContext::new(
        StepContext::new(services, step_id, strategy, options),
        TaskState::default(),
        chain,
    )
}

pub(crate) fn evm_context(
    step: Step,
    strategy: ExecutionStrategy,
    options: ExecutionOptions,
    fake: Arc<FakeEvm>,
) -> TaskContext<EvmChain> {
    let step_id = step.id.clone();
    evm_context_with(services_for(step), &step_id, strategy, options, fake)
}
