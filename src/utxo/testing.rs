//! Scripted Bitcoin wallet and indexer

use super::client::{UtxoClient, UtxoTxStatus, UtxoWallet};
use super::executor::UtxoChain;
use crate::chain::{ChainId, BITCOIN_CHAIN_ID};
use crate::error::ChainError;
use crate::guard::WalletIdentity;
use crate::interaction::ExecutionOptions;
use crate::pipeline::{ExecutionServices, ExecutionStrategy, StepContext, TaskContext, TaskState};
use crate::step::{Step, TransactionRequest};
use crate::testing::sample_step;
use crate::watch::WatcherRegistry;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const BTC_WALLET: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
pub(crate) const SIGNED_TX: &str = "0200000001aa00000000000000";

pub(crate) fn utxo_step(id: &str, to_chain: ChainId) -> Step {
    let mut step = sample_step(id, BITCOIN_CHAIN_ID, to_chain);
    step.action.from_address = Some(BTC_WALLET.to_string());
    step.transaction_request = Some(TransactionRequest {
        data: Some("70736274ff01007102000000".to_string()),
        ..TransactionRequest::default()
    });
    step
}

pub(crate) struct FakeBitcoin {
    height: AtomicU64,
    auto_mine: AtomicBool,
    /// Status sequence per txid; the last entry repeats
    statuses: Mutex<HashMap<String, VecDeque<UtxoTxStatus>>>,
    broadcast_error: Option<String>,
    pub signed: Mutex<Vec<String>>,
    pub broadcasts: Mutex<Vec<String>>,
}

impl FakeBitcoin {
    pub fn new() -> Self {
        Self {
            height: AtomicU64::new(100),
            auto_mine: AtomicBool::new(false),
            statuses: Mutex::new(HashMap::new()),
            broadcast_error: None,
            signed: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_broadcast(mut self, message: &str) -> Self {
        self.broadcast_error = Some(message.to_string());
        self
    }

    pub fn script(&self, txid: &str, statuses: Vec<UtxoTxStatus>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(txid.to_string(), statuses.into());
    }

    /// Start the chain at `height` and mine a block on every height query
    pub fn mine_on_poll(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
        self.auto_mine.store(true, Ordering::SeqCst);
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletIdentity for FakeBitcoin {
    async fn active_chain_id(&self) -> Result<ChainId, ChainError> {
        Ok(BITCOIN_CHAIN_ID)
    }

    async fn active_address(&self) -> Result<String, ChainError> {
        Ok(BTC_WALLET.to_string())
    }
}

#[async_trait]
impl UtxoWallet for FakeBitcoin {
    async fn sign_psbt(&self, psbt: &str) -> Result<String, ChainError> {
        self.signed.lock().unwrap().push(psbt.to_string());
        Ok(SIGNED_TX.to_string())
    }
}

#[async_trait]
impl UtxoClient for FakeBitcoin {
    async fn block_height(&self) -> Result<u64, ChainError> {
        if self.auto_mine.load(Ordering::SeqCst) {
            return Ok(self.height.fetch_add(1, Ordering::SeqCst));
        }
        Ok(self.height())
    }

    async fn broadcast(&self, raw_tx: &str) -> Result<String, ChainError> {
        if let Some(message) = &self.broadcast_error {
            return Err(ChainError::new(message.clone()));
        }
        let mut broadcasts = self.broadcasts.lock().unwrap();
        broadcasts.push(raw_tx.to_string());
        Ok(format!("txid-{}", broadcasts.len()))
    }

    async fn transaction_status(&self, txid: &str) -> Result<UtxoTxStatus, ChainError> {
        let mut statuses = self.statuses.lock().unwrap();
        let Some(queue) = statuses.get_mut(txid) else {
            return Ok(UtxoTxStatus::Confirmed { block_height: 1 });
        };
        let status = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(status.unwrap_or(UtxoTxStatus::NotFound))
    }
}

pub(crate) fn utxo_context(
    services: Arc<ExecutionServices>,
    step_id: &str,
    options: ExecutionOptions,
    fake: Arc<FakeBitcoin>,
) -> TaskContext<UtxoChain> {
    TaskContext::new(
        StepContext::new(services, step_id, ExecutionStrategy::Utxo, options),
        TaskState::default(),
        UtxoChain::new(fake.clone(), fake, Arc::new(WatcherRegistry::new("utxo_transaction"))),
    )
}
