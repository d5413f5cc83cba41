//! EVM confirmation watchers
//!
//! - receipts, following speed-ups and cancellations of the watched transaction
//! - EIP-5792 batches, failing as soon as one call reports failure
//! - relayer tasks

use super::client::{BatchState, BatchStatus, EvmPublicClient, EvmWallet};
use crate::chain::ChainId;
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::quote::{RelayStatusResponse, RelayTaskStatus, StepService};
pub use crate::watch::WatchParams;
use crate::watch::{retry_transient, timed_out, wait_for_result, WatcherRegistry};

use dashmap::DashMap;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Transaction, TransactionReceipt, H256, U256, U64};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Blocks before the first poll that are searched for a replacement
const REPLACEMENT_LOOKBACK_BLOCKS: u64 = 5;

/// How the watched transaction was superseded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementReason {
    /// Same call, higher fee (speed-up)
    Repriced,
    /// Zero-value self transfer with the same nonce
    Cancelled,
    /// A different transaction took the nonce
    Replaced,
}

#[derive(Debug, Clone)]
pub struct ReceiptOutcome {
    /// Hash of the transaction that was actually mined
    pub tx_hash: H256,
    pub receipt: TransactionReceipt,
    pub replaced: Option<ReplacementReason>,
}

impl ReceiptOutcome {
    /// A reverted receipt or a cancellation fails the action
    pub fn check(&self) -> ExecutionResult<()> {
        if self.replaced == Some(ReplacementReason::Cancelled) {
            return Err(SdkError::new(
                ErrorCode::TransactionCanceled,
                "Transaction was canceled.",
            )
            .into());
        }
        if self.receipt.status == Some(U64::zero()) {
            return Err(SdkError::new(ErrorCode::TransactionFailed, "Transaction was reverted.")
                .with_cause(format!("{:?}", self.tx_hash))
                .into());
        }
        Ok(())
    }
}

/// Watcher caches of one EVM executor instance
pub struct EvmWatchers {
    pub receipts: WatcherRegistry<ReceiptOutcome>,
    pub batches: WatcherRegistry<BatchStatus>,
    pub relays: WatcherRegistry<RelayStatusResponse>,
    /// Transactions sent by this executor whose receipt is not settled yet
    submitted: DashMap<H256, Transaction>,
}

impl EvmWatchers {
    pub fn new() -> Self {
        Self {
            receipts: WatcherRegistry::new("receipt"),
            batches: WatcherRegistry::new("batch"),
            relays: WatcherRegistry::new("relay"),
            submitted: DashMap::new(),
        }
    }

    pub fn remember_submitted(&self, hash: H256, sent: Transaction) {
        self.submitted.insert(hash, Transaction { hash, ..sent });
    }
}

impl Default for EvmWatchers {
    fn default() -> Self {
        Self::new()
    }
}

/// What a replacement is compared against when the node never returned the original
pub fn submitted_transaction(tx: &TypedTransaction, from: Address, nonce: U256) -> Transaction {
    Transaction {
        from,
        nonce,
        to: tx.to_addr().copied(),
        value: tx.value().copied().unwrap_or_default(),
        input: tx.data().cloned().unwrap_or_default(),
        ..Transaction::default()
    }
}

fn replacement_reason(original: &Transaction, replacement: &Transaction) -> ReplacementReason {
    if replacement.to == original.to
        && replacement.input == original.input
        && replacement.value == original.value
    {
        ReplacementReason::Repriced
    } else if replacement.to == Some(original.from) && replacement.value.is_zero() {
        ReplacementReason::Cancelled
    } else {
        ReplacementReason::Replaced
    }
}

/// Poll state of one receipt watch
struct ReceiptWatch {
    client: Arc<dyn EvmPublicClient>,
    hash: H256,
    /// The watched transaction as sent, or as last seen in the mempool
    original: Option<Transaction>,
    /// Next block to search for a replacement
    scan_from: Option<u64>,
}

impl ReceiptWatch {
    fn new(client: Arc<dyn EvmPublicClient>, hash: H256, original: Option<Transaction>) -> Self {
        Self {
            client,
            hash,
            original,
            scan_from: None,
        }
    }

    async fn poll(&mut self) -> ExecutionResult<Option<ReceiptOutcome>> {
        crate::metrics::record_watcher_poll("receipt");

        if self.scan_from.is_none() {
            let head = self.client.block_number().await?;
            self.scan_from = Some(head.saturating_sub(REPLACEMENT_LOOKBACK_BLOCKS));
        }

        if let Some(receipt) = self.client.receipt(self.hash).await? {
            return Ok(Some(ReceiptOutcome {
                tx_hash: self.hash,
                receipt,
                replaced: None,
            }));
        }

        if let Some(tx) = self.client.transaction(self.hash).await? {
            // Still known to the node: keep waiting
            self.original = Some(tx);
            return Ok(None);
        }
        let Some(original) = self.original.clone() else {
            debug!("Transaction {:?} not visible yet", self.hash);
            return Ok(None);
        };

        // Dropped from the mempool. Only a consumed nonce means a replacement.
        let next_nonce = self.client.transaction_count(original.from).await?;
        if next_nonce <= original.nonce {
            return Ok(None);
        }

        self.find_replacement(&original).await
    }

    async fn find_replacement(
        &mut self,
        original: &Transaction,
    ) -> ExecutionResult<Option<ReceiptOutcome>> {
        let head = self.client.block_number().await?;
        let start = self.scan_from.unwrap_or(head);

        for number in start..=head {
            let Some(block) = self.client.block_with_transactions(number).await? else {
                return Ok(None);
            };

            let found = block
                .transactions
                .iter()
                .find(|tx| tx.from == original.from && tx.nonce == original.nonce);

            if let Some(replacement) = found {
                let Some(receipt) = self.client.receipt(replacement.hash).await? else {
                    // Receipt not indexed yet, rescan this block next time
                    return Ok(None);
                };
                let reason = replacement_reason(original, replacement);
                info!(
                    "Transaction {:?} was {:?} by {:?}",
                    self.hash, reason, replacement.hash
                );
                return Ok(Some(ReceiptOutcome {
                    tx_hash: replacement.hash,
                    receipt,
                    replaced: Some(reason),
                }));
            }

            self.scan_from = Some(number + 1);
        }

        Ok(None)
    }
}

/// Wait for the receipt of `hash`, sharing the poll with concurrent watchers
pub async fn wait_for_receipt(
    watchers: &EvmWatchers,
    client: Arc<dyn EvmPublicClient>,
    hash: H256,
    params: WatchParams,
) -> ExecutionResult<ReceiptOutcome> {
    let key = format!("{}:{:?}", client.chain_id(), hash);
    let original = watchers.submitted.get(&hash).map(|tx| tx.value().clone());

    let watch = watchers.receipts.watch(&key, move || {
        async move {
            let state = Arc::new(Mutex::new(ReceiptWatch::new(client, hash, original)));
            wait_for_result(
                || {
                    let state = state.clone();
                    async move { state.lock().await.poll().await }
                },
                params.interval,
                params.max_retries,
                retry_transient,
            )
            .await
        }
        .boxed()
    });

    let result = tokio::time::timeout(params.timeout, watch)
        .await
        .map_err(|_| timed_out("the transaction receipt"));
    if matches!(result, Ok(Ok(_))) {
        watchers.submitted.remove(&hash);
    }
    result?
}

fn interpret_batch(status: BatchStatus) -> ExecutionResult<Option<BatchStatus>> {
    if let Some(failed) = status.failed_call() {
        warn!("Batched call {:?} failed", failed.transaction_hash);
        return Err(SdkError::new(ErrorCode::TransactionFailed, "Batched call failed.")
            .with_cause(format!("{:?}", failed.transaction_hash))
            .into());
    }

    match status.state {
        BatchState::Pending => Ok(None),
        BatchState::Confirmed => Ok(Some(status)),
        BatchState::Failed => Err(SdkError::new(
            ErrorCode::TransactionFailed,
            "Batch transaction failed.",
        )
        .into()),
    }
}

/// Wait for a `wallet_sendCalls` batch to settle
pub async fn wait_for_batch(
    watchers: &EvmWatchers,
    wallet: Arc<dyn EvmWallet>,
    chain_id: ChainId,
    batch_id: &str,
    params: WatchParams,
) -> ExecutionResult<BatchStatus> {
    let key = format!("{}:{}", chain_id, batch_id);
    let id = batch_id.to_string();

    let watch = watchers.batches.watch(&key, move || {
        async move {
            wait_for_result(
                || {
                    let wallet = wallet.clone();
                    let id = id.clone();
                    async move {
                        crate::metrics::record_watcher_poll("batch");
                        interpret_batch(wallet.calls_status(&id).await?)
                    }
                },
                params.interval,
                params.max_retries,
                retry_transient,
            )
            .await
        }
        .boxed()
    });

    tokio::time::timeout(params.timeout, watch)
        .await
        .map_err(|_| timed_out("the batch"))?
}

fn interpret_relay(status: RelayStatusResponse) -> ExecutionResult<Option<RelayStatusResponse>> {
    match status.status {
        RelayTaskStatus::Pending => Ok(None),
        RelayTaskStatus::Done if status.tx_hash.is_some() => Ok(Some(status)),
        RelayTaskStatus::Done => Ok(None),
        RelayTaskStatus::Failed => {
            let message = status
                .message
                .unwrap_or_else(|| "Relayed transaction failed.".to_string());
            Err(SdkError::new(ErrorCode::TransactionFailed, message).into())
        }
    }
}

/// Wait for the relayer to land task `task_id` on chain
pub async fn wait_for_relay(
    watchers: &EvmWatchers,
    quotes: Arc<dyn StepService>,
    task_id: &str,
    params: WatchParams,
) -> ExecutionResult<RelayStatusResponse> {
    let id = task_id.to_string();

    let watch = watchers.relays.watch(task_id, move || {
        async move {
            wait_for_result(
                || {
                    let quotes = quotes.clone();
                    let id = id.clone();
                    async move {
                        crate::metrics::record_watcher_poll("relay");
                        interpret_relay(quotes.relay_status(&id).await?)
                    }
                },
                params.interval,
                params.max_retries,
                retry_transient,
            )
            .await
        }
        .boxed()
    });

    tokio::time::timeout(params.timeout, watch)
        .await
        .map_err(|_| timed_out("the relayer"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainError;
    use crate::evm::client::CallReceipt;
    use ethers::types::{Block, Bytes, TransactionRequest};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Scripted chain: a mempool that can drop transactions and blocks that
    /// can contain replacements
    #[derive(Default)]
    struct FakeChain {
        head: StdMutex<u64>,
        mempool: StdMutex<HashMap<H256, Transaction>>,
        receipts: StdMutex<HashMap<H256, TransactionReceipt>>,
        blocks: StdMutex<HashMap<u64, Vec<Transaction>>>,
        nonce: StdMutex<U256>,
        receipt_polls: AtomicU32,
    }

    impl FakeChain {
        fn mine(&self, number: u64, tx: Transaction, status: u64) {
            let receipt = TransactionReceipt {
                transaction_hash: tx.hash,
                status: Some(U64::from(status)),
                ..TransactionReceipt::default()
            };
            self.receipts.lock().unwrap().insert(tx.hash, receipt);
            self.blocks.lock().unwrap().entry(number).or_default().push(tx);
            *self.head.lock().unwrap() = number;
            *self.nonce.lock().unwrap() += U256::one();
        }
    }

    #[async_trait::async_trait]
    impl EvmPublicClient for FakeChain {
        fn chain_id(&self) -> ChainId {
            137
        }

        async fn block_number(&self) -> Result<u64, ChainError> {
            Ok(*self.head.lock().unwrap())
        }

        async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError> {
            Ok(self.mempool.lock().unwrap().get(&hash).cloned())
        }

        async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
            self.receipt_polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.receipts.lock().unwrap().get(&hash).cloned())
        }

        async fn transaction_count(&self, _address: Address) -> Result<U256, ChainError> {
            Ok(*self.nonce.lock().unwrap())
        }

        async fn block_with_transactions(
            &self,
            number: u64,
        ) -> Result<Option<Block<Transaction>>, ChainError> {
            let mut block = Block::<Transaction>::default();
            block.transactions = self
                .blocks
                .lock()
                .unwrap()
                .get(&number)
                .cloned()
                .unwrap_or_default();
            Ok(Some(block))
        }

        async fn call(&self, _tx: &TypedTransaction) -> Result<Bytes, ChainError> {
            Ok(Bytes::default())
        }

        async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256, ChainError> {
            Ok(U256::from(21_000))
        }

        async fn gas_price(&self) -> Result<U256, ChainError> {
            Ok(U256::one())
        }
    }

    fn params() -> WatchParams {
        WatchParams {
            interval: Duration::from_millis(1),
            max_retries: 3,
            timeout: Duration::from_secs(5),
        }
    }

    fn swap_tx(hash: u8) -> Transaction {
        Transaction {
            hash: H256::repeat_byte(hash),
            from: Address::repeat_byte(0x11),
            to: Some(Address::repeat_byte(0x44)),
            nonce: U256::zero(),
            input: Bytes::from(vec![0xde, 0xad]),
            ..Transaction::default()
        }
    }

    #[tokio::test]
    async fn test_mined_transaction_resolves() {
        let chain = Arc::new(FakeChain::default());
        chain.mine(1, swap_tx(0xaa), 1);

        let outcome = wait_for_receipt(&EvmWatchers::new(), chain, H256::repeat_byte(0xaa), params())
            .await
            .unwrap();
        assert_eq!(outcome.replaced, None);
        assert!(outcome.check().is_ok());
    }

    #[tokio::test]
    async fn test_speed_up_is_followed_to_the_new_hash() {
        let chain = Arc::new(FakeChain::default());
        chain.mempool.lock().unwrap().insert(H256::repeat_byte(0xaa), swap_tx(0xaa));

        let watcher = {
            let chain = chain.clone();
            tokio::spawn(async move {
                wait_for_receipt(&EvmWatchers::new(), chain, H256::repeat_byte(0xaa), params()).await
            })
        };

        while chain.receipt_polls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        chain.mempool.lock().unwrap().clear();
        chain.mine(1, swap_tx(0xbb), 1);

        let outcome = watcher.await.unwrap().unwrap();
        assert_eq!(outcome.tx_hash, H256::repeat_byte(0xbb));
        assert_eq!(outcome.replaced, Some(ReplacementReason::Repriced));
        assert!(outcome.check().is_ok());
    }

    #[tokio::test]
    async fn test_replacement_found_when_original_never_reached_the_mempool() {
        let chain = Arc::new(FakeChain::default());
        chain.mine(1, swap_tx(0xbb), 1);

        let watchers = EvmWatchers::new();
        let sent: TypedTransaction = TransactionRequest::new()
            .to(Address::repeat_byte(0x44))
            .data(vec![0xde, 0xad])
            .into();
        watchers.remember_submitted(
            H256::repeat_byte(0xaa),
            submitted_transaction(&sent, Address::repeat_byte(0x11), U256::zero()),
        );

        let outcome = wait_for_receipt(&watchers, chain, H256::repeat_byte(0xaa), params())
            .await
            .unwrap();
        assert_eq!(outcome.tx_hash, H256::repeat_byte(0xbb));
        assert_eq!(outcome.replaced, Some(ReplacementReason::Repriced));
        assert!(watchers.submitted.is_empty());
    }

    #[test]
    fn test_cancellation_and_revert_fail_the_action() {
        let original = swap_tx(0xaa);
        let cancel = Transaction {
            hash: H256::repeat_byte(0xcc),
            to: Some(original.from),
            input: Bytes::default(),
            ..original.clone()
        };
        assert_eq!(replacement_reason(&original, &cancel), ReplacementReason::Cancelled);

        let cancelled = ReceiptOutcome {
            tx_hash: cancel.hash,
            receipt: TransactionReceipt {
                status: Some(U64::one()),
                ..TransactionReceipt::default()
            },
            replaced: Some(ReplacementReason::Cancelled),
        };
        assert_eq!(
            cancelled.check().unwrap_err().code(),
            Some(ErrorCode::TransactionCanceled)
        );

        let reverted = ReceiptOutcome {
            tx_hash: original.hash,
            receipt: TransactionReceipt {
                status: Some(U64::zero()),
                ..TransactionReceipt::default()
            },
            replaced: None,
        };
        assert_eq!(
            reverted.check().unwrap_err().code(),
            Some(ErrorCode::TransactionFailed)
        );
    }

    #[test]
    fn test_batch_fails_on_first_failed_call() {
        let status = BatchStatus {
            state: BatchState::Pending,
            receipts: vec![
                CallReceipt {
                    transaction_hash: H256::repeat_byte(1),
                    success: true,
                },
                CallReceipt {
                    transaction_hash: H256::repeat_byte(2),
                    success: false,
                },
            ],
        };
        let err = interpret_batch(status).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionFailed));

        let pending = BatchStatus {
            state: BatchState::Pending,
            receipts: Vec::new(),
        };
        assert!(interpret_batch(pending).unwrap().is_none());
    }

    #[test]
    fn test_relay_done_without_hash_keeps_polling() {
        let done = RelayStatusResponse {
            status: RelayTaskStatus::Done,
            tx_hash: None,
            message: None,
        };
        assert!(interpret_relay(done).unwrap().is_none());
    }
}
