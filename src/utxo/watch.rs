//! Bitcoin confirmation watcher following replace-by-fee replacements

use super::client::{UtxoClient, UtxoTxStatus};
use crate::chain::finality::has_confirmations;
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::watch::{retry_transient, timed_out, wait_for_result, WatchParams, WatcherRegistry};

use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct UtxoConfirmation {
    /// Txid that was actually mined
    pub txid: String,
    pub block_height: u64,
    pub replaced: bool,
}

struct UtxoWatch {
    client: Arc<dyn UtxoClient>,
    original: String,
    txid: String,
    required: u64,
    /// Seen in the mempool or a block at least once
    seen: bool,
}

impl UtxoWatch {
    async fn poll(&mut self) -> ExecutionResult<Option<UtxoConfirmation>> {
        crate::metrics::record_watcher_poll("utxo_transaction");

        match self.client.transaction_status(&self.txid).await? {
            UtxoTxStatus::Confirmed { block_height } => {
                self.seen = true;
                let current = self.client.block_height().await?;
                if !has_confirmations(current, block_height, self.required) {
                    debug!(
                        "{} mined at {}, tip {}, waiting for {} confirmations",
                        self.txid, block_height, current, self.required
                    );
                    return Ok(None);
                }
                Ok(Some(UtxoConfirmation {
                    txid: self.txid.clone(),
                    block_height,
                    replaced: self.txid != self.original,
                }))
            }
            UtxoTxStatus::Mempool => {
                self.seen = true;
                Ok(None)
            }
            UtxoTxStatus::Replaced { by } => {
                info!("Transaction {} was replaced by {}", self.txid, by);
                self.txid = by;
                self.seen = false;
                Ok(None)
            }
            UtxoTxStatus::NotFound if self.seen => {
                warn!("Transaction {} disappeared from the mempool", self.txid);
                Err(SdkError::new(
                    ErrorCode::TransactionConflict,
                    "Transaction was dropped from the mempool.",
                )
                .with_cause(self.txid.clone())
                .into())
            }
            UtxoTxStatus::NotFound => {
                debug!("Transaction {} not propagated yet", self.txid);
                Ok(None)
            }
        }
    }
}

/// Wait for `txid`, or the transaction replacing it, to reach `required` confirmations
pub async fn wait_for_utxo_transaction(
    watchers: &WatcherRegistry<UtxoConfirmation>,
    client: Arc<dyn UtxoClient>,
    txid: &str,
    required: u64,
    params: WatchParams,
) -> ExecutionResult<UtxoConfirmation> {
    let state = UtxoWatch {
        client,
        original: txid.to_string(),
        txid: txid.to_string(),
        required,
        seen: false,
    };

    let watch = watchers.watch(txid, move || {
        async move {
            let state = Arc::new(Mutex::new(state));
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

    tokio::time::timeout(params.timeout, watch)
        .await
        .map_err(|_| timed_out("the Bitcoin transaction"))?
}
