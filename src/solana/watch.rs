//! Solana confirmation watchers
//!
//! - signatures, expiring once the blockhash can no longer land
//! - Jito bundles

use super::client::{BundleState, BundleStatus, JitoClient, SignatureStatus, SolanaRpc};
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::watch::{retry_transient, timed_out, wait_for_result, WatchParams, WatcherRegistry};

use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Blocks a recent blockhash stays valid for
pub const BLOCKHASH_VALIDITY_BLOCKS: u64 = 150;

pub struct SolanaWatchers {
    pub signatures: WatcherRegistry<SignatureStatus>,
    pub bundles: WatcherRegistry<BundleStatus>,
}

impl SolanaWatchers {
    pub fn new() -> Self {
        Self {
            signatures: WatcherRegistry::new("solana_signature"),
            bundles: WatcherRegistry::new("jito_bundle"),
        }
    }
}

impl Default for SolanaWatchers {
    fn default() -> Self {
        Self::new()
    }
}

async fn poll_signature(
    rpc: &dyn SolanaRpc,
    signature: &str,
    submitted_at: u64,
) -> ExecutionResult<Option<SignatureStatus>> {
    crate::metrics::record_watcher_poll("solana_signature");

    if let Some(status) = rpc.signature_status(signature).await? {
        if let Some(err) = &status.err {
            warn!("Solana transaction {} failed: {}", signature, err);
            return Err(SdkError::new(ErrorCode::TransactionFailed, "Transaction failed.")
                .with_cause(err.clone())
                .into());
        }
        if status.is_confirmed() {
            return Ok(Some(status));
        }
    }

    let height = rpc.block_height().await?;
    if height > submitted_at + BLOCKHASH_VALIDITY_BLOCKS {
        return Err(SdkError::new(
            ErrorCode::TransactionExpired,
            "Transaction expired before it was confirmed.",
        )
        .with_cause(signature.to_string())
        .into());
    }

    debug!("Signature {} unconfirmed at block height {}", signature, height);
    Ok(None)
}

/// Wait until `signature` is confirmed, or expired relative to `submitted_at`
pub async fn wait_for_signature(
    watchers: &SolanaWatchers,
    rpc: Arc<dyn SolanaRpc>,
    signature: &str,
    submitted_at: u64,
    params: WatchParams,
) -> ExecutionResult<SignatureStatus> {
    let sig = signature.to_string();

    let watch = watchers.signatures.watch(signature, move || {
        async move {
            wait_for_result(
                || {
                    let rpc = rpc.clone();
                    let sig = sig.clone();
                    async move { poll_signature(rpc.as_ref(), &sig, submitted_at).await }
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
        .map_err(|_| timed_out("the Solana transaction"))?
}

fn interpret_bundle(status: BundleStatus) -> ExecutionResult<Option<BundleStatus>> {
    match status.state {
        BundleState::Pending => Ok(None),
        BundleState::Landed if !status.signatures.is_empty() => Ok(Some(status)),
        BundleState::Landed => Ok(None),
        BundleState::Failed | BundleState::Invalid => {
            let message = status
                .error
                .unwrap_or_else(|| "Jito bundle was not accepted.".to_string());
            Err(SdkError::new(ErrorCode::TransactionFailed, message).into())
        }
    }
}

/// Wait for a Jito bundle to land
pub async fn wait_for_bundle(
    watchers: &SolanaWatchers,
    jito: Arc<dyn JitoClient>,
    bundle_id: &str,
    params: WatchParams,
) -> ExecutionResult<BundleStatus> {
    let id = bundle_id.to_string();

    let watch = watchers.bundles.watch(bundle_id, move || {
        async move {
            wait_for_result(
                || {
                    let jito = jito.clone();
                    let id = id.clone();
                    async move {
                        crate::metrics::record_watcher_poll("jito_bundle");
                        interpret_bundle(jito.bundle_status(&id).await?)
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
        .map_err(|_| timed_out("the Jito bundle"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solana::testing::FakeSolana;
    use std::time::Duration;

    fn params() -> WatchParams {
        WatchParams {
            interval: Duration::from_millis(1),
            max_retries: 3,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_signature_confirms_after_a_few_polls() {
        let fake = Arc::new(FakeSolana::new().confirming_after(3));
        let status = wait_for_signature(&SolanaWatchers::new(), fake.clone(), "sig-1", 100, params())
            .await
            .unwrap();
        assert!(status.is_confirmed());
    }

    #[tokio::test]
    async fn test_unconfirmed_signature_expires_after_validity_window() {
        let fake = Arc::new(FakeSolana::new().never_confirming());
        fake.set_height(200);
        let err = wait_for_signature(&SolanaWatchers::new(), fake.clone(), "sig-1", 0, params())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionExpired));

        fake.set_height(150);
        assert!(poll_signature(fake.as_ref(), "sig-1", 0).await.unwrap().is_none());
        fake.set_height(151);
        assert!(poll_signature(fake.as_ref(), "sig-1", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_landed_with_instruction_error_fails() {
        let fake = Arc::new(FakeSolana::new().failing_with("InstructionError(2, Custom(1))"));
        let err = wait_for_signature(&SolanaWatchers::new(), fake, "sig-1", 100, params())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionFailed));
    }

    #[test]
    fn test_bundle_states() {
        let status = |state, signatures: Vec<&str>| BundleStatus {
            state,
            signatures: signatures.into_iter().map(String::from).collect(),
            error: None,
        };
        assert!(interpret_bundle(status(BundleState::Pending, vec![])).unwrap().is_none());
        assert!(interpret_bundle(status(BundleState::Landed, vec![])).unwrap().is_none());
        assert!(interpret_bundle(status(BundleState::Landed, vec!["sig"])).unwrap().is_some());
        let err = interpret_bundle(status(BundleState::Invalid, vec![])).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionFailed));
    }
}
