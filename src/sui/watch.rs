use super::client::{SuiClient, SuiExecutionStatus, SuiTransactionEffects};
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::watch::{retry_transient, timed_out, wait_for_result, WatchParams, WatcherRegistry};

use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, warn};

fn interpret_effects(
    digest: &str,
    effects: Option<SuiTransactionEffects>,
) -> ExecutionResult<Option<SuiTransactionEffects>> {
    let Some(effects) = effects else {
        debug!("Sui transaction {} not indexed yet", digest);
        return Ok(None);
    };

    if effects.status == SuiExecutionStatus::Failure {
        let cause = effects.error.clone().unwrap_or_default();
        warn!("Sui transaction {} failed: {}", digest, cause);
        return Err(SdkError::new(ErrorCode::TransactionFailed, "Transaction failed.")
            .with_cause(cause)
            .into());
    }

    Ok(effects.checkpoint.map(|_| effects))
}

/// Wait until `digest` is included in a checkpoint
pub async fn wait_for_sui_transaction(
    watchers: &WatcherRegistry<SuiTransactionEffects>,
    client: Arc<dyn SuiClient>,
    digest: &str,
    params: WatchParams,
) -> ExecutionResult<SuiTransactionEffects> {
    let id = digest.to_string();

    let watch = watchers.watch(digest, move || {
        async move {
            wait_for_result(
                || {
                    let client = client.clone();
                    let id = id.clone();
                    async move {
                        crate::metrics::record_watcher_poll("sui_transaction");
                        interpret_effects(&id, client.transaction_effects(&id).await?)
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
        .map_err(|_| timed_out("the Sui transaction"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effects(status: SuiExecutionStatus, checkpoint: Option<u64>) -> SuiTransactionEffects {
        SuiTransactionEffects {
            digest: "D1".to_string(),
            status,
            error: Some("InsufficientCoinBalance in command 0".to_string()),
            checkpoint,
        }
    }

    #[test]
    fn test_effects_resolve_once_checkpointed() {
        assert!(interpret_effects("D1", None).unwrap().is_none());
        assert!(interpret_effects("D1", Some(effects(SuiExecutionStatus::Success, None)))
            .unwrap()
            .is_none());
        let done = interpret_effects("D1", Some(effects(SuiExecutionStatus::Success, Some(7))))
            .unwrap()
            .unwrap();
        assert_eq!(done.checkpoint, Some(7));
    }

    #[test]
    fn test_failed_effects_fail_even_before_checkpoint() {
        let err = interpret_effects("D1", Some(effects(SuiExecutionStatus::Failure, None)))
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionFailed));
    }
}
