use super::client::{validate_psbt, validate_raw_transaction};
use super::executor::UtxoChain;
use super::watch::wait_for_utxo_transaction;
use crate::chain::{recommended_confirmations, ChainId, ChainType};
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::guard::ensure_same_wallet;
use crate::pipeline::{ExecutionTask, TaskContext, TaskOutcome};
use crate::step::{Action, ActionPatch, ActionStatus, ActionType};
use crate::tasks::{main_action_type, transaction_kind};
use crate::watch::WatchParams;

use async_trait::async_trait;
use tracing::info;

/// Sign the PSBT, broadcast it and wait for the configured confirmation depth
pub struct SendUtxoTransactionTask;

impl SendUtxoTransactionTask {
    async fn confirm(
        ctx: &mut TaskContext<UtxoChain>,
        action_type: ActionType,
        chain_id: ChainId,
        txid: &str,
    ) -> ExecutionResult<TaskOutcome> {
        let required = ctx
            .step
            .services
            .chains
            .get(chain_id)
            .map(|c| c.confirmations)
            .unwrap_or_else(|| recommended_confirmations(chain_id));

        let confirmation = wait_for_utxo_transaction(
            &ctx.chain.watchers,
            ctx.chain.client.clone(),
            txid,
            required,
            WatchParams::from(ctx.step.settings()),
        )
        .await?;

        if confirmation.replaced {
            info!(
                "Step {} settled by replacement {} of {}",
                ctx.step_id(),
                confirmation.txid,
                txid
            );
            ctx.state.tx_hash = Some(confirmation.txid.clone());
            ctx.step.record_transaction(
                transaction_kind(action_type),
                chain_id,
                Some(&confirmation.txid),
                None,
            )?;
        }

        ctx.step.update_action(
            action_type,
            ActionStatus::Done,
            ctx.step.tx_patch(chain_id, &confirmation.txid),
        )?;
        Ok(TaskOutcome::completed())
    }
}

#[async_trait]
impl ExecutionTask<UtxoChain> for SendUtxoTransactionTask {
    fn name(&self) -> &'static str {
        "send_utxo_transaction"
    }

    fn action_type(&self, ctx: &TaskContext<UtxoChain>) -> Option<ActionType> {
        ctx.step.step().ok().map(|s| main_action_type(&s))
    }

    fn should_run(&self, _ctx: &TaskContext<UtxoChain>, action: Option<&Action>) -> bool {
        !action.map(|a| a.is_done()).unwrap_or(false)
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<UtxoChain>,
        _action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let step = ctx.step.step()?;
        let action_type = main_action_type(&step);
        let chain_id = step.action.from_chain_id;
        let action = ctx.step.find_or_create_action(action_type, chain_id)?;

        if let Some(txid) = action.tx_hash.clone().or_else(|| ctx.state.tx_hash.clone()) {
            info!("Resuming Bitcoin transaction {} of step {}", txid, step.id);
            return Self::confirm(ctx, action_type, chain_id, &txid).await;
        }

        let psbt = step
            .transaction_request
            .as_ref()
            .and_then(|r| r.data.clone())
            .ok_or_else(|| {
                SdkError::new(ErrorCode::TransactionUnprepared, "Unable to prepare transaction.")
            })?;
        validate_psbt(&psbt)?;

        if !ctx.step.allow_interaction() {
            ctx.step
                .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
            return Ok(TaskOutcome::paused());
        }

        ensure_same_wallet(
            ctx.chain.wallet.as_ref(),
            step.action.from_address.as_deref(),
            ChainType::Utxo,
        )
        .await?;

        ctx.step
            .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
        let raw_tx = ctx.chain.wallet.sign_psbt(&psbt).await?;
        validate_raw_transaction(&raw_tx)?;
        ctx.state.signed_transaction = Some(raw_tx.clone());

        let txid = ctx.chain.client.broadcast(&raw_tx).await?;
        ctx.state.tx_hash = Some(txid.clone());
        ctx.step.update_action(
            action_type,
            ActionStatus::Pending,
            ctx.step.tx_patch(chain_id, &txid),
        )?;
        ctx.step
            .record_transaction(transaction_kind(action_type), chain_id, Some(&txid), None)?;
        info!("Step {} broadcast {}", step.id, txid);

        Self::confirm(ctx, action_type, chain_id, &txid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainInfo, BITCOIN_CHAIN_ID};
    use crate::error::ExecutionError;
    use crate::interaction::ExecutionOptions;
    use crate::step::TransactionKind;
    use crate::testing::services_for;
    use crate::utxo::client::UtxoTxStatus;
    use crate::utxo::errors::classify_utxo_error;
    use crate::utxo::testing::{utxo_context, utxo_step, FakeBitcoin, SIGNED_TX};
    use std::sync::Arc;

    fn context(fake: Arc<FakeBitcoin>, options: ExecutionOptions) -> TaskContext<UtxoChain> {
        utxo_context(services_for(utxo_step("s1", 1)), "s1", options, fake)
    }

    #[tokio::test]
    async fn test_signs_broadcasts_and_confirms() {
        let fake = Arc::new(FakeBitcoin::new());
        let mut ctx = context(fake.clone(), ExecutionOptions::default());

        SendUtxoTransactionTask.run(&mut ctx, None).await.unwrap();

        assert_eq!(fake.broadcasts.lock().unwrap().clone(), vec![SIGNED_TX.to_string()]);
        assert_eq!(ctx.state.signed_transaction.as_deref(), Some(SIGNED_TX));
        let action = ctx.step.action(ActionType::CrossChain).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Done);
        assert_eq!(action.tx_hash.as_deref(), Some("txid-1"));
    }

    #[tokio::test]
    async fn test_replacement_becomes_the_recorded_transaction() {
        let fake = Arc::new(FakeBitcoin::new());
        fake.script(
            "txid-1",
            vec![
                UtxoTxStatus::Mempool,
                UtxoTxStatus::Replaced {
                    by: "txid-bumped".to_string(),
                },
            ],
        );
        let mut ctx = context(fake, ExecutionOptions::default());

        SendUtxoTransactionTask.run(&mut ctx, None).await.unwrap();

        let action = ctx.step.action(ActionType::CrossChain).unwrap().unwrap();
        assert_eq!(action.tx_hash.as_deref(), Some("txid-bumped"));
        assert_eq!(
            action.tx_link.as_deref(),
            Some("https://explorer.btc.example/tx/txid-bumped")
        );
        let execution = ctx.step.execution().unwrap().unwrap();
        assert_eq!(
            execution
                .transaction(TransactionKind::CrossChain)
                .and_then(|t| t.tx_hash.clone()),
            Some("txid-bumped".to_string())
        );
        assert_eq!(ctx.state.tx_hash.as_deref(), Some("txid-bumped"));
    }

    #[tokio::test]
    async fn test_honours_configured_confirmations() {
        let fake = Arc::new(FakeBitcoin::new());
        fake.script("txid-1", vec![UtxoTxStatus::Confirmed { block_height: 500 }]);
        fake.mine_on_poll(500);
        let services = services_for(utxo_step("s1", 1));
        let mut btc = ChainInfo::new(BITCOIN_CHAIN_ID, "btc", ChainType::Utxo);
        btc.confirmations = 4;
        services.chains.insert(btc);
        let mut ctx = utxo_context(services, "s1", ExecutionOptions::default(), fake.clone());

        SendUtxoTransactionTask.run(&mut ctx, None).await.unwrap();
        assert!(fake.height() >= 504);
    }

    #[tokio::test]
    async fn test_pauses_before_signing_without_interaction() {
        let fake = Arc::new(FakeBitcoin::new());
        let mut ctx = context(fake.clone(), ExecutionOptions::non_interactive());

        let outcome = SendUtxoTransactionTask.run(&mut ctx, None).await.unwrap();
        assert!(outcome.is_paused());
        assert!(fake.signed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spent_inputs_are_a_conflict() {
        let fake = Arc::new(FakeBitcoin::new().failing_broadcast("txn-mempool-conflict"));
        let mut ctx = context(fake, ExecutionOptions::default());

        let err = SendUtxoTransactionTask.run(&mut ctx, None).await.unwrap_err();
        let ExecutionError::Chain(raw) = err else {
            panic!("expected a raw indexer error");
        };
        assert_eq!(classify_utxo_error(&raw).code, ErrorCode::TransactionConflict);
    }
}
