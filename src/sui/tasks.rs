use super::client::validate_transaction_block;
use super::executor::SuiChain;
use super::watch::wait_for_sui_transaction;
use crate::chain::{ChainId, ChainType};
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::guard::ensure_same_wallet;
use crate::pipeline::{ExecutionTask, TaskContext, TaskOutcome};
use crate::step::{Action, ActionPatch, ActionStatus, ActionType};
use crate::tasks::{main_action_type, transaction_kind};
use crate::watch::WatchParams;

use async_trait::async_trait;
use tracing::info;

/// Have the wallet sign and execute the transaction block, then wait for
/// its checkpoint
pub struct ExecuteSuiTransactionTask;

impl ExecuteSuiTransactionTask {
    async fn confirm(
        ctx: &TaskContext<SuiChain>,
        action_type: ActionType,
        chain_id: ChainId,
        digest: &str,
    ) -> ExecutionResult<TaskOutcome> {
        let effects = wait_for_sui_transaction(
            &ctx.chain.watchers,
            ctx.chain.client.clone(),
            digest,
            WatchParams::from(ctx.step.settings()),
        )
        .await?;

        ctx.step.update_action(
            action_type,
            ActionStatus::Done,
            ctx.step.tx_patch(chain_id, &effects.digest),
        )?;
        info!(
            "Step {} settled {} in checkpoint {:?}",
            ctx.step_id(),
            effects.digest,
            effects.checkpoint
        );
        Ok(TaskOutcome::completed())
    }
}

#[async_trait]
impl ExecutionTask<SuiChain> for ExecuteSuiTransactionTask {
    fn name(&self) -> &'static str {
        "execute_sui_transaction"
    }

    fn action_type(&self, ctx: &TaskContext<SuiChain>) -> Option<ActionType> {
        ctx.step.step().ok().map(|s| main_action_type(&s))
    }

    fn should_run(&self, _ctx: &TaskContext<SuiChain>, action: Option<&Action>) -> bool {
        !action.map(|a| a.is_done()).unwrap_or(false)
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<SuiChain>,
        _action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let step = ctx.step.step()?;
        let action_type = main_action_type(&step);
        let chain_id = step.action.from_chain_id;
        let action = ctx.step.find_or_create_action(action_type, chain_id)?;

        if let Some(digest) = action.tx_hash.clone().or_else(|| ctx.state.tx_hash.clone()) {
            info!("Resuming Sui transaction {} of step {}", digest, step.id);
            return Self::confirm(ctx, action_type, chain_id, &digest).await;
        }

        let block = step
            .transaction_request
            .as_ref()
            .and_then(|r| r.data.clone())
            .ok_or_else(|| {
                SdkError::new(ErrorCode::TransactionUnprepared, "Unable to prepare transaction.")
            })?;
        validate_transaction_block(&block)?;

        if !ctx.step.allow_interaction() {
            ctx.step
                .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
            return Ok(TaskOutcome::paused());
        }

        ensure_same_wallet(
            ctx.chain.wallet.as_ref(),
            step.action.from_address.as_deref(),
            ChainType::Mvm,
        )
        .await?;

        ctx.step
            .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
        let digest = ctx.chain.wallet.sign_and_execute(&block).await?;
        ctx.state.tx_hash = Some(digest.clone());

        ctx.step.update_action(
            action_type,
            ActionStatus::Pending,
            ctx.step.tx_patch(chain_id, &digest),
        )?;
        ctx.step
            .record_transaction(transaction_kind(action_type), chain_id, Some(&digest), None)?;
        info!("Step {} executed Sui transaction {}", step.id, digest);

        Self::confirm(ctx, action_type, chain_id, &digest).await
    }
}
