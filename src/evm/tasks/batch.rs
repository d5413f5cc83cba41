use super::{ensure_quoted_wallet, watch_params};
use crate::error::{ErrorCode, ExecutionError, ExecutionResult, RetryParams, SdkError};
use crate::evm::adapter::{format_hash, EvmChain};
use crate::evm::errors::ATOMIC_UPGRADE_REJECTED;
use crate::evm::request::to_prepared_call;
use crate::evm::watch::wait_for_batch;
use crate::pipeline::{ExecutionTask, TaskContext, TaskOutcome};
use crate::step::{Action, ActionPatch, ActionStatus, ActionType, TransactionKind};
use crate::tasks::main_action_type;

use async_trait::async_trait;
use tracing::{info, warn};

/// Submit the approval (if any) and the main call as one EIP-5792 batch
pub struct BatchTransactionTask;

impl BatchTransactionTask {
    async fn settle(
        ctx: &TaskContext<EvmChain>,
        action_type: ActionType,
        chain_id: u64,
        batch_id: &str,
    ) -> ExecutionResult<TaskOutcome> {
        let status = wait_for_batch(
            &ctx.chain.watchers,
            ctx.chain.wallet.clone(),
            chain_id,
            batch_id,
            watch_params(ctx),
        )
        .await?;

        let hash = status.settlement_hash().map(format_hash);
        ctx.step.record_transaction(
            TransactionKind::Batch,
            chain_id,
            hash.as_deref(),
            Some(batch_id),
        )?;

        let patch = match &hash {
            Some(hash) => ctx.step.tx_patch(chain_id, hash),
            None => ActionPatch::task(batch_id),
        };
        // the batched approval settles with the main call
        ctx.step
            .advance_action(ActionType::TokenAllowance, ActionStatus::Done, patch.clone())?;
        ctx.step.update_action(action_type, ActionStatus::Done, patch)?;
        info!("Batch {} of step {} confirmed", batch_id, ctx.step_id());
        Ok(TaskOutcome::completed())
    }
}

#[async_trait]
impl ExecutionTask<EvmChain> for BatchTransactionTask {
    fn name(&self) -> &'static str {
        "batch_transaction"
    }

    fn action_type(&self, ctx: &TaskContext<EvmChain>) -> Option<ActionType> {
        ctx.step.step().ok().map(|s| main_action_type(&s))
    }

    fn should_run(&self, _ctx: &TaskContext<EvmChain>, action: Option<&Action>) -> bool {
        !action.map(|a| a.is_done()).unwrap_or(false)
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<EvmChain>,
        _action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let step = ctx.step.step()?;
        let action_type = main_action_type(&step);
        let chain_id = step.action.from_chain_id;
        let action = ctx.step.find_or_create_action(action_type, chain_id)?;

        if let Some(batch_id) = action.task_id.clone().or_else(|| ctx.state.task_id.clone()) {
            info!("Resuming batch {} of step {}", batch_id, step.id);
            return Self::settle(ctx, action_type, chain_id, &batch_id).await;
        }

        if !ctx.step.allow_interaction() {
            ctx.step
                .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
            return Ok(TaskOutcome::paused());
        }

        ensure_quoted_wallet(ctx).await?;

        let request = step.transaction_request.clone().ok_or_else(|| {
            SdkError::new(
                ErrorCode::TransactionUnprepared,
                "Unable to prepare transaction.",
            )
        })?;
        let request = ctx.step.interaction().update_transaction_request(request).await;

        let mut calls = Vec::new();
        if let Some(approval) = ctx.state.allowance.as_ref().and_then(|a| a.batch_call()) {
            calls.push(approval.clone());
        }
        calls.push(to_prepared_call(&request)?);
        ctx.state.calls = calls.clone();

        ctx.step
            .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
        let batch_id = match ctx.chain.wallet.send_calls(chain_id, &calls).await {
            Ok(id) => id,
            Err(e) if e.code == Some(ATOMIC_UPGRADE_REJECTED) => {
                warn!("Atomic batch upgrade rejected for step {}", step.id);
                return Err(ExecutionError::retry(
                    "Wallet rejected the atomic batch upgrade.",
                    RetryParams {
                        disable_atomic_batch: true,
                        ..RetryParams::default()
                    },
                ));
            }
            Err(e) => return Err(e.into()),
        };

        ctx.state.task_id = Some(batch_id.clone());
        ctx.step.update_action(
            action_type,
            ActionStatus::Pending,
            ActionPatch::task(batch_id.clone()),
        )?;
        ctx.step
            .record_transaction(TransactionKind::Batch, chain_id, None, Some(&batch_id))?;
        info!("Step {} submitted batch {} with {} calls", step.id, batch_id, calls.len());

        Self::settle(ctx, action_type, chain_id, &batch_id).await
    }
}
