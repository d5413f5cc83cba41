use super::{ensure_quoted_wallet, watch_params};
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::evm::adapter::EvmChain;
use crate::evm::permit::into_signed;
use crate::evm::watch::wait_for_relay;
use crate::pipeline::{ExecutionTask, TaskContext, TaskOutcome};
use crate::quote::RelayRequest;
use crate::step::{Action, ActionPatch, ActionStatus, ActionType, SignedTypedData, TransactionKind};
use crate::tasks::main_action_type;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

fn message_deadline(message: &Value) -> Option<i64> {
    match message.get("deadline")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Sign the quoted intents and hand them to the gasless relayer
pub struct RelayedTransactionTask;

impl RelayedTransactionTask {
    async fn settle(
        ctx: &TaskContext<EvmChain>,
        action_type: ActionType,
        chain_id: u64,
        task_id: &str,
    ) -> ExecutionResult<TaskOutcome> {
        let status = wait_for_relay(
            &ctx.chain.watchers,
            ctx.step.services.quotes.clone(),
            task_id,
            watch_params(ctx),
        )
        .await?;

        let patch = match status.tx_hash.as_deref() {
            Some(hash) => {
                ctx.step.record_transaction(
                    TransactionKind::Relayed,
                    chain_id,
                    Some(hash),
                    Some(task_id),
                )?;
                ctx.step.tx_patch(chain_id, hash)
            }
            None => ActionPatch::task(task_id),
        };
        ctx.step.update_action(action_type, ActionStatus::Done, patch)?;
        info!("Relayer task {} of step {} landed", task_id, ctx.step_id());
        Ok(TaskOutcome::completed())
    }

    async fn sign_intents(
        ctx: &TaskContext<EvmChain>,
        chain_id: u64,
    ) -> ExecutionResult<Vec<SignedTypedData>> {
        let step = ctx.step.step()?;
        let mut signatures = Vec::with_capacity(step.typed_data.len() + 1);
        for data in step.typed_data {
            let signature = ctx.chain.wallet.sign_typed_data(&data).await?;
            let deadline = message_deadline(&data.message);
            signatures.push(into_signed(data, chain_id, signature, deadline));
        }
        if let Some(permit) = ctx.state.allowance.as_ref().and_then(|a| a.permit()) {
            if !signatures.iter().any(|s| s.signature == permit.signature) {
                signatures.push(permit.clone());
            }
        }
        Ok(signatures)
    }
}

#[async_trait]
impl ExecutionTask<EvmChain> for RelayedTransactionTask {
    fn name(&self) -> &'static str {
        "relayed_transaction"
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

        if let Some(task_id) = action.task_id.clone().or_else(|| ctx.state.task_id.clone()) {
            info!("Resuming relayer task {} of step {}", task_id, step.id);
            return Self::settle(ctx, action_type, chain_id, &task_id).await;
        }

        if step.typed_data.is_empty() {
            return Err(SdkError::new(
                ErrorCode::TransactionUnprepared,
                "Unable to prepare transaction. Typed data for transfer is missing.",
            )
            .into());
        }

        if !ctx.step.allow_interaction() {
            ctx.step.advance_action(
                action_type,
                ActionStatus::MessageRequired,
                ActionPatch::default(),
            )?;
            return Ok(TaskOutcome::paused());
        }

        ensure_quoted_wallet(ctx).await?;

        ctx.step
            .advance_action(action_type, ActionStatus::MessageRequired, ActionPatch::default())?;
        let signatures = Self::sign_intents(ctx, chain_id).await?;
        ctx.state.signatures = signatures.clone();
        ctx.step.update_action(
            action_type,
            ActionStatus::Pending,
            ActionPatch::signed(signatures.clone()),
        )?;

        let response = ctx
            .step
            .services
            .quotes
            .relay(&RelayRequest {
                step: ctx.step.step()?,
                signatures,
            })
            .await?;

        ctx.state.task_id = Some(response.task_id.clone());
        ctx.step.update_action(
            action_type,
            ActionStatus::Pending,
            ActionPatch::task(response.task_id.clone()),
        )?;
        ctx.step.record_transaction(
            TransactionKind::Relayed,
            chain_id,
            None,
            Some(&response.task_id),
        )?;
        info!("Step {} relayed as task {}", step.id, response.task_id);

        Self::settle(ctx, action_type, chain_id, &response.task_id).await
    }
}
