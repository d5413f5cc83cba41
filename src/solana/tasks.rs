//! Solana pipeline tasks
//!
//! | task | action |
//! |---|---|
//! | [`SendSolanaTransactionTask`] | `SWAP` / `CROSS_CHAIN` |
//! | [`JitoBundleTask`] | `SWAP` / `CROSS_CHAIN` |

use super::adapter::SolanaChain;
use super::client::decode_transaction;
use super::watch::{wait_for_bundle, wait_for_signature};
use crate::chain::{ChainId, ChainType};
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::guard::ensure_same_wallet;
use crate::pipeline::{ExecutionTask, TaskContext, TaskOutcome};
use crate::step::{Action, ActionPatch, ActionStatus, ActionType, Step};
use crate::tasks::{main_action_type, transaction_kind};
use crate::watch::WatchParams;

use async_trait::async_trait;
use tracing::{debug, info};

/// Sign the step's serialized transaction. `None` means the user is needed.
async fn sign_step_transaction(
    ctx: &mut TaskContext<SolanaChain>,
    step: &Step,
    action_type: ActionType,
) -> ExecutionResult<Option<String>> {
    let data = step
        .transaction_request
        .as_ref()
        .and_then(|r| r.data.clone())
        .ok_or_else(|| {
            SdkError::new(ErrorCode::TransactionUnprepared, "Unable to prepare transaction.")
        })?;
    decode_transaction(&data)?;

    if !ctx.step.allow_interaction() {
        ctx.step
            .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
        return Ok(None);
    }

    ensure_same_wallet(
        ctx.chain.wallet.as_ref(),
        step.action.from_address.as_deref(),
        ChainType::Svm,
    )
    .await?;

    ctx.step
        .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
    let signed = ctx.chain.wallet.sign_transaction(&data).await?;
    decode_transaction(&signed)?;
    debug!("Step {} transaction signed", step.id);

    ctx.state.signed_transaction = Some(signed.clone());
    Ok(Some(signed))
}

fn is_submitted(action: Option<&Action>) -> bool {
    action.map(|a| a.is_done()).unwrap_or(false)
}

/// Sign, submit over RPC and wait for confirmation
pub struct SendSolanaTransactionTask;

impl SendSolanaTransactionTask {
    async fn confirm(
        ctx: &mut TaskContext<SolanaChain>,
        action_type: ActionType,
        chain_id: ChainId,
        signature: &str,
    ) -> ExecutionResult<TaskOutcome> {
        // unknown after a restart: the validity window restarts from now
        let submitted_at = match ctx.state.submitted_at {
            Some(height) => height,
            None => ctx.chain.rpc.block_height().await?,
        };

        wait_for_signature(
            &ctx.chain.watchers,
            ctx.chain.rpc.clone(),
            signature,
            submitted_at,
            WatchParams::from(ctx.step.settings()),
        )
        .await?;

        ctx.step.update_action(
            action_type,
            ActionStatus::Done,
            ctx.step.tx_patch(chain_id, signature),
        )?;
        info!("Step {} confirmed {}", ctx.step_id(), signature);
        Ok(TaskOutcome::completed())
    }
}

#[async_trait]
impl ExecutionTask<SolanaChain> for SendSolanaTransactionTask {
    fn name(&self) -> &'static str {
        "send_solana_transaction"
    }

    fn action_type(&self, ctx: &TaskContext<SolanaChain>) -> Option<ActionType> {
        ctx.step.step().ok().map(|s| main_action_type(&s))
    }

    fn should_run(&self, _ctx: &TaskContext<SolanaChain>, action: Option<&Action>) -> bool {
        !is_submitted(action)
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<SolanaChain>,
        _action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let step = ctx.step.step()?;
        let action_type = main_action_type(&step);
        let chain_id = step.action.from_chain_id;
        let action = ctx.step.find_or_create_action(action_type, chain_id)?;

        if let Some(signature) = action.tx_hash.clone().or_else(|| ctx.state.tx_hash.clone()) {
            info!("Resuming Solana transaction {} of step {}", signature, step.id);
            return Self::confirm(ctx, action_type, chain_id, &signature).await;
        }

        let Some(signed) = sign_step_transaction(ctx, &step, action_type).await? else {
            return Ok(TaskOutcome::paused());
        };

        let submitted_at = ctx.chain.rpc.block_height().await?;
        let signature = ctx.chain.rpc.send_transaction(&signed).await?;
        ctx.state.tx_hash = Some(signature.clone());
        ctx.state.submitted_at = Some(submitted_at);

        ctx.step.update_action(
            action_type,
            ActionStatus::Pending,
            ctx.step.tx_patch(chain_id, &signature),
        )?;
        ctx.step.record_transaction(
            transaction_kind(action_type),
            chain_id,
            Some(&signature),
            None,
        )?;
        info!("Step {} submitted {} at block height {}", step.id, signature, submitted_at);

        Self::confirm(ctx, action_type, chain_id, &signature).await
    }
}

/// Sign and submit as a Jito bundle, then wait for it to land
pub struct JitoBundleTask;

impl JitoBundleTask {
    async fn settle(
        ctx: &mut TaskContext<SolanaChain>,
        action_type: ActionType,
        chain_id: ChainId,
        bundle_id: &str,
    ) -> ExecutionResult<TaskOutcome> {
        let jito = ctx.chain.jito.clone().ok_or_else(jito_missing)?;
        let status = wait_for_bundle(
            &ctx.chain.watchers,
            jito,
            bundle_id,
            WatchParams::from(ctx.step.settings()),
        )
        .await?;

        let signature = status.signatures.first().cloned().ok_or_else(|| {
            SdkError::new(ErrorCode::TransactionFailed, "Bundle landed without a signature.")
        })?;
        ctx.state.tx_hash = Some(signature.clone());

        ctx.step.record_transaction(
            transaction_kind(action_type),
            chain_id,
            Some(&signature),
            Some(bundle_id),
        )?;
        ctx.step.update_action(
            action_type,
            ActionStatus::Done,
            ctx.step.tx_patch(chain_id, &signature),
        )?;
        info!("Bundle {} of step {} landed as {}", bundle_id, ctx.step_id(), signature);
        Ok(TaskOutcome::completed())
    }
}

fn jito_missing() -> SdkError {
    SdkError::new(
        ErrorCode::TransactionUnprepared,
        "Jito bundle submission is not configured.",
    )
}

#[async_trait]
impl ExecutionTask<SolanaChain> for JitoBundleTask {
    fn name(&self) -> &'static str {
        "send_jito_bundle"
    }

    fn action_type(&self, ctx: &TaskContext<SolanaChain>) -> Option<ActionType> {
        ctx.step.step().ok().map(|s| main_action_type(&s))
    }

    fn should_run(&self, _ctx: &TaskContext<SolanaChain>, action: Option<&Action>) -> bool {
        !is_submitted(action)
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<SolanaChain>,
        _action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let step = ctx.step.step()?;
        let action_type = main_action_type(&step);
        let chain_id = step.action.from_chain_id;
        let action = ctx.step.find_or_create_action(action_type, chain_id)?;

        if let Some(bundle_id) = action.task_id.clone().or_else(|| ctx.state.task_id.clone()) {
            info!("Resuming Jito bundle {} of step {}", bundle_id, step.id);
            return Self::settle(ctx, action_type, chain_id, &bundle_id).await;
        }

        let jito = ctx.chain.jito.clone().ok_or_else(jito_missing)?;
        let Some(signed) = sign_step_transaction(ctx, &step, action_type).await? else {
            return Ok(TaskOutcome::paused());
        };

        let bundle_id = jito.send_bundle(&[signed]).await?;
        ctx.state.task_id = Some(bundle_id.clone());
        ctx.step
            .update_action(action_type, ActionStatus::Pending, ActionPatch::task(&bundle_id))?;
        ctx.step.record_transaction(
            transaction_kind(action_type),
            chain_id,
            None,
            Some(&bundle_id),
        )?;
        info!("Step {} submitted Jito bundle {}", step.id, bundle_id);

        Self::settle(ctx, action_type, chain_id, &bundle_id).await
    }
}
