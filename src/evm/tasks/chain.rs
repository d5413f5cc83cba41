use crate::evm::adapter::EvmChain;
use crate::error::ExecutionResult;
use crate::guard::switch_chain_if_needed;
use crate::pipeline::{ExecutionTask, TaskContext, TaskOutcome};
use crate::step::{Action, ActionPatch, ActionStatus, ActionType};

use async_trait::async_trait;
use tracing::info;

/// Put the wallet on the step's source chain before anything is signed
pub struct CheckChainTask;

#[async_trait]
impl ExecutionTask<EvmChain> for CheckChainTask {
    fn name(&self) -> &'static str {
        "check_chain"
    }

    fn action_type(&self, _ctx: &TaskContext<EvmChain>) -> Option<ActionType> {
        Some(ActionType::SwitchChain)
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<EvmChain>,
        action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let chain_id = ctx.step.step()?.action.from_chain_id;

        if ctx.chain.wallet.active_chain_id().await? == chain_id {
            if action.map(|a| a.is_live()).unwrap_or(false) {
                ctx.step.update_action(
                    ActionType::SwitchChain,
                    ActionStatus::Done,
                    ActionPatch::default(),
                )?;
            }
            return Ok(TaskOutcome::completed());
        }

        ctx.step
            .find_or_create_action(ActionType::SwitchChain, chain_id)?;

        let interaction = ctx.step.services.interaction.clone();
        let switched = switch_chain_if_needed(
            ctx.chain.wallet.clone(),
            chain_id,
            ctx.step.allow_interaction(),
            move |target| async move { interaction.switch_chain(target).await },
        )
        .await?;

        let Some(wallet) = switched else {
            ctx.step.advance_action(
                ActionType::SwitchChain,
                ActionStatus::ActionRequired,
                ActionPatch::default(),
            )?;
            return Ok(TaskOutcome::paused());
        };

        ctx.chain.wallet = wallet;
        ctx.step.advance_action(
            ActionType::SwitchChain,
            ActionStatus::Done,
            ActionPatch::default(),
        )?;
        info!("Wallet switched to chain {} for step {}", chain_id, ctx.step_id());
        Ok(TaskOutcome::completed())
    }
}
