//! Chain-agnostic tasks shared by every family's pipelines
//!
//! - [`PrepareStepTask`]: fetch the step's transaction from the quote service
//!   and guard against a worse exchange rate
//! - [`WaitForDestinationTask`]: follow a bridge transfer to the receiving chain

use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::pipeline::{ChainAdapter, ExecutionTask, TaskContext, TaskOutcome};
use crate::quote::{StatusRequest, StatusResponse, TransferStatus};
use crate::step::{
    Action, ActionPatch, ActionStatus, ActionType, ExecutionPatch, Step, TransactionKind,
};
use crate::watch::{retry_transient, wait_for_result};

use async_trait::async_trait;
use ethers::types::U256;
use futures::FutureExt;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// Largest accepted drop of the minimum received amount, in basis points
const MAX_RATE_DROP_BPS: u64 = 50;

/// The action carrying the step's main transaction
pub fn main_action_type(step: &Step) -> ActionType {
    if step.is_cross_chain() {
        ActionType::CrossChain
    } else {
        ActionType::Swap
    }
}

/// Record kind of the transaction carried by the main action
pub fn transaction_kind(action_type: ActionType) -> TransactionKind {
    match action_type {
        ActionType::CrossChain => TransactionKind::CrossChain,
        _ => TransactionKind::Swap,
    }
}

/// Whether `new` is worse than `old` by more than the accepted threshold.
/// Unparseable amounts are treated as unchanged.
pub fn exchange_rate_dropped(old_min: &str, new_min: &str) -> bool {
    let (Ok(old), Ok(new)) = (U256::from_dec_str(old_min), U256::from_dec_str(new_min)) else {
        return false;
    };
    new.saturating_mul(U256::from(10_000u64))
        < old.saturating_mul(U256::from(10_000u64 - MAX_RATE_DROP_BPS))
}

/// Populate the step's transaction request (or typed data) before signing
pub struct PrepareStepTask<X> {
    _chain: PhantomData<fn() -> X>,
}

impl<X> PrepareStepTask<X> {
    pub fn new() -> Self {
        Self {
            _chain: PhantomData,
        }
    }
}

impl<X> Default for PrepareStepTask<X> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<X: ChainAdapter> ExecutionTask<X> for PrepareStepTask<X> {
    fn name(&self) -> &'static str {
        "prepare_step"
    }

    fn action_type(&self, ctx: &TaskContext<X>) -> Option<ActionType> {
        ctx.step.step().ok().map(|s| main_action_type(&s))
    }

    fn should_run(&self, ctx: &TaskContext<X>, action: Option<&Action>) -> bool {
        let submitted = action
            .map(|a| a.is_done() || a.tx_hash.is_some() || a.task_id.is_some())
            .unwrap_or(false);
        if submitted || ctx.state.tx_hash.is_some() || ctx.state.task_id.is_some() {
            return false;
        }
        match ctx.step.step() {
            Ok(step) => step.transaction_request.is_none() && step.typed_data.is_empty(),
            Err(_) => true,
        }
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<X>,
        _action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let step = ctx.step.step()?;
        let action_type = main_action_type(&step);
        ctx.step
            .find_or_create_action(action_type, step.action.from_chain_id)?;

        debug!("Fetching transaction for step {}", step.id);
        let refreshed = ctx.step.services.quotes.step_transaction(&step).await?;

        let old_min = step.estimate.to_amount_min.clone();
        let new_min = refreshed.estimate.to_amount_min.clone();
        if exchange_rate_dropped(&old_min, &new_min) {
            if !ctx.step.allow_interaction() {
                info!(
                    "Exchange rate of step {} dropped ({} -> {}), waiting for user",
                    step.id, old_min, new_min
                );
                ctx.step.update_action(
                    action_type,
                    ActionStatus::ActionRequired,
                    ActionPatch::default().with_message("Exchange rate has changed."),
                )?;
                return Ok(TaskOutcome::paused());
            }

            let accepted = ctx
                .step
                .interaction()
                .accept_exchange_rate_update(&step.estimate.to_amount, &refreshed.estimate.to_amount)
                .await;
            if !accepted {
                return Err(SdkError::new(
                    ErrorCode::ExchangeRateUpdateCanceled,
                    "Exchange rate has changed!",
                )
                .into());
            }
            info!("User accepted new exchange rate for step {}", step.id);
        }

        if refreshed.transaction_request.is_none() && refreshed.typed_data.is_empty() {
            return Err(SdkError::new(
                ErrorCode::TransactionUnprepared,
                "Unable to prepare transaction.",
            )
            .into());
        }

        ctx.step.ledger().replace_quote(&step.id, refreshed)?;
        Ok(TaskOutcome::completed())
    }
}

/// Wait for a bridge transfer to land on the receiving chain
pub struct WaitForDestinationTask<X> {
    _chain: PhantomData<fn() -> X>,
}

impl<X> WaitForDestinationTask<X> {
    pub fn new() -> Self {
        Self {
            _chain: PhantomData,
        }
    }
}

impl<X> Default for WaitForDestinationTask<X> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<X: ChainAdapter> ExecutionTask<X> for WaitForDestinationTask<X> {
    fn name(&self) -> &'static str {
        "wait_for_destination"
    }

    fn action_type(&self, _ctx: &TaskContext<X>) -> Option<ActionType> {
        Some(ActionType::ReceivingChain)
    }

    fn should_run(&self, ctx: &TaskContext<X>, action: Option<&Action>) -> bool {
        if action.map(|a| a.is_done()).unwrap_or(false) {
            return false;
        }
        let Ok(step) = ctx.step.step() else {
            return true;
        };
        if !step.is_cross_chain() {
            return false;
        }
        matches!(
            ctx.step.action(ActionType::CrossChain),
            Ok(Some(source)) if source.is_done()
        )
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<X>,
        _action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let step = ctx.step.step()?;
        let source_hash = ctx
            .step
            .action(ActionType::CrossChain)?
            .and_then(|a| a.tx_hash)
            .or_else(|| ctx.state.tx_hash.clone())
            .ok_or_else(|| {
                SdkError::new(
                    ErrorCode::TransactionUnprepared,
                    "Source chain transaction hash is missing.",
                )
            })?;

        ctx.step
            .find_or_create_action(ActionType::ReceivingChain, step.action.to_chain_id)?;
        ctx.step.update_action(
            ActionType::ReceivingChain,
            ActionStatus::Pending,
            ActionPatch::default(),
        )?;

        let request = StatusRequest {
            tx_hash: source_hash.clone(),
            from_chain: step.action.from_chain_id,
            to_chain: step.action.to_chain_id,
            bridge: step.tool.clone(),
        };
        let services = ctx.step.services.clone();
        let interval = services.settings.destination_poll_interval();
        let max_retries = services.settings.max_retries;
        let quotes = services.quotes.clone();

        let watch = services.status_watchers.watch(&source_hash, move || {
            async move {
                wait_for_result(
                    || {
                        let quotes = quotes.clone();
                        let request = request.clone();
                        async move { interpret_status(quotes.status(&request).await?) }
                    },
                    interval,
                    max_retries,
                    retry_transient,
                )
                .await
            }
            .boxed()
        });

        let status = tokio::time::timeout(services.settings.destination_timeout(), watch)
            .await
            .map_err(|_| {
                SdkError::new(
                    ErrorCode::Timeout,
                    "Timed out waiting for the destination chain.",
                )
            })??;

        let receiving = status.receiving.clone();
        let receiving_hash = receiving.as_ref().and_then(|r| r.tx_hash.clone());

        ctx.step.update_execution(ExecutionPatch {
            to_amount: receiving.as_ref().and_then(|r| r.amount.clone()),
            to_token: receiving.as_ref().and_then(|r| r.token.clone()),
            ..ExecutionPatch::default()
        })?;

        let mut patch = match &receiving_hash {
            Some(hash) => {
                ctx.step.record_transaction(
                    TransactionKind::Receiving,
                    step.action.to_chain_id,
                    Some(hash),
                    None,
                )?;
                let link = receiving
                    .as_ref()
                    .and_then(|r| r.tx_link.clone())
                    .or_else(|| ctx.step.tx_link(step.action.to_chain_id, hash));
                ActionPatch::tx(hash.clone(), link)
            }
            None => ActionPatch::default(),
        };
        if let Some(substatus) = status.substatus.clone() {
            patch = patch.with_substatus(substatus);
        }

        ctx.step
            .update_action(ActionType::ReceivingChain, ActionStatus::Done, patch)?;
        info!("Step {} arrived on chain {}", step.id, step.action.to_chain_id);
        Ok(TaskOutcome::completed())
    }
}

fn interpret_status(response: StatusResponse) -> ExecutionResult<Option<StatusResponse>> {
    match response.status {
        TransferStatus::Done => Ok(Some(response)),
        TransferStatus::Pending | TransferStatus::NotFound => {
            debug!("Destination transfer still {:?}", response.status);
            Ok(None)
        }
        TransferStatus::Failed | TransferStatus::Invalid => {
            let message = response
                .substatus_message
                .clone()
                .unwrap_or_else(|| "Bridge transfer failed.".to_string());
            warn!("Destination transfer failed: {}", message);
            Err(SdkError::new(ErrorCode::TransactionFailed, message).into())
        }
    }
}
