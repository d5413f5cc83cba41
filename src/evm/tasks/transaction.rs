use super::{confirm_action, ensure_quoted_wallet};
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::evm::abi::{encode_call_with_eip2612, encode_call_with_permit2};
use crate::evm::adapter::{format_hash, parse_hash, EvmChain};
use crate::evm::permit::permit_call_data;
use crate::evm::request::{build_transaction, parse_address};
use crate::pipeline::{ExecutionTask, TaskContext, TaskOutcome};
use crate::step::{Action, ActionPatch, ActionStatus, ActionType, SignedTypedData, Step};
use crate::tasks::{main_action_type, transaction_kind};

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::transaction::eip2718::TypedTransaction;
use tracing::{debug, info};

/// Sign and broadcast the step's main transaction, then wait for its receipt
pub struct SendTransactionTask;

impl SendTransactionTask {
    /// Permit from this run, or one signed by an earlier attempt
    fn permit(ctx: &TaskContext<EvmChain>, step: &Step) -> ExecutionResult<Option<SignedTypedData>> {
        if let Some(permit) = ctx.state.allowance.as_ref().and_then(|a| a.permit()) {
            return Ok(Some(permit.clone()));
        }
        let now = Utc::now().timestamp();
        Ok(ctx.step.execution()?.and_then(|e| {
            e.valid_permits(step.action.from_chain_id, now)
                .into_iter()
                .next()
                .cloned()
        }))
    }

    /// Route the diamond call through the Permit2 proxy with the signature attached
    fn wrap_with_permit(
        ctx: &TaskContext<EvmChain>,
        tx: &mut TypedTransaction,
        permit: &SignedTypedData,
    ) -> ExecutionResult<()> {
        let chain = ctx.step.services.chains.require(permit.chain_id)?;
        let proxy = chain.permit2_proxy.as_deref().ok_or_else(|| {
            SdkError::new(
                ErrorCode::TransactionUnprepared,
                format!("Chain {} has no Permit2 proxy.", permit.chain_id),
            )
        })?;

        let call = permit_call_data(permit)?;
        let calldata = tx.data().cloned().unwrap_or_default();
        let wrapped = if permit.primary_type == "Permit" {
            encode_call_with_eip2612(call.token, call.amount, call.deadline, &call.signature, &calldata)?
        } else {
            encode_call_with_permit2(
                &calldata,
                call.token,
                call.amount,
                call.nonce,
                call.deadline,
                &call.signature,
            )
        };

        debug!("Wrapping call with {} for {}", permit.primary_type, proxy);
        tx.set_to(parse_address(proxy)?);
        tx.set_data(wrapped);
        Ok(())
    }

    async fn confirm(
        ctx: &mut TaskContext<EvmChain>,
        action_type: ActionType,
        chain_id: u64,
        hash: &str,
    ) -> ExecutionResult<TaskOutcome> {
        let kind = transaction_kind(action_type);
        let outcome =
            confirm_action(ctx, Some(action_type), kind, chain_id, parse_hash(hash)?).await?;
        let final_hash = format_hash(outcome.tx_hash);
        ctx.state.tx_hash = Some(final_hash.clone());

        ctx.step
            .record_transaction(kind, chain_id, Some(&final_hash), None)?;
        ctx.step.update_action(
            action_type,
            ActionStatus::Done,
            ctx.step.tx_patch(chain_id, &final_hash),
        )?;
        Ok(TaskOutcome::completed())
    }
}

#[async_trait]
impl ExecutionTask<EvmChain> for SendTransactionTask {
    fn name(&self) -> &'static str {
        "send_transaction"
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

        if let Some(hash) = action.tx_hash.clone().or_else(|| ctx.state.tx_hash.clone()) {
            info!("Resuming {} transaction {} of step {}", action_type, hash, step.id);
            return Self::confirm(ctx, action_type, chain_id, &hash).await;
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
        let mut tx = build_transaction(&request, ctx.chain.wallet.address(), chain_id)?;

        if let Some(permit) = Self::permit(ctx, &step)? {
            Self::wrap_with_permit(ctx, &mut tx, &permit)?;
        }

        ctx.step
            .advance_action(action_type, ActionStatus::ActionRequired, ActionPatch::default())?;
        let hash = format_hash(ctx.chain.send(tx).await?);
        ctx.state.tx_hash = Some(hash.clone());

        ctx.step.update_action(
            action_type,
            ActionStatus::Pending,
            ctx.step.tx_patch(chain_id, &hash),
        )?;
        ctx.step
            .record_transaction(transaction_kind(action_type), chain_id, Some(&hash), None)?;
        info!("Step {} submitted {}", step.id, hash);

        Self::confirm(ctx, action_type, chain_id, &hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowance::AllowanceResult;
    use crate::evm::abi::selector_of;
    use crate::evm::testing::{evm_context, evm_step, FakeEvm, DIAMOND};
    use crate::evm::permit::{into_signed, Permit2Transfer};
    use crate::interaction::ExecutionOptions;
    use crate::pipeline::ExecutionStrategy;
    use crate::step::TransactionKind;
    use crate::testing::{PERMIT2, PERMIT2_PROXY};
    use ethers::types::{Address, NameOrAddress, U256};
    use std::sync::Arc;

    fn sent_to(tx: &TypedTransaction) -> Option<Address> {
        match tx.to() {
            Some(NameOrAddress::Address(address)) => Some(*address),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_sends_and_confirms_cross_chain_transaction() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            ExecutionOptions::default(),
            fake.clone(),
        );

        let outcome = SendTransactionTask.run(&mut ctx, None).await.unwrap();
        assert_eq!(outcome, TaskOutcome::completed());

        let sent = fake.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent_to(&sent[0]), Some(DIAMOND.parse().unwrap()));

        let action = ctx.step.action(ActionType::CrossChain).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Done);
        assert_eq!(action.tx_hash, ctx.state.tx_hash);
        assert!(action.tx_link.unwrap().starts_with("https://explorer.pol.example/tx/"));
    }

    #[tokio::test]
    async fn test_permit_routes_call_through_proxy() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            ExecutionOptions::default(),
            fake.clone(),
        );
        let transfer = Permit2Transfer {
            chain_id: 137,
            permit2: PERMIT2.parse().unwrap(),
            token: Address::repeat_byte(0x27),
            amount: U256::from(100),
            spender: PERMIT2_PROXY.parse().unwrap(),
            nonce: U256::from(1),
            deadline: Utc::now().timestamp() + 600,
        };
        let permit = into_signed(
            transfer.typed_data(),
            137,
            format!("0x{}", "1b".repeat(65)),
            Some(transfer.deadline),
        );
        ctx.state.allowance = Some(AllowanceResult::Signed { permit });

        SendTransactionTask.run(&mut ctx, None).await.unwrap();

        let sent = fake.sent.lock().unwrap().clone();
        assert_eq!(sent_to(&sent[0]), Some(PERMIT2_PROXY.parse().unwrap()));
        let data = sent[0].data().unwrap();
        assert_ne!(selector_of(data), Some([0xde, 0xad, 0xbe, 0xef]));
    }

    #[tokio::test]
    async fn test_reverted_transaction_fails() {
        let fake = Arc::new(FakeEvm::on_chain(137).reverting());
        let mut ctx = evm_context(
            evm_step("s1", 137, 137),
            ExecutionStrategy::EvmStandard,
            ExecutionOptions::default(),
            fake,
        );

        let err = SendTransactionTask.run(&mut ctx, None).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionFailed));
        let action = ctx.step.action(ActionType::Swap).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancelled_transaction_leaves_cancel_hash_on_action() {
        let fake = Arc::new(FakeEvm::on_chain(137).cancelling());
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            ExecutionOptions::default(),
            fake,
        );

        let err = SendTransactionTask.run(&mut ctx, None).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionCanceled));

        let cancel = format_hash(FakeEvm::cancel_hash(1));
        let action = ctx.step.action(ActionType::CrossChain).unwrap().unwrap();
        assert_eq!(action.tx_hash.as_deref(), Some(cancel.as_str()));
        let execution = ctx.step.execution().unwrap().unwrap();
        let record = execution.transaction(TransactionKind::CrossChain).unwrap();
        assert_eq!(record.tx_hash.as_deref(), Some(cancel.as_str()));
    }

    #[tokio::test]
    async fn test_pauses_before_signing_without_interaction() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let mut ctx = evm_context(
            evm_step("s1", 137, 137),
            ExecutionStrategy::EvmStandard,
            ExecutionOptions::non_interactive(),
            fake.clone(),
        );

        let outcome = SendTransactionTask.run(&mut ctx, None).await.unwrap();
        assert!(outcome.is_paused());
        assert!(fake.sent.lock().unwrap().is_empty());
        let action = ctx.step.action(ActionType::Swap).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::ActionRequired);
    }
}
