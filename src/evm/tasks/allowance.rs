//! Allowance / permit task shared by the standard, batched and relayed
//! strategies. The branch is chosen by [`crate::allowance::decide`]; every
//! branch leaves an [`AllowanceResult`] in the task state.

use super::{confirm_action, ensure_quoted_wallet};
use crate::allowance::{decide, requires_reset, AllowanceDecision, AllowanceInputs, AllowanceResult};
use crate::error::{ErrorCode, ExecutionResult, SdkError};
use crate::evm::abi::{
    decode_allowance, decode_name, decode_nonces, encode_allowance, encode_approve, encode_name,
    encode_nonces,
};
use crate::evm::adapter::{format_hash, parse_hash, EvmChain};
use crate::evm::client::EvmPublicClient;
use crate::evm::permit::{
    into_signed, random_permit2_nonce, NativePermit, Permit2Transfer, PERMIT_VALIDITY_SECS,
};
use crate::evm::request::{parse_address, parse_quantity};
use crate::pipeline::{ExecutionTask, TaskContext, TaskOutcome};
use crate::step::{
    Action, ActionPatch, ActionStatus, ActionType, PreparedCall, SignedTypedData, TransactionKind,
    TypedDataToSign,
};

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, H256, U256};
use tracing::{debug, info};

pub struct AllowanceTask;

async fn read_allowance(
    client: &dyn EvmPublicClient,
    token: Address,
    owner: Address,
    spender: Address,
) -> ExecutionResult<U256> {
    let call: TypedTransaction = Eip1559TransactionRequest::new()
        .to(token)
        .data(encode_allowance(owner, spender))
        .into();
    let raw = client.call(&call).await?;
    Ok(decode_allowance(&raw)?)
}

/// EIP-2612 nonce of `owner`, or `None` when the token has no `nonces()`
async fn native_permit_nonce(
    client: &dyn EvmPublicClient,
    token: Address,
    owner: Address,
) -> Option<U256> {
    let call: TypedTransaction = Eip1559TransactionRequest::new()
        .to(token)
        .data(encode_nonces(owner))
        .into();
    match client.call(&call).await {
        Ok(raw) => decode_nonces(&raw).ok(),
        Err(e) => {
            debug!("Token {:?} has no EIP-2612 nonces: {}", token, e);
            None
        }
    }
}

async fn token_name(client: &dyn EvmPublicClient, token: Address) -> ExecutionResult<String> {
    let call: TypedTransaction = Eip1559TransactionRequest::new()
        .to(token)
        .data(encode_name())
        .into();
    let raw = client.call(&call).await?;
    Ok(decode_name(&raw)?)
}

fn approve_call(token: Address, spender: Address, amount: U256) -> PreparedCall {
    PreparedCall {
        to: format!("{:?}", token),
        data: format!("0x{}", hex::encode(encode_approve(spender, amount))),
        value: "0x0".to_string(),
    }
}

/// Resolved parameters of one allowance run
struct Target {
    chain_id: u64,
    token: Address,
    owner: Address,
    spender: Address,
    required: U256,
}

impl AllowanceTask {
    fn approval_done(ctx: &TaskContext<EvmChain>, chain_id: u64, hash: H256) -> ExecutionResult<()> {
        let hash = format_hash(hash);
        ctx.step
            .record_transaction(TransactionKind::Approval, chain_id, Some(&hash), None)?;
        ctx.step.update_action(
            ActionType::TokenAllowance,
            ActionStatus::Done,
            ctx.step.tx_patch(chain_id, &hash),
        )?;
        Ok(())
    }

    fn approval_amount(ctx: &TaskContext<EvmChain>, target: &Target) -> U256 {
        if ctx.step.options.infinite_approval {
            U256::MAX
        } else {
            target.required
        }
    }

    fn mark_done(ctx: &TaskContext<EvmChain>, chain_id: u64) -> ExecutionResult<()> {
        ctx.step
            .find_or_create_action(ActionType::TokenAllowance, chain_id)?;
        ctx.step.advance_action(
            ActionType::TokenAllowance,
            ActionStatus::Done,
            ActionPatch::default(),
        )?;
        Ok(())
    }

    /// Returns `None` when the signature has to wait for the user
    async fn sign_permit(
        ctx: &TaskContext<EvmChain>,
        chain_id: u64,
        data: TypedDataToSign,
        deadline: i64,
    ) -> ExecutionResult<Option<SignedTypedData>> {
        ctx.step.find_or_create_action(ActionType::Permit, chain_id)?;
        if !ctx.step.allow_interaction() {
            ctx.step.advance_action(
                ActionType::Permit,
                ActionStatus::MessageRequired,
                ActionPatch::default(),
            )?;
            return Ok(None);
        }

        ensure_quoted_wallet(ctx).await?;
        ctx.step.advance_action(
            ActionType::Permit,
            ActionStatus::MessageRequired,
            ActionPatch::default(),
        )?;

        let signature = ctx.chain.wallet.sign_typed_data(&data).await?;
        let signed = into_signed(data, chain_id, signature, Some(deadline));
        ctx.step.advance_action(
            ActionType::Permit,
            ActionStatus::Done,
            ActionPatch::signed(vec![signed.clone()]),
        )?;
        info!("{} signed for step {}", signed.primary_type, ctx.step_id());
        Ok(Some(signed))
    }

    async fn send_approve(
        ctx: &TaskContext<EvmChain>,
        target: &Target,
        amount: U256,
    ) -> ExecutionResult<H256> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(target.owner)
            .to(target.token)
            .data(encode_approve(target.spender, amount))
            .chain_id(target.chain_id)
            .into();
        ctx.chain.send(tx).await
    }

    /// On-chain approval, zeroing the allowance first when the token demands
    /// it. Returns false when paused for the user.
    async fn approve(
        ctx: &TaskContext<EvmChain>,
        target: &Target,
        reset_first: bool,
    ) -> ExecutionResult<bool> {
        let chain_id = target.chain_id;
        ctx.step
            .find_or_create_action(ActionType::TokenAllowance, chain_id)?;

        let waiting_for = if reset_first {
            ActionStatus::ResetRequired
        } else {
            ActionStatus::ActionRequired
        };
        if !ctx.step.allow_interaction() {
            ctx.step
                .advance_action(ActionType::TokenAllowance, waiting_for, ActionPatch::default())?;
            return Ok(false);
        }

        ensure_quoted_wallet(ctx).await?;

        if reset_first {
            ctx.step.advance_action(
                ActionType::TokenAllowance,
                ActionStatus::ResetRequired,
                ActionPatch::default(),
            )?;
            let hash = Self::send_approve(ctx, target, U256::zero()).await?;
            ctx.step.record_transaction(
                TransactionKind::Reset,
                chain_id,
                Some(&format_hash(hash)),
                None,
            )?;
            let outcome =
                confirm_action(ctx, None, TransactionKind::Reset, chain_id, hash).await?;
            info!("Allowance reset to zero in {:?}", outcome.tx_hash);
        }

        ctx.step.advance_action(
            ActionType::TokenAllowance,
            ActionStatus::ActionRequired,
            ActionPatch::default(),
        )?;

        let hash = Self::send_approve(ctx, target, Self::approval_amount(ctx, target)).await?;
        let hash_str = format_hash(hash);
        ctx.step.update_action(
            ActionType::TokenAllowance,
            ActionStatus::Pending,
            ctx.step.tx_patch(chain_id, &hash_str),
        )?;
        ctx.step
            .record_transaction(TransactionKind::Approval, chain_id, Some(&hash_str), None)?;

        let outcome = confirm_action(
            ctx,
            Some(ActionType::TokenAllowance),
            TransactionKind::Approval,
            chain_id,
            hash,
        )
        .await?;
        Self::approval_done(ctx, chain_id, outcome.tx_hash)?;
        Ok(true)
    }
}

#[async_trait]
impl ExecutionTask<EvmChain> for AllowanceTask {
    fn name(&self) -> &'static str {
        "allowance"
    }

    fn action_type(&self, ctx: &TaskContext<EvmChain>) -> Option<ActionType> {
        match ctx.step.action(ActionType::Permit) {
            Ok(Some(permit)) if permit.is_live() => Some(ActionType::Permit),
            _ => Some(ActionType::TokenAllowance),
        }
    }

    fn should_run(&self, ctx: &TaskContext<EvmChain>, action: Option<&Action>) -> bool {
        if ctx.state.allowance.is_some() || action.map(|a| a.is_done()).unwrap_or(false) {
            return false;
        }
        let Ok(step) = ctx.step.step() else {
            return true;
        };
        if step.action.from_token.is_native() || step.estimate.approval_address.is_none() {
            return false;
        }
        // relayer intents that carry their own permit
        !(ctx.step.strategy.is_relayed() && step.typed_data.iter().any(|d| d.is_permit()))
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<EvmChain>,
        action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome> {
        let step = ctx.step.step()?;
        let chain_id = step.action.from_chain_id;

        let submitted = action.as_ref().filter(|a| {
            a.action_type == ActionType::TokenAllowance && a.status == ActionStatus::Pending
        });
        if let Some(hash) = submitted.and_then(|a| a.tx_hash.as_deref()) {
            info!("Resuming approval {} of step {}", hash, step.id);
            let outcome = confirm_action(
                ctx,
                Some(ActionType::TokenAllowance),
                TransactionKind::Approval,
                chain_id,
                parse_hash(hash)?,
            )
            .await?;
            Self::approval_done(ctx, chain_id, outcome.tx_hash)?;
            ctx.state.allowance = Some(AllowanceResult::Done);
            return Ok(TaskOutcome::completed());
        }

        let chain = ctx.step.services.chains.require(chain_id)?;
        let spender = step.estimate.approval_address.as_deref().ok_or_else(|| {
            SdkError::new(
                ErrorCode::TransactionUnprepared,
                "Step has no approval address.",
            )
        })?;
        let target = Target {
            chain_id,
            token: parse_address(&step.action.from_token.address)?,
            owner: ctx.chain.wallet.address(),
            spender: parse_address(spender)?,
            required: parse_quantity(&step.action.from_amount)?,
        };

        let current =
            read_allowance(ctx.chain.public.as_ref(), target.token, target.owner, target.spender)
                .await?;
        let now = Utc::now().timestamp();
        let existing_permit = ctx
            .step
            .execution()?
            .and_then(|e| e.valid_permits(chain_id, now).into_iter().next().cloned());

        let atomic_batch = ctx.step.strategy.is_atomic_batch();
        let message_signing_disabled = ctx.step.options.disable_message_signing;
        let permit_nonce = if !atomic_batch
            && !message_signing_disabled
            && existing_permit.is_none()
            && current < target.required
            && chain.permit2_proxy.is_some()
        {
            native_permit_nonce(ctx.chain.public.as_ref(), target.token, target.owner).await
        } else {
            None
        };

        let inputs = AllowanceInputs {
            required: target.required,
            current,
            native_token: step.action.from_token.is_native(),
            has_valid_permit: existing_permit.is_some(),
            atomic_batch,
            message_signing_disabled,
            chain_supports_permit2: chain.supports_permit2(),
            token_supports_native_permit: permit_nonce.is_some(),
            reset_required: requires_reset(chain_id, &step.action.from_token.address),
        };
        let decision = decide(&inputs);
        debug!(
            "Allowance decision for step {}: {:?} (current {}, required {})",
            step.id, decision, current, target.required
        );

        let deadline = now + PERMIT_VALIDITY_SECS;
        let result = match decision {
            AllowanceDecision::NotRequired | AllowanceDecision::Sufficient => {
                Self::mark_done(ctx, chain_id)?;
                AllowanceResult::Done
            }
            AllowanceDecision::ExistingPermit => match existing_permit {
                Some(permit) => AllowanceResult::Signed { permit },
                None => return Err(SdkError::internal("Signed permit disappeared.").into()),
            },
            AllowanceDecision::BatchCall => {
                ctx.step
                    .find_or_create_action(ActionType::TokenAllowance, chain_id)?;
                // settled together with the batch
                ctx.step.advance_action(
                    ActionType::TokenAllowance,
                    ActionStatus::Pending,
                    ActionPatch::default().with_message("Token allowance added to the batch."),
                )?;
                AllowanceResult::Batched {
                    call: approve_call(
                        target.token,
                        target.spender,
                        Self::approval_amount(ctx, &target),
                    ),
                }
            }
            AllowanceDecision::NativePermit => {
                let permit = NativePermit {
                    chain_id,
                    token: target.token,
                    token_name: token_name(ctx.chain.public.as_ref(), target.token).await?,
                    owner: target.owner,
                    spender: parse_address(chain.permit2_proxy.as_deref().unwrap_or_default())?,
                    value: target.required,
                    nonce: permit_nonce.unwrap_or_default(),
                    deadline,
                };
                match Self::sign_permit(ctx, chain_id, permit.typed_data(), deadline).await? {
                    Some(permit) => AllowanceResult::Signed { permit },
                    None => return Ok(TaskOutcome::paused()),
                }
            }
            AllowanceDecision::Permit2Signature => {
                let transfer = Permit2Transfer {
                    chain_id,
                    permit2: parse_address(chain.permit2.as_deref().unwrap_or_default())?,
                    token: target.token,
                    amount: target.required,
                    spender: parse_address(chain.permit2_proxy.as_deref().unwrap_or_default())?,
                    nonce: random_permit2_nonce(),
                    deadline,
                };
                match Self::sign_permit(ctx, chain_id, transfer.typed_data(), deadline).await? {
                    Some(permit) => AllowanceResult::Signed { permit },
                    None => return Ok(TaskOutcome::paused()),
                }
            }
            AllowanceDecision::Approve { reset_first } => {
                if !Self::approve(ctx, &target, reset_first).await? {
                    return Ok(TaskOutcome::paused());
                }
                AllowanceResult::Done
            }
        };

        if result.permit().is_some() {
            // an approval queued by an abandoned batch attempt is now covered
            ctx.step.advance_action(
                ActionType::TokenAllowance,
                ActionStatus::Done,
                ActionPatch::default().with_message("Token allowance covered by a signed permit."),
            )?;
        }
        ctx.state.allowance = Some(result);
        Ok(TaskOutcome::completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::abi::selector_of;
    use crate::evm::testing::{evm_context, evm_step, FakeEvm};
    use crate::interaction::ExecutionOptions;
    use crate::pipeline::ExecutionStrategy;
    use std::sync::Arc;

    fn interactive() -> ExecutionOptions {
        ExecutionOptions::default()
    }

    #[tokio::test]
    async fn test_permit2_signs_and_never_approves() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            interactive(),
            fake.clone(),
        );

        let task = AllowanceTask;
        assert_eq!(task.action_type(&ctx), Some(ActionType::TokenAllowance));
        assert!(task.should_run(&ctx, None));
        let outcome = task.run(&mut ctx, None).await.unwrap();

        assert_eq!(outcome, TaskOutcome::completed());
        assert_eq!(fake.signed_types(), vec!["PermitTransferFrom"]);
        assert!(fake.approvals().is_empty());
        let permit = ctx.state.allowance.as_ref().and_then(|a| a.permit()).unwrap();
        assert_eq!(permit.chain_id, 137);

        let action = ctx.step.action(ActionType::Permit).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Done);
        assert_eq!(action.signed_typed_data.len(), 1);
    }

    #[tokio::test]
    async fn test_atomic_batch_returns_call_and_never_signs() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmBatched,
            interactive(),
            fake.clone(),
        );

        AllowanceTask.run(&mut ctx, None).await.unwrap();

        assert!(fake.signed_types().is_empty());
        assert!(fake.sent.lock().unwrap().is_empty());
        let call = ctx.state.allowance.as_ref().and_then(|a| a.batch_call()).unwrap();
        let data = hex::decode(call.data.trim_start_matches("0x")).unwrap();
        assert_eq!(selector_of(&data), Some(crate::evm::abi::APPROVE_SELECTOR));
        let action = ctx.step.action(ActionType::TokenAllowance).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn test_batched_approval_honours_infinite_approval() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let options = ExecutionOptions {
            infinite_approval: true,
            ..ExecutionOptions::default()
        };
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmBatched,
            options,
            fake,
        );

        AllowanceTask.run(&mut ctx, None).await.unwrap();

        let call = ctx.state.allowance.as_ref().and_then(|a| a.batch_call()).unwrap();
        let step = ctx.step.step().unwrap();
        let expected = approve_call(
            parse_address(&step.action.from_token.address).unwrap(),
            parse_address(step.estimate.approval_address.as_deref().unwrap()).unwrap(),
            U256::MAX,
        );
        assert_eq!(call.data, expected.data);
    }

    #[tokio::test]
    async fn test_cancelled_approval_records_cancel_hash() {
        let fake = Arc::new(FakeEvm::on_chain(137).cancelling());
        let options = ExecutionOptions {
            disable_message_signing: true,
            ..ExecutionOptions::default()
        };
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            options,
            fake,
        );

        let err = AllowanceTask.run(&mut ctx, None).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionCanceled));

        let cancel = format_hash(FakeEvm::cancel_hash(1));
        let action = ctx.step.action(ActionType::TokenAllowance).unwrap().unwrap();
        assert_eq!(action.tx_hash.as_deref(), Some(cancel.as_str()));
        let execution = ctx.step.execution().unwrap().unwrap();
        let record = execution.transaction(TransactionKind::Approval).unwrap();
        assert_eq!(record.tx_hash.as_deref(), Some(cancel.as_str()));
    }

    #[tokio::test]
    async fn test_sufficient_allowance_is_done_without_wallet_calls() {
        let fake = Arc::new(FakeEvm::on_chain(137).with_allowance(100));
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            interactive(),
            fake.clone(),
        );

        AllowanceTask.run(&mut ctx, None).await.unwrap();

        assert_eq!(ctx.state.allowance, Some(AllowanceResult::Done));
        assert!(fake.signed_types().is_empty());
        assert!(fake.sent.lock().unwrap().is_empty());
        let action = ctx.step.action(ActionType::TokenAllowance).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Done);
    }

    #[tokio::test]
    async fn test_native_permit_preferred_when_token_has_nonces() {
        let fake = Arc::new(FakeEvm::on_chain(137).with_native_permit());
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            interactive(),
            fake.clone(),
        );

        AllowanceTask.run(&mut ctx, None).await.unwrap();

        assert_eq!(fake.signed_types(), vec!["Permit"]);
        let signed = &fake.signed.lock().unwrap()[0];
        assert_eq!(signed.domain["name"], "USD Coin");
    }

    #[tokio::test]
    async fn test_signing_disabled_falls_back_to_approve() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let options = ExecutionOptions {
            disable_message_signing: true,
            ..ExecutionOptions::default()
        };
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            options,
            fake.clone(),
        );

        AllowanceTask.run(&mut ctx, None).await.unwrap();

        assert_eq!(fake.approvals().len(), 1);
        let action = ctx.step.action(ActionType::TokenAllowance).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Done);
        assert!(action.tx_hash.is_some());
        let execution = ctx.step.execution().unwrap().unwrap();
        assert!(execution.transaction(TransactionKind::Approval).is_some());
    }

    #[tokio::test]
    async fn test_signature_pauses_without_interaction_then_resumes() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let mut ctx = evm_context(
            evm_step("s1", 137, 10),
            ExecutionStrategy::EvmStandard,
            ExecutionOptions::non_interactive(),
            fake.clone(),
        );

        let outcome = AllowanceTask.run(&mut ctx, None).await.unwrap();
        assert!(outcome.is_paused());
        assert!(fake.signed_types().is_empty());
        assert_eq!(AllowanceTask.action_type(&ctx), Some(ActionType::Permit));
        let permit = ctx.step.action(ActionType::Permit).unwrap().unwrap();
        assert_eq!(permit.status, ActionStatus::MessageRequired);

        ctx.step.options = ExecutionOptions::default();
        let action = ctx.step.action(ActionType::Permit).unwrap();
        assert!(AllowanceTask.should_run(&ctx, action.as_ref()));
        AllowanceTask.run(&mut ctx, action).await.unwrap();
        assert_eq!(fake.signed_types(), vec!["PermitTransferFrom"]);
    }

    #[tokio::test]
    async fn test_native_token_skips_allowance() {
        let mut step = evm_step("s1", 137, 10);
        step.action.from_token.address = "0x0000000000000000000000000000000000000000".to_string();
        let ctx = evm_context(
            step,
            ExecutionStrategy::EvmStandard,
            interactive(),
            Arc::new(FakeEvm::on_chain(137)),
        );
        assert!(!AllowanceTask.should_run(&ctx, None));
    }
}
