//! EVM step executor: strategy resolution and the three task pipelines

use super::adapter::EvmChain;
use super::client::EvmWallet;
use super::provider::EvmClientRegistry;
use super::tasks::{
    AllowanceTask, BatchTransactionTask, CheckChainTask, RelayedTransactionTask,
    SendTransactionTask,
};
use super::watch::EvmWatchers;
use crate::chain::ChainType;
use crate::error::ExecutionResult;
use crate::executor::{run_step, StepExecutor};
use crate::interaction::ExecutionOptions;
use crate::pipeline::{ExecutionServices, ExecutionStrategy, StepContext, StrategyTable, TaskPipeline};
use crate::step::{Execution, Step};
use crate::tasks::{PrepareStepTask, WaitForDestinationTask};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Task sequences of the standard, atomic-batch and relayed strategies
pub fn evm_strategies() -> StrategyTable<EvmChain> {
    StrategyTable::new()
        .register(
            TaskPipeline::new(ExecutionStrategy::EvmStandard)
                .task(CheckChainTask)
                .task(PrepareStepTask::<EvmChain>::new())
                .task(AllowanceTask)
                .task(SendTransactionTask)
                .task(WaitForDestinationTask::<EvmChain>::new()),
        )
        .register(
            TaskPipeline::new(ExecutionStrategy::EvmBatched)
                .task(CheckChainTask)
                .task(PrepareStepTask::<EvmChain>::new())
                .task(AllowanceTask)
                .task(BatchTransactionTask)
                .task(WaitForDestinationTask::<EvmChain>::new()),
        )
        .register(
            TaskPipeline::new(ExecutionStrategy::EvmRelayed)
                .task(CheckChainTask)
                .task(PrepareStepTask::<EvmChain>::new())
                .task(AllowanceTask)
                .task(RelayedTransactionTask)
                .task(WaitForDestinationTask::<EvmChain>::new()),
        )
}

pub struct EvmStepExecutor {
    services: Arc<ExecutionServices>,
    clients: Arc<EvmClientRegistry>,
    wallet: Arc<dyn EvmWallet>,
    watchers: Arc<EvmWatchers>,
    strategies: StrategyTable<EvmChain>,
}

impl EvmStepExecutor {
    pub fn new(
        services: Arc<ExecutionServices>,
        clients: Arc<EvmClientRegistry>,
        wallet: Arc<dyn EvmWallet>,
    ) -> Self {
        Self {
            services,
            clients,
            wallet,
            watchers: Arc::new(EvmWatchers::new()),
            strategies: evm_strategies(),
        }
    }

    pub fn watchers(&self) -> &Arc<EvmWatchers> {
        &self.watchers
    }

    /// Relayer when asked for and supported, then atomic batch when the
    /// wallet can do it, otherwise one transaction per action
    pub async fn resolve_strategy(
        &self,
        step: &Step,
        options: &ExecutionOptions,
    ) -> ExecutionResult<ExecutionStrategy> {
        let chain_id = step.action.from_chain_id;
        let chain = self.services.chains.require(chain_id)?;

        if options.use_relayer && chain.relayer_supported {
            return Ok(ExecutionStrategy::EvmRelayed);
        }

        if !options.disable_atomic_batch {
            match self.wallet.atomic_batch_support(chain_id).await {
                Ok(support) if support.is_usable() => return Ok(ExecutionStrategy::EvmBatched),
                Ok(_) => {}
                Err(e) => warn!("Atomic batch capability check failed on {}: {}", chain_id, e),
            }
        }

        Ok(ExecutionStrategy::EvmStandard)
    }
}

#[async_trait]
impl StepExecutor for EvmStepExecutor {
    fn chain_type(&self) -> ChainType {
        ChainType::Evm
    }

    async fn execute_step(
        &self,
        step_id: &str,
        options: ExecutionOptions,
    ) -> ExecutionResult<Execution> {
        let step = self.services.ledger.step(step_id)?;
        let strategy = self.resolve_strategy(&step, &options).await?;
        debug!("Step {} resolved to {}", step_id, strategy);

        let chain = EvmChain::new(
            self.clients.get(step.action.from_chain_id)?,
            self.wallet.clone(),
            self.watchers.clone(),
        );
        let ctx = StepContext::new(self.services.clone(), step_id, strategy, options);
        run_step(&self.strategies, ctx, chain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::client::{AtomicBatchSupport, EvmPublicClient};
    use crate::evm::testing::{evm_step, FakeEvm};
    use crate::step::{ActionStatus, ActionType, ExecutionStatus};
    use crate::testing::{services_for, PERMIT2_PROXY};
    use ethers::types::NameOrAddress;

    fn executor(step: Step, fake: Arc<FakeEvm>) -> EvmStepExecutor {
        let clients = EvmClientRegistry::new();
        let public: Arc<dyn EvmPublicClient> = fake.clone();
        clients.insert(public);
        EvmStepExecutor::new(services_for(step), Arc::new(clients), fake)
    }

    #[test]
    fn test_pipelines_order_tasks() {
        let table = evm_strategies();
        let standard = table.get(ExecutionStrategy::EvmStandard).unwrap();
        assert_eq!(
            standard.task_names(),
            vec![
                "check_chain",
                "prepare_step",
                "allowance",
                "send_transaction",
                "wait_for_destination"
            ]
        );
        let batched = table.get(ExecutionStrategy::EvmBatched).unwrap();
        assert_eq!(
            batched.task_names(),
            vec![
                "check_chain",
                "prepare_step",
                "allowance",
                "batch_transaction",
                "wait_for_destination"
            ]
        );
        let relayed = table.get(ExecutionStrategy::EvmRelayed).unwrap();
        assert_eq!(relayed.task_names()[1], "prepare_step");
        assert_eq!(relayed.task_names()[3], "relayed_transaction");
    }

    #[tokio::test]
    async fn test_strategy_resolution() {
        let step = evm_step("s1", 137, 137);
        let plain = executor(step.clone(), Arc::new(FakeEvm::on_chain(137)));
        let options = ExecutionOptions::default();
        assert_eq!(
            plain.resolve_strategy(&step, &options).await.unwrap(),
            ExecutionStrategy::EvmStandard
        );

        let batching = executor(
            step.clone(),
            Arc::new(FakeEvm::on_chain(137).with_batch_support(AtomicBatchSupport::Ready)),
        );
        assert_eq!(
            batching.resolve_strategy(&step, &options).await.unwrap(),
            ExecutionStrategy::EvmBatched
        );
        let no_batch = ExecutionOptions {
            disable_atomic_batch: true,
            ..ExecutionOptions::default()
        };
        assert_eq!(
            batching.resolve_strategy(&step, &no_batch).await.unwrap(),
            ExecutionStrategy::EvmStandard
        );

        let relayer = ExecutionOptions {
            use_relayer: true,
            ..ExecutionOptions::default()
        };
        assert_eq!(
            batching.resolve_strategy(&step, &relayer).await.unwrap(),
            ExecutionStrategy::EvmRelayed
        );
    }

    #[tokio::test]
    async fn test_standard_swap_signs_permit_and_sends_through_proxy() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let executor = executor(evm_step("s1", 137, 137), fake.clone());

        let execution = executor
            .execute_step("s1", ExecutionOptions::default())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Done);
        assert!(execution.checkpoint.is_none());
        assert_eq!(fake.signed_types(), vec!["PermitTransferFrom"]);
        assert!(fake.approvals().is_empty());
        let sent = fake.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].to(),
            Some(&NameOrAddress::Address(PERMIT2_PROXY.parse().unwrap()))
        );
        assert_eq!(
            execution.action(ActionType::Swap).map(|a| a.status),
            Some(ActionStatus::Done)
        );
    }

    #[tokio::test]
    async fn test_non_interactive_run_pauses_then_resumes() {
        let fake = Arc::new(FakeEvm::on_chain(137));
        let executor = executor(evm_step("s1", 137, 137), fake.clone());

        let paused = executor
            .execute_step("s1", ExecutionOptions::non_interactive())
            .await
            .unwrap();
        assert_eq!(paused.status, ExecutionStatus::ActionRequired);
        assert_eq!(paused.checkpoint.as_ref().map(|c| c.task_index), Some(1));
        assert!(fake.sent.lock().unwrap().is_empty());

        let done = executor
            .execute_step("s1", ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Done);
        assert_eq!(fake.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_upgrade_falls_back_to_standard() {
        let fake = Arc::new(
            FakeEvm::on_chain(137)
                .with_batch_support(AtomicBatchSupport::Ready)
                .rejecting_upgrade(),
        );
        let executor = executor(evm_step("s1", 137, 137), fake.clone());

        let execution = executor
            .execute_with_retry("s1", ExecutionOptions::default())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Done);
        assert!(fake.batches.lock().unwrap().is_empty());
        assert_eq!(fake.sent.lock().unwrap().len(), 1);
        assert_eq!(
            execution.action(ActionType::TokenAllowance).map(|a| a.status),
            Some(ActionStatus::Done)
        );
    }
}
