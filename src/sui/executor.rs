//! Sui step executor

use super::client::{SuiClient, SuiTransactionEffects, SuiWallet};
use super::errors::classify_sui_error;
use super::tasks::ExecuteSuiTransactionTask;
use crate::chain::ChainType;
use crate::error::{ChainError, ExecutionResult, SdkError};
use crate::executor::{run_step, StepExecutor};
use crate::interaction::ExecutionOptions;
use crate::pipeline::{
    ChainAdapter, ExecutionServices, ExecutionStrategy, StepContext, StrategyTable, TaskPipeline,
};
use crate::step::Execution;
use crate::tasks::{PrepareStepTask, WaitForDestinationTask};
use crate::watch::WatcherRegistry;

use async_trait::async_trait;
use std::sync::Arc;

pub struct SuiChain {
    pub client: Arc<dyn SuiClient>,
    pub wallet: Arc<dyn SuiWallet>,
    pub watchers: Arc<WatcherRegistry<SuiTransactionEffects>>,
}

impl SuiChain {
    pub fn new(
        client: Arc<dyn SuiClient>,
        wallet: Arc<dyn SuiWallet>,
        watchers: Arc<WatcherRegistry<SuiTransactionEffects>>,
    ) -> Self {
        Self {
            client,
            wallet,
            watchers,
        }
    }
}

impl ChainAdapter for SuiChain {
    fn chain_type(&self) -> ChainType {
        ChainType::Mvm
    }

    fn classify(&self, err: &ChainError) -> SdkError {
        classify_sui_error(err)
    }
}

pub fn sui_strategies() -> StrategyTable<SuiChain> {
    StrategyTable::new().register(
        TaskPipeline::new(ExecutionStrategy::Sui)
            .task(PrepareStepTask::<SuiChain>::new())
            .task(ExecuteSuiTransactionTask)
            .task(WaitForDestinationTask::<SuiChain>::new()),
    )
}

pub struct SuiStepExecutor {
    services: Arc<ExecutionServices>,
    client: Arc<dyn SuiClient>,
    wallet: Arc<dyn SuiWallet>,
    watchers: Arc<WatcherRegistry<SuiTransactionEffects>>,
    strategies: StrategyTable<SuiChain>,
}

impl SuiStepExecutor {
    pub fn new(
        services: Arc<ExecutionServices>,
        client: Arc<dyn SuiClient>,
        wallet: Arc<dyn SuiWallet>,
    ) -> Self {
        Self {
            services,
            client,
            wallet,
            watchers: Arc::new(WatcherRegistry::new("sui_transaction")),
            strategies: sui_strategies(),
        }
    }
}

#[async_trait]
impl StepExecutor for SuiStepExecutor {
    fn chain_type(&self) -> ChainType {
        ChainType::Mvm
    }

    async fn execute_step(
        &self,
        step_id: &str,
        options: ExecutionOptions,
    ) -> ExecutionResult<Execution> {
        let chain = SuiChain::new(self.client.clone(), self.wallet.clone(), self.watchers.clone());
        let ctx = StepContext::new(self.services.clone(), step_id, ExecutionStrategy::Sui, options);
        run_step(&self.strategies, ctx, chain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SUI_CHAIN_ID;
    use crate::error::ErrorCode;
    use crate::step::{ActionStatus, ActionType, ExecutionStatus};
    use crate::sui::testing::{sui_step, FakeSui};
    use crate::testing::services_for;

    #[tokio::test]
    async fn test_same_chain_swap_completes() {
        let fake = Arc::new(FakeSui::new());
        let executor = SuiStepExecutor::new(
            services_for(sui_step("s1", SUI_CHAIN_ID)),
            fake.clone(),
            fake.clone(),
        );

        let execution = executor
            .execute_step("s1", ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Done);
        assert!(execution.action(ActionType::ReceivingChain).is_none());

        // a finished step is returned as-is
        executor
            .execute_step("s1", ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(fake.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_classified_failure_is_recorded_on_action() {
        let fake = Arc::new(FakeSui::new().failing_execution("Objects 0x12 are equivocated"));
        let executor = SuiStepExecutor::new(
            services_for(sui_step("s1", SUI_CHAIN_ID)),
            fake.clone(),
            fake,
        );

        let err = executor
            .execute_step("s1", ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TransactionConflict));

        let execution = executor.services.ledger.step("s1").unwrap().execution.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let action = execution.action(ActionType::Swap).unwrap();
        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action.error.is_some());
    }
}
