//! Bitcoin step executor

use super::client::{UtxoClient, UtxoWallet};
use super::errors::classify_utxo_error;
use super::tasks::SendUtxoTransactionTask;
use super::watch::UtxoConfirmation;
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

pub struct UtxoChain {
    pub client: Arc<dyn UtxoClient>,
    pub wallet: Arc<dyn UtxoWallet>,
    pub watchers: Arc<WatcherRegistry<UtxoConfirmation>>,
}

impl UtxoChain {
    pub fn new(
        client: Arc<dyn UtxoClient>,
        wallet: Arc<dyn UtxoWallet>,
        watchers: Arc<WatcherRegistry<UtxoConfirmation>>,
    ) -> Self {
        Self {
            client,
            wallet,
            watchers,
        }
    }
}

impl ChainAdapter for UtxoChain {
    fn chain_type(&self) -> ChainType {
        ChainType::Utxo
    }

    fn classify(&self, err: &ChainError) -> SdkError {
        classify_utxo_error(err)
    }
}

pub fn utxo_strategies() -> StrategyTable<UtxoChain> {
    StrategyTable::new().register(
        TaskPipeline::new(ExecutionStrategy::Utxo)
            .task(PrepareStepTask::<UtxoChain>::new())
            .task(SendUtxoTransactionTask)
            .task(WaitForDestinationTask::<UtxoChain>::new()),
    )
}

pub struct UtxoStepExecutor {
    services: Arc<ExecutionServices>,
    client: Arc<dyn UtxoClient>,
    wallet: Arc<dyn UtxoWallet>,
    watchers: Arc<WatcherRegistry<UtxoConfirmation>>,
    strategies: StrategyTable<UtxoChain>,
}

impl UtxoStepExecutor {
    pub fn new(
        services: Arc<ExecutionServices>,
        client: Arc<dyn UtxoClient>,
        wallet: Arc<dyn UtxoWallet>,
    ) -> Self {
        Self {
            services,
            client,
            wallet,
            watchers: Arc::new(WatcherRegistry::new("utxo_transaction")),
            strategies: utxo_strategies(),
        }
    }
}

#[async_trait]
impl StepExecutor for UtxoStepExecutor {
    fn chain_type(&self) -> ChainType {
        ChainType::Utxo
    }

    async fn execute_step(
        &self,
        step_id: &str,
        options: ExecutionOptions,
    ) -> ExecutionResult<Execution> {
        let chain = UtxoChain::new(self.client.clone(), self.wallet.clone(), self.watchers.clone());
        let ctx = StepContext::new(self.services.clone(), step_id, ExecutionStrategy::Utxo, options);
        run_step(&self.strategies, ctx, chain).await
    }
}
