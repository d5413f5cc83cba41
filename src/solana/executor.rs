//! Solana step executor: RPC submission or Jito bundle

use super::adapter::SolanaChain;
use super::client::{JitoClient, SolanaRpc, SolanaWallet};
use super::tasks::{JitoBundleTask, SendSolanaTransactionTask};
use super::watch::SolanaWatchers;
use crate::chain::ChainType;
use crate::error::ExecutionResult;
use crate::executor::{run_step, StepExecutor};
use crate::interaction::ExecutionOptions;
use crate::pipeline::{ExecutionServices, ExecutionStrategy, StepContext, StrategyTable, TaskPipeline};
use crate::step::Execution;
use crate::tasks::{PrepareStepTask, WaitForDestinationTask};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn solana_strategies() -> StrategyTable<SolanaChain> {
    StrategyTable::new()
        .register(
            TaskPipeline::new(ExecutionStrategy::SolanaStandard)
                .task(PrepareStepTask::<SolanaChain>::new())
                .task(SendSolanaTransactionTask)
                .task(WaitForDestinationTask::<SolanaChain>::new()),
        )
        .register(
            TaskPipeline::new(ExecutionStrategy::SolanaJito)
                .task(PrepareStepTask::<SolanaChain>::new())
                .task(JitoBundleTask)
                .task(WaitForDestinationTask::<SolanaChain>::new()),
        )
}

pub struct SolanaStepExecutor {
    services: Arc<ExecutionServices>,
    rpc: Arc<dyn SolanaRpc>,
    wallet: Arc<dyn SolanaWallet>,
    jito: Option<Arc<dyn JitoClient>>,
    watchers: Arc<SolanaWatchers>,
    strategies: StrategyTable<SolanaChain>,
}

impl SolanaStepExecutor {
    pub fn new(
        services: Arc<ExecutionServices>,
        rpc: Arc<dyn SolanaRpc>,
        wallet: Arc<dyn SolanaWallet>,
    ) -> Self {
        Self {
            services,
            rpc,
            wallet,
            jito: None,
            watchers: Arc::new(SolanaWatchers::new()),
            strategies: solana_strategies(),
        }
    }

    pub fn with_jito(mut self, jito: Arc<dyn JitoClient>) -> Self {
        self.jito = Some(jito);
        self
    }

    pub fn resolve_strategy(&self, options: &ExecutionOptions) -> ExecutionStrategy {
        match (options.use_jito_bundle, self.jito.is_some()) {
            (true, true) => ExecutionStrategy::SolanaJito,
            (true, false) => {
                warn!("Jito bundle requested but no block engine is configured");
                ExecutionStrategy::SolanaStandard
            }
            _ => ExecutionStrategy::SolanaStandard,
        }
    }
}

#[async_trait]
impl StepExecutor for SolanaStepExecutor {
    fn chain_type(&self) -> ChainType {
        ChainType::Svm
    }

    async fn execute_step(
        &self,
        step_id: &str,
        options: ExecutionOptions,
    ) -> ExecutionResult<Execution> {
        let strategy = self.resolve_strategy(&options);
        debug!("Step {} resolved to {}", step_id, strategy);

        let chain = SolanaChain::new(
            self.rpc.clone(),
            self.wallet.clone(),
            self.jito.clone(),
            self.watchers.clone(),
        );
        let ctx = StepContext::new(self.services.clone(), step_id, strategy, options);
        run_step(&self.strategies, ctx, chain).await
    }
}
