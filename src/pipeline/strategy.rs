//! Execution strategies and the strategy → task sequence table

use super::context::ChainAdapter;
use super::runner::TaskPipeline;
use crate::chain::ChainType;
use crate::error::{ExecutionResult, SdkError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How a step's on-chain work is carried out, resolved once per step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStrategy {
    /// One wallet transaction per action
    EvmStandard,
    /// EIP-5792 atomic batch (approval + main call)
    EvmBatched,
    /// Signed intents submitted by the gasless relayer
    EvmRelayed,
    SolanaStandard,
    /// Jito bundle submission
    SolanaJito,
    Sui,
    Utxo,
}

impl ExecutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStrategy::EvmStandard => "evm_standard",
            ExecutionStrategy::EvmBatched => "evm_batched",
            ExecutionStrategy::EvmRelayed => "evm_relayed",
            ExecutionStrategy::SolanaStandard => "solana_standard",
            ExecutionStrategy::SolanaJito => "solana_jito",
            ExecutionStrategy::Sui => "sui",
            ExecutionStrategy::Utxo => "utxo",
        }
    }

    pub fn chain_type(self) -> ChainType {
        match self {
            ExecutionStrategy::EvmStandard
            | ExecutionStrategy::EvmBatched
            | ExecutionStrategy::EvmRelayed => ChainType::Evm,
            ExecutionStrategy::SolanaStandard | ExecutionStrategy::SolanaJito => ChainType::Svm,
            ExecutionStrategy::Sui => ChainType::Mvm,
            ExecutionStrategy::Utxo => ChainType::Utxo,
        }
    }

    pub fn is_atomic_batch(self) -> bool {
        self == ExecutionStrategy::EvmBatched
    }

    pub fn is_relayed(self) -> bool {
        self == ExecutionStrategy::EvmRelayed
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Explicit map from strategy tag to its ordered task list
pub struct StrategyTable<X> {
    pipelines: HashMap<ExecutionStrategy, Arc<TaskPipeline<X>>>,
}

impl<X: ChainAdapter> StrategyTable<X> {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
        }
    }

    pub fn register(mut self, pipeline: TaskPipeline<X>) -> Self {
        self.pipelines.insert(pipeline.strategy(), Arc::new(pipeline));
        self
    }

    pub fn get(&self, strategy: ExecutionStrategy) -> ExecutionResult<Arc<TaskPipeline<X>>> {
        self.pipelines.get(&strategy).cloned().ok_or_else(|| {
            SdkError::internal(format!("No task pipeline registered for {}", strategy)).into()
        })
    }

    pub fn strategies(&self) -> Vec<ExecutionStrategy> {
        self.pipelines.keys().copied().collect()
    }
}

impl<X: ChainAdapter> Default for StrategyTable<X> {
    fn default() -> Self {
        Self::new()
    }
}
