//! Task context: the freshly rebuilt per-invocation environment, the
//! serializable task state carried across pauses, and the chain-family adapter

use super::strategy::ExecutionStrategy;
use crate::allowance::AllowanceResult;
use crate::chain::{ChainId, ChainRegistry, ChainType};
use crate::config::ExecutorConfig;
use crate::error::{ChainError, ExecutionResult, SdkError};
use crate::interaction::{ExecutionOptions, UserInteraction};
use crate::quote::{StatusResponse, StepService};
use crate::state::StatusLedger;
use crate::step::{
    Action, ActionPatch, ActionStatus, ActionType, Execution, ExecutionPatch, PreparedCall,
    SignedTypedData, Step, TransactionKind, TransactionRecord,
};
use crate::watch::WatcherRegistry;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Long-lived collaborators shared by every step execution of one executor instance
pub struct ExecutionServices {
    pub ledger: Arc<StatusLedger>,
    pub chains: Arc<ChainRegistry>,
    pub quotes: Arc<dyn StepService>,
    pub interaction: Arc<dyn UserInteraction>,
    pub settings: ExecutorConfig,
    /// Destination-chain status watchers, keyed by source tx hash
    pub status_watchers: WatcherRegistry<StatusResponse>,
}

impl ExecutionServices {
    pub fn new(
        ledger: Arc<StatusLedger>,
        chains: Arc<ChainRegistry>,
        quotes: Arc<dyn StepService>,
        interaction: Arc<dyn UserInteraction>,
        settings: ExecutorConfig,
    ) -> Self {
        Self {
            ledger,
            chains,
            quotes,
            interaction,
            settings,
            status_watchers: WatcherRegistry::new("status"),
        }
    }
}

/// Per-invocation view of one step
#[derive(Clone)]
pub struct StepContext {
    pub services: Arc<ExecutionServices>,
    pub step_id: String,
    pub strategy: ExecutionStrategy,
    pub options: ExecutionOptions,
}

impl StepContext {
    pub fn new(
        services: Arc<ExecutionServices>,
        step_id: impl Into<String>,
        strategy: ExecutionStrategy,
        options: ExecutionOptions,
    ) -> Self {
        Self {
            services,
            step_id: step_id.into(),
            strategy,
            options,
        }
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.services.ledger
    }

    pub fn settings(&self) -> &ExecutorConfig {
        &self.services.settings
    }

    pub fn interaction(&self) -> &dyn UserInteraction {
        self.services.interaction.as_ref()
    }

    pub fn allow_interaction(&self) -> bool {
        self.options.allow_user_interaction
    }

    /// Fresh snapshot of the step from the ledger
    pub fn step(&self) -> ExecutionResult<Step> {
        Ok(self.ledger().step(&self.step_id)?)
    }

    pub fn execution(&self) -> ExecutionResult<Option<Execution>> {
        Ok(self.step()?.execution)
    }

    pub fn action(&self, action_type: ActionType) -> ExecutionResult<Option<Action>> {
        Ok(self.ledger().find_action(&self.step_id, action_type)?)
    }

    pub fn find_or_create_action(
        &self,
        action_type: ActionType,
        chain_id: ChainId,
    ) -> ExecutionResult<Action> {
        Ok(self
            .ledger()
            .find_or_create_action(&self.step_id, action_type, chain_id)?)
    }

    pub fn update_action(
        &self,
        action_type: ActionType,
        status: ActionStatus,
        patch: ActionPatch,
    ) -> ExecutionResult<Action> {
        Ok(self
            .ledger()
            .update_action(&self.step_id, action_type, status, patch)?)
    }

    /// Move an existing action to `status` if the state machine still allows
    /// it; returns whether the action changed
    pub fn advance_action(
        &self,
        action_type: ActionType,
        status: ActionStatus,
        patch: ActionPatch,
    ) -> ExecutionResult<bool> {
        match self.action(action_type)? {
            Some(action) if action.status.can_transition_to(status) => {
                self.update_action(action_type, status, patch)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn update_execution(&self, patch: ExecutionPatch) -> ExecutionResult<Execution> {
        Ok(self.ledger().update_execution(&self.step_id, patch)?)
    }

    pub fn tx_link(&self, chain_id: ChainId, tx_hash: &str) -> Option<String> {
        self.services.chains.tx_link(chain_id, tx_hash)
    }

    /// Record a submitted transaction (or relayer/batch task) on the execution
    pub fn record_transaction(
        &self,
        kind: TransactionKind,
        chain_id: ChainId,
        tx_hash: Option<&str>,
        task_id: Option<&str>,
    ) -> ExecutionResult<()> {
        let record = TransactionRecord {
            kind,
            chain_id,
            tx_hash: tx_hash.map(str::to_string),
            tx_link: tx_hash.and_then(|h| self.tx_link(chain_id, h)),
            task_id: task_id.map(str::to_string),
        };
        self.update_execution(ExecutionPatch::transaction(record))?;
        Ok(())
    }

    /// Action patch for a tx hash with its explorer link
    pub fn tx_patch(&self, chain_id: ChainId, tx_hash: &str) -> ActionPatch {
        ActionPatch::tx(tx_hash, self.tx_link(chain_id, tx_hash))
    }
}

/// Serializable state handed from task to task and saved in checkpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskState {
    pub allowance: Option<AllowanceResult>,
    /// Signed intents for the relayer
    pub signatures: Vec<SignedTypedData>,
    /// Calls collected for an atomic batch
    pub calls: Vec<PreparedCall>,
    pub tx_hash: Option<String>,
    /// Wallet batch id or relayer task id
    pub task_id: Option<String>,
    /// Signed non-EVM transaction (base64 / hex) awaiting submission
    pub signed_transaction: Option<String>,
    /// Block height when the transaction was submitted
    pub submitted_at: Option<u64>,
}

/// Chain-family specifics a pipeline needs besides the clients themselves
pub trait ChainAdapter: Send + Sync {
    fn chain_type(&self) -> ChainType;

    /// Map a raw client error to its canonical kind
    fn classify(&self, err: &ChainError) -> SdkError;
}

/// Everything a task sees
pub struct TaskContext<X> {
    pub step: StepContext,
    pub state: TaskState,
    pub chain: X,
}

impl<X: ChainAdapter> TaskContext<X> {
    pub fn new(step: StepContext, state: TaskState, chain: X) -> Self {
        Self { step, state, chain }
    }

    pub fn step_id(&self) -> &str {
        &self.step.step_id
    }
}
