//! Uniform `execute_step` driver shared by every chain family
//!
//! One invocation either completes the step, pauses it with a checkpoint
//! saved on the execution record, or fails it. Re-invoking with the same
//! route resumes from the checkpoint.

use crate::chain::ChainType;
use crate::error::{ExecutionError, ExecutionResult, SdkError};
use crate::interaction::ExecutionOptions;
use crate::pipeline::{ChainAdapter, StepContext, StrategyTable, TaskContext, TaskState};
use crate::step::{ActionError, Execution, ExecutionPatch, ExecutionStatus};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Whole-step retries honoured by [`StepExecutor::execute_with_retry`]
pub const MAX_STEP_RETRIES: u32 = 3;

/// Drive one step through the pipeline of its strategy.
///
/// A checkpoint left by an earlier invocation pins the strategy it was taken
/// with, so a paused batch is never resumed as a standard execution.
pub async fn run_step<X: ChainAdapter>(
    table: &StrategyTable<X>,
    mut step: StepContext,
    chain: X,
) -> ExecutionResult<Execution> {
    let current = step.step()?;
    if let Some(execution) = current.execution.filter(|e| e.status.is_done()) {
        debug!("Step {} is already done", step.step_id);
        return Ok(execution);
    }

    let execution = step.ledger().init_execution(&step.step_id)?;
    let (start, state) = match execution.checkpoint {
        Some(checkpoint) => {
            if checkpoint.strategy != step.strategy {
                info!(
                    "Step {} resumes with checkpointed strategy {} instead of {}",
                    step.step_id, checkpoint.strategy, step.strategy
                );
                step.strategy = checkpoint.strategy;
            }
            let state: TaskState = serde_json::from_value(checkpoint.context)?;
            (checkpoint.task_index, state)
        }
        None => (0, TaskState::default()),
    };

    let strategy = step.strategy;
    let family = strategy.chain_type();
    let pipeline = table.get(strategy)?;
    crate::metrics::record_step_started(family, strategy);
    info!(
        "Executing step {} with {} from task {}",
        step.step_id, strategy, start
    );

    let mut ctx = TaskContext::new(step, state, chain);
    match pipeline.run(&mut ctx, start).await {
        Ok(result) if result.is_paused() => {
            crate::metrics::record_step_paused(family, strategy);
            Ok(ctx.step.update_execution(ExecutionPatch {
                status: Some(ExecutionStatus::ActionRequired),
                checkpoint: Some(result.checkpoint),
                ..ExecutionPatch::default()
            })?)
        }
        Ok(_) => {
            crate::metrics::record_step_completed(family, strategy);
            info!("Step {} completed", ctx.step_id());
            Ok(ctx.step.update_execution(ExecutionPatch {
                status: Some(ExecutionStatus::Done),
                checkpoint: Some(None),
                ..ExecutionPatch::default()
            })?)
        }
        Err(ExecutionError::Retry(signal)) => {
            warn!("Step {} asked for a retry: {}", ctx.step_id(), signal.reason);
            crate::metrics::record_step_retry(family);
            ctx.step.update_execution(ExecutionPatch {
                checkpoint: Some(None),
                ..ExecutionPatch::default()
            })?;
            Err(ExecutionError::Retry(signal))
        }
        Err(err) => {
            let sdk = match &err {
                ExecutionError::Sdk(sdk) => sdk.clone(),
                other => SdkError::internal(other.to_string()),
            };
            error!("Step {} failed: {}", ctx.step_id(), sdk);
            crate::metrics::record_step_failed(family, strategy, sdk.code);
            ctx.step.update_execution(ExecutionPatch {
                status: Some(ExecutionStatus::Failed),
                checkpoint: Some(None),
                error: Some(ActionError::from(&sdk)),
                ..ExecutionPatch::default()
            })?;
            Err(err)
        }
    }
}

/// Executor of one chain family
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn chain_type(&self) -> ChainType;

    /// Run (or resume) the step once; a retry signal is returned to the caller
    async fn execute_step(
        &self,
        step_id: &str,
        options: ExecutionOptions,
    ) -> ExecutionResult<Execution>;

    /// Run the step, re-running it from scratch with the adjusted options
    /// whenever a task asks for a retry
    async fn execute_with_retry(
        &self,
        step_id: &str,
        mut options: ExecutionOptions,
    ) -> ExecutionResult<Execution> {
        let mut attempts = 0;
        loop {
            match self.execute_step(step_id, options.clone()).await {
                Err(ExecutionError::Retry(signal)) if attempts < MAX_STEP_RETRIES => {
                    attempts += 1;
                    info!(
                        "Retrying step {} ({}/{}): {}",
                        step_id, attempts, MAX_STEP_RETRIES, signal.reason
                    );
                    options.apply_retry(&signal.params);
                }
                result => return result,
            }
        }
    }
}

/// Per-family executors, dispatched by the chain family of a step's source chain
#[derive(Default)]
pub struct ExecutorSet {
    executors: DashMap<ChainType, Arc<dyn StepExecutor>>,
}

impl ExecutorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(executor.chain_type(), executor);
    }

    pub fn get(&self, chain_type: ChainType) -> ExecutionResult<Arc<dyn StepExecutor>> {
        self.executors
            .get(&chain_type)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                SdkError::internal(format!("No executor registered for {}", chain_type.as_str()))
                    .into()
            })
    }
}
