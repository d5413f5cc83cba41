//! Ordered task runner with pause checkpoints

use super::context::{ChainAdapter, TaskContext};
use super::strategy::ExecutionStrategy;
use super::task::{ExecutionTask, TaskStatus};
use crate::error::{classify_error, ExecutionError, ExecutionResult};
use crate::step::{ActionPatch, ActionStatus, Checkpoint};

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Completed,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    /// Present when paused
    pub checkpoint: Option<Checkpoint>,
    /// Data returned by the last task that produced any
    pub data: Option<serde_json::Value>,
}

impl PipelineResult {
    pub fn completed(data: Option<serde_json::Value>) -> Self {
        Self {
            status: PipelineStatus::Completed,
            checkpoint: None,
            data,
        }
    }

    pub fn paused(checkpoint: Checkpoint) -> Self {
        Self {
            status: PipelineStatus::Paused,
            checkpoint: Some(checkpoint),
            data: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    pub fn is_paused(&self) -> bool {
        self.status == PipelineStatus::Paused
    }
}

/// Ordered task list of one execution strategy
pub struct TaskPipeline<X> {
    strategy: ExecutionStrategy,
    tasks: Vec<Arc<dyn ExecutionTask<X>>>,
}

impl<X: ChainAdapter> TaskPipeline<X> {
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            strategy,
            tasks: Vec::new(),
        }
    }

    pub fn task<T: ExecutionTask<X> + 'static>(mut self, task: T) -> Self {
        self.tasks.push(Arc::new(task));
        self
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Run tasks sequentially starting at `start_index`.
    ///
    /// Stops at the first PAUSED task and returns a checkpoint pointing at it.
    /// Errors are classified, recorded on the task's action and re-raised.
    pub async fn run(
        &self,
        ctx: &mut TaskContext<X>,
        start_index: usize,
    ) -> ExecutionResult<PipelineResult> {
        let mut data = None;

        for (index, task) in self.tasks.iter().enumerate().skip(start_index) {
            let action_type = task.action_type(ctx);
            let action = match action_type {
                Some(action_type) => ctx.step.action(action_type)?,
                None => None,
            };

            if !task.should_run(ctx, action.as_ref()) {
                debug!("Skipping task {} for step {}", task.name(), ctx.step_id());
                continue;
            }

            debug!(
                "Running task {} ({}/{}) for step {}",
                task.name(),
                index + 1,
                self.tasks.len(),
                ctx.step_id()
            );
            let started = Instant::now();
            let result = task.run(ctx, action).await;
            crate::metrics::record_task_latency(
                task.name(),
                self.strategy,
                started.elapsed().as_secs_f64(),
            );

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => return Err(self.fail(ctx, task.as_ref(), err)),
            };

            if outcome.data.is_some() {
                data = outcome.data;
            }

            if outcome.status == TaskStatus::Paused {
                info!(
                    "Step {} paused at task {} ({})",
                    ctx.step_id(),
                    index,
                    task.name()
                );
                let checkpoint = Checkpoint {
                    strategy: self.strategy,
                    task_index: index,
                    context: serde_json::to_value(&ctx.state)?,
                    saved_at: Utc::now(),
                };
                return Ok(PipelineResult::paused(checkpoint));
            }
        }

        Ok(PipelineResult::completed(data))
    }

    fn fail(
        &self,
        ctx: &TaskContext<X>,
        task: &dyn ExecutionTask<X>,
        err: ExecutionError,
    ) -> ExecutionError {
        let action_type = task.action_type(ctx);
        let err = classify_error(err, Some(ctx.step_id()), action_type, |raw| {
            ctx.chain.classify(raw)
        });

        let sdk = match &err {
            ExecutionError::Sdk(sdk) => sdk,
            _ => {
                info!(
                    "Task {} requested a retry of step {}: {}",
                    task.name(),
                    ctx.step_id(),
                    err
                );
                return err;
            }
        };

        warn!("Task {} failed for step {}: {}", task.name(), ctx.step_id(), sdk);
        if let Some(action_type) = action_type {
            match ctx.step.action(action_type) {
                Ok(Some(action)) if action.is_live() => {
                    if let Err(e) = ctx.step.update_action(
                        action_type,
                        ActionStatus::Failed,
                        ActionPatch::failed(sdk),
                    ) {
                        warn!("Could not mark {} as failed: {}", action_type, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Could not look up {} action: {}", action_type, e),
            }
        }

        err
    }
}
