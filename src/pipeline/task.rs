use super::context::TaskContext;
use crate::error::ExecutionResult;
use crate::step::{Action, ActionType};

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    /// Stop advancing; the caller must re-invoke with the saved checkpoint
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub data: Option<serde_json::Value>,
}

impl TaskOutcome {
    pub fn completed() -> Self {
        Self {
            status: TaskStatus::Completed,
            data: None,
        }
    }

    pub fn paused() -> Self {
        Self {
            status: TaskStatus::Paused,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_paused(&self) -> bool {
        self.status == TaskStatus::Paused
    }
}

/// One unit of a pipeline.
///
/// `should_run` is a pure predicate evaluated right before `run`; `run` may
/// suspend by returning [`TaskOutcome::paused`] and raises errors unclassified.
#[async_trait]
pub trait ExecutionTask<X>: Send + Sync {
    fn name(&self) -> &'static str;

    /// The action this task drives, if any. Looked up before `should_run` and
    /// marked FAILED when `run` errors.
    fn action_type(&self, _ctx: &TaskContext<X>) -> Option<ActionType> {
        None
    }

    fn should_run(&self, _ctx: &TaskContext<X>, _action: Option<&Action>) -> bool {
        true
    }

    async fn run(
        &self,
        ctx: &mut TaskContext<X>,
        action: Option<Action>,
    ) -> ExecutionResult<TaskOutcome>;
}
