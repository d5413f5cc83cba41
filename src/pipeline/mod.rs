//! Task & pipeline framework
//!
//! A pipeline is the ordered task list of one [`ExecutionStrategy`]. Running
//! it either completes, pauses with a serializable [`crate::step::Checkpoint`],
//! or fails after recording the failure on the current action.

mod context;
mod runner;
mod strategy;
mod task;

pub use context::{ChainAdapter, ExecutionServices, StepContext, TaskContext, TaskState};
pub use runner::{PipelineResult, PipelineStatus, TaskPipeline};
pub use strategy::{ExecutionStrategy, StrategyTable};
pub use task::{ExecutionTask, TaskOutcome, TaskStatus};
