//! Plain-data model of routes, steps and their execution records
//!
//! Everything here is serde-serializable so a caller can persist a route
//! (including checkpoints) between process restarts.

mod execution;
mod model;

pub use execution::{
    default_message, Action, ActionError, ActionPatch, ActionStatus, ActionType, Checkpoint,
    Execution, ExecutionPatch, ExecutionStatus, TransactionKind, TransactionRecord,
};
pub use model::{
    Estimate, PreparedCall, Route, SignedTypedData, Step, StepAction, StepType, Token,
    TransactionRequest, TypedDataToSign,
};
