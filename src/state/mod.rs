//! Execution state
//!
//! Handles:
//! - The in-memory status ledger every task writes through
//! - Persisting routes (executions and checkpoints) for resume after restart

mod ledger;
mod store;

pub use ledger::{RouteRegistry, RouteUpdateHook, StatusLedger};
pub use store::{ExecutionStore, MemoryExecutionStore, PgExecutionStore};
