//! Crossroute executor - resumable execution of quoted cross-chain swap and
//! bridge steps
//!
//! A step is driven through a pipeline of tasks chosen per chain family and
//! execution strategy. Every transition is written through the status ledger,
//! so a paused or interrupted step resumes from its last checkpoint.

pub mod allowance;
pub mod chain;
pub mod config;
pub mod error;
pub mod evm;
pub mod executor;
pub mod guard;
pub mod interaction;
pub mod metrics;
pub mod pipeline;
pub mod quote;
pub mod solana;
pub mod state;
pub mod step;
pub mod sui;
pub mod tasks;
pub mod utxo;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainId, ChainRegistry, ChainType};
pub use config::Settings;
pub use error::{ErrorCode, ExecutionError, ExecutionResult, SdkError};
pub use executor::{ExecutorSet, StepExecutor};
pub use interaction::{ExecutionOptions, NoInteraction, UserInteraction};
pub use state::{ExecutionStore, StatusLedger};
pub use step::{Execution, Route, Step};
