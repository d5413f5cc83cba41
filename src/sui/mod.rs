//! Sui chain family
//!
//! The wallet signs and executes the transaction block in one call; the
//! full node is then polled until the digest lands in a checkpoint.

pub mod client;
pub mod errors;
pub mod executor;
pub mod tasks;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{SuiClient, SuiExecutionStatus, SuiTransactionEffects, SuiWallet};
pub use errors::classify_sui_error;
pub use executor::{sui_strategies, SuiChain, SuiStepExecutor};
