//! EVM chain family
//!
//! This module provides:
//! - Client seams for public RPC reads and wallet signing, with ethers-backed
//!   implementations (multi-RPC failover, local private key)
//! - Receipt, batch and relayer watchers with replacement detection
//! - The allowance, transaction, batch and relayer tasks
//! - Strategy resolution (standard / atomic batch / relayed)

pub mod abi;
pub mod adapter;
pub mod client;
pub mod errors;
pub mod executor;
pub mod gas;
pub mod permit;
pub mod provider;
pub mod request;
pub mod tasks;
pub mod wallet;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::EvmChain;
pub use client::{AtomicBatchSupport, BatchStatus, EvmPublicClient, EvmWallet};
pub use errors::classify_evm_error;
pub use executor::{evm_strategies, EvmStepExecutor};
pub use gas::{GasEstimator, GasPrice};
pub use provider::{EvmClientRegistry, RpcClient};
pub use wallet::{local_wallet_for, LocalWalletClient};
pub use watch::EvmWatchers;
