//! Solana chain family
//!
//! Serialized transactions arrive base64 encoded from the quote service, are
//! signed by the wallet and submitted either over RPC or as a Jito bundle.
//! An RPC submission that is not confirmed within the blockhash validity
//! window is reported as expired.

pub mod adapter;
pub mod client;
pub mod errors;
pub mod executor;
pub mod tasks;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::SolanaChain;
pub use client::{BundleState, BundleStatus, Commitment, JitoClient, SignatureStatus, SolanaRpc, SolanaWallet};
pub use errors::classify_solana_error;
pub use executor::{solana_strategies, SolanaStepExecutor};
pub use watch::{SolanaWatchers, BLOCKHASH_VALIDITY_BLOCKS};
