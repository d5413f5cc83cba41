//! Bitcoin (UTXO) chain family
//!
//! The quote carries a hex PSBT. The wallet signs and finalizes it, the raw
//! transaction is broadcast through the indexer, and the watcher follows
//! replace-by-fee replacements until the configured confirmation depth.

pub mod client;
pub mod errors;
pub mod executor;
pub mod tasks;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{UtxoClient, UtxoTxStatus, UtxoWallet};
pub use errors::classify_utxo_error;
pub use executor::{utxo_strategies, UtxoChain, UtxoStepExecutor};
pub use watch::UtxoConfirmation;
