//! Confirmation depth per chain
//!
//! Different chains have different finality models:
//! - Ethereum: probabilistic, a handful of blocks is enough for a swap receipt
//! - Polygon: probabilistic with frequent shallow reorgs
//! - Rollups (Arbitrum, Optimism, Base): sequencer receipts are final enough
//! - Bitcoin: one confirmation before the bridge picks the deposit up
//! - Solana / Sui: finality is reported by the RPC, no block counting

use super::{ChainId, BITCOIN_CHAIN_ID, SOLANA_CHAIN_ID, SUI_CHAIN_ID};

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: ChainId) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 2,
        // Polygon mainnet
        137 => 5,
        // Rollups
        42161 | 10 | 8453 => 1,
        // Bitcoin
        BITCOIN_CHAIN_ID => 1,
        // Finality reported by the RPC
        SOLANA_CHAIN_ID | SUI_CHAIN_ID => 0,
        // Default
        _ => 1,
    }
}

/// Whether a transaction mined in `tx_block` is deep enough at `current_block`
pub fn has_confirmations(current_block: u64, tx_block: u64, required: u64) -> bool {
    // the inclusion block counts as the first confirmation
    current_block.saturating_sub(tx_block) + 1 >= required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inclusion_block_counts_as_confirmation() {
        assert!(has_confirmations(100, 100, 1));
        assert!(!has_confirmations(100, 100, 2));
        assert!(has_confirmations(101, 100, 2));
        assert!(has_confirmations(100, 100, 0));
    }
}
