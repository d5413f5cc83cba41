use super::client::{JitoClient, SolanaRpc, SolanaWallet};
use super::errors::classify_solana_error;
use super::watch::SolanaWatchers;
use crate::chain::ChainType;
use crate::error::{ChainError, SdkError};
use crate::pipeline::ChainAdapter;

use std::sync::Arc;

/// Clients handed to every Solana task
pub struct SolanaChain {
    pub rpc: Arc<dyn SolanaRpc>,
    pub wallet: Arc<dyn SolanaWallet>,
    /// Block engine for bundle submission, when configured
    pub jito: Option<Arc<dyn JitoClient>>,
    pub watchers: Arc<SolanaWatchers>,
}

impl SolanaChain {
    pub fn new(
        rpc: Arc<dyn SolanaRpc>,
        wallet: Arc<dyn SolanaWallet>,
        jito: Option<Arc<dyn JitoClient>>,
        watchers: Arc<SolanaWatchers>,
    ) -> Self {
        Self {
            rpc,
            wallet,
            jito,
            watchers,
        }
    }
}

impl ChainAdapter for SolanaChain {
    fn chain_type(&self) -> ChainType {
        ChainType::Svm
    }

    fn classify(&self, err: &ChainError) -> SdkError {
        classify_solana_error(err)
    }
}
