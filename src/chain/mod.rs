//! Chain metadata shared by every executor
//!
//! This module provides:
//! - Chain identifiers and chain families
//! - A registry of configured chains (explorer links, Permit2 deployment,
//!   relayer support, confirmation depth)

pub mod finality;

pub use finality::recommended_confirmations;

use crate::config::Settings;
use crate::error::{ErrorCode, SdkError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Numeric chain identifier (EVM chain id or the quote service's id for non-EVM chains)
pub type ChainId = u64;

pub const SOLANA_CHAIN_ID: ChainId = 1_151_111_081_099_710;
pub const BITCOIN_CHAIN_ID: ChainId = 20_000_000_000_001;
pub const SUI_CHAIN_ID: ChainId = 9_270_000_000_000_000;

/// Blockchain family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainType {
    #[serde(rename = "EVM")]
    Evm,
    #[serde(rename = "SVM")]
    Svm,
    #[serde(rename = "UTXO")]
    Utxo,
    #[serde(rename = "MVM")]
    Mvm,
}

impl ChainType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChainType::Evm => "EVM",
            ChainType::Svm => "SVM",
            ChainType::Utxo => "UTXO",
            ChainType::Mvm => "MVM",
        }
    }

    /// Best guess for chains missing from the registry
    pub fn from_chain_id(chain_id: ChainId) -> Self {
        match chain_id {
            SOLANA_CHAIN_ID => ChainType::Svm,
            BITCOIN_CHAIN_ID => ChainType::Utxo,
            SUI_CHAIN_ID => ChainType::Mvm,
            _ => ChainType::Evm,
        }
    }

    /// Whether addresses of this family compare case-insensitively
    pub fn case_insensitive_addresses(self) -> bool {
        matches!(self, ChainType::Evm | ChainType::Mvm)
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static information about one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub id: ChainId,
    pub key: String,
    pub name: String,
    pub chain_type: ChainType,
    pub explorer_url: Option<String>,
    pub permit2: Option<String>,
    pub permit2_proxy: Option<String>,
    pub relayer_supported: bool,
    pub confirmations: u64,
}

impl ChainInfo {
    pub fn new(id: ChainId, key: impl Into<String>, chain_type: ChainType) -> Self {
        let key = key.into();
        Self {
            id,
            name: key.clone(),
            key,
            chain_type,
            explorer_url: None,
            permit2: None,
            permit2_proxy: None,
            relayer_supported: false,
            confirmations: 1,
        }
    }

    pub fn supports_permit2(&self) -> bool {
        self.permit2.is_some() && self.permit2_proxy.is_some()
    }

    /// Explorer link for a transaction hash
    pub fn tx_link(&self, tx_hash: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}

/// Registry of known chains, created once per executor instance
#[derive(Debug, Default)]
pub struct ChainRegistry {
    chains: DashMap<ChainId, ChainInfo>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
        }
    }

    /// Build the registry from the enabled chains in the settings
    pub fn from_settings(settings: &Settings) -> Self {
        let registry = Self::new();
        for (key, chain) in settings.enabled_chains() {
            let mut info = ChainInfo::new(chain.chain_id, key.as_str(), chain.chain_type);
            info.name = chain.name.clone();
            info.explorer_url = chain.explorer_url.clone();
            info.permit2 = chain.permit2_address.clone();
            info.permit2_proxy = chain.permit2_proxy_address.clone();
            info.relayer_supported = chain.relayer_supported;
            info.confirmations = chain
                .confirmation_blocks
                .unwrap_or_else(|| recommended_confirmations(chain.chain_id));
            debug!("Registered chain {} (ID: {})", info.name, info.id);
            registry.insert(info);
        }
        info!("Chain registry initialised with {} chains", registry.len());
        registry
    }

    pub fn insert(&self, info: ChainInfo) {
        self.chains.insert(info.id, info);
    }

    pub fn get(&self, chain_id: ChainId) -> Option<ChainInfo> {
        self.chains.get(&chain_id).map(|c| c.clone())
    }

    /// Look up a chain, failing with `NotFound` when it is not configured
    pub fn require(&self, chain_id: ChainId) -> Result<ChainInfo, SdkError> {
        self.get(chain_id).ok_or_else(|| {
            SdkError::new(
                ErrorCode::NotFound,
                format!("Chain {} is not configured", chain_id),
            )
        })
    }

    pub fn chain_type(&self, chain_id: ChainId) -> ChainType {
        self.get(chain_id)
            .map(|c| c.chain_type)
            .unwrap_or_else(|| ChainType::from_chain_id(chain_id))
    }

    pub fn tx_link(&self, chain_id: ChainId, tx_hash: &str) -> Option<String> {
        self.get(chain_id).and_then(|c| c.tx_link(tx_hash))
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.iter().map(|e| *e.key()).collect()
    }
}
