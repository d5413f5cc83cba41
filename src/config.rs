//! Configuration management for the step executor
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::{ChainId, ChainType};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub executor: ExecutorConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Interval between receipt / status polls
    pub poll_interval_ms: u64,
    /// Consecutive poll errors tolerated before giving up
    pub max_retries: u32,
    pub receipt_timeout_secs: u64,
    pub destination_poll_interval_ms: u64,
    pub destination_timeout_secs: u64,
    /// Buffer added on top of estimated gas limits
    pub gas_limit_buffer_percent: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_retries: 5,
            receipt_timeout_secs: 600,
            destination_poll_interval_ms: 5_000,
            destination_timeout_secs: 3_600,
            gas_limit_buffer_percent: 20,
        }
    }
}

impl ExecutorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn destination_poll_interval(&self) -> Duration {
        Duration::from_millis(self.destination_poll_interval_ms)
    }

    pub fn destination_timeout(&self) -> Duration {
        Duration::from_secs(self.destination_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_api_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "CROSSROUTE_PRIVATE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    pub chain_type: ChainType,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    pub explorer_url: Option<String>,
    pub permit2_address: Option<String>,
    pub permit2_proxy_address: Option<String>,
    #[serde(default)]
    pub relayer_supported: bool,
    pub confirmation_blocks: Option<u64>,
    pub enabled: bool,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("CROSSROUTE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // At least one chain must be enabled
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.chain_type == ChainType::Evm && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.enabled && chain.explorer_url.is_none() {
                tracing::warn!("Chain {} has no explorer URL - tx links disabled", name);
            }
        }

        if self.api.base_url.is_empty() {
            anyhow::bail!("API base URL must not be empty");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[executor]
poll_interval_ms = 500
max_retries = 3
receipt_timeout_secs = 60
destination_poll_interval_ms = 1000
destination_timeout_secs = 120
gas_limit_buffer_percent = 10

[api]
base_url = "https://quotes.example.com/v1"
api_key = "${CROSSROUTE_TEST_API_KEY}"

[chains.pol]
chain_id = 137
name = "Polygon"
chain_type = "EVM"
rpc_urls = ["https://polygon-rpc.example.com"]
explorer_url = "https://polygonscan.com"
permit2_address = "0x000000000022D473030F116dDEE9F6B43aC78BA3"
enabled = true

[chains.sol]
chain_id = 1151111081099710
name = "Solana"
chain_type = "SVM"
enabled = false
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("CROSSROUTE_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${CROSSROUTE_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("CROSSROUTE_TEST_API_KEY", "secret");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.api.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.executor.max_retries, 3);
        assert_eq!(settings.enabled_chains().len(), 1);
        assert_eq!(
            settings.get_chain_by_id(137).map(|c| c.chain_type),
            Some(ChainType::Evm)
        );
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_rejects_evm_chain_without_rpc() {
        let broken = SAMPLE.replace(
            "rpc_urls = [\"https://polygon-rpc.example.com\"]",
            "rpc_urls = []",
        );
        assert!(Settings::parse(&broken).is_err());
    }

    #[test]
    fn test_bundled_default_config_parses() {
        let settings =
            Settings::parse(include_str!("../config/default.toml")).unwrap();
        assert!(settings.database.is_none());
        assert_eq!(settings.wallet.private_key_env, "CROSSROUTE_PRIVATE_KEY");
        assert_eq!(
            settings.get_chain_by_id(crate::chain::SUI_CHAIN_ID).map(|c| c.chain_type),
            Some(ChainType::Mvm)
        );
        assert_eq!(settings.enabled_chains().len(), 6);
    }
}
