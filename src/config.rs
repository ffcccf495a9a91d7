//! Configuration management for the operator dispatcher
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub operator: OperatorConfig,
    pub chain: ChainConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub contracts: Vec<ContractAbiConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Environment variable holding the hex-encoded operator key
    pub private_key_env: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            private_key_env: "OPERATOR_PRIVATE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Redis URL, or `memory://` for the in-process cache
    pub url: String,
    #[serde(default = "default_nonce_key")]
    pub nonce_key: String,
    #[serde(default = "default_hashmap_key")]
    pub hashmap_key: String,
    /// Number of confirmed nonces to accumulate before purging pending entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl CacheConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    pub fee_buffer_percent: u64,
    pub priority_fee_gwei: u64,
    pub max_gas_price_gwei: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            fee_buffer_percent: 10,
            priority_fee_gwei: 2,
            max_gas_price_gwei: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// JSON-RPC error codes reported when a nonce was already used
    pub nonce_race_codes: Vec<i64>,
    /// Custom error wrapping a forwarded call's revert payload
    pub meta_call_error: String,
    /// Period of the daemon's compaction sweep; 0 disables it
    pub compaction_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            nonce_race_codes: vec![-32000],
            meta_call_error: "META_CALL_ERROR".to_string(),
            compaction_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractAbiConfig {
    pub name: String,
    pub abi_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub network_name: String,
    pub environment: String,
    pub channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            network_name: String::new(),
            environment: String::new(),
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9100,
        }
    }
}

fn default_receipt_timeout() -> u64 {
    300
}

fn default_nonce_key() -> String {
    "operator:nonce".to_string()
}

fn default_hashmap_key() -> String {
    "operator:pending".to_string()
}

fn default_cleanup_interval() -> u64 {
    100
}

impl Settings {
    /// Load settings from the file named by `OPERATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("OPERATOR_CONFIG")
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

    fn parse(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }

        if self.contracts.is_empty() {
            anyhow::bail!("At least one contract ABI must be registered");
        }

        if self.cache.cleanup_interval == 0 {
            anyhow::bail!("cache.cleanup_interval must be positive");
        }

        if self.telemetry.channel_capacity == 0 {
            anyhow::bail!("telemetry.channel_capacity must be positive");
        }

        if self.dispatch.nonce_race_codes.is_empty() {
            tracing::warn!("No nonce race codes configured - only message matching applies");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [chain]
        chain_id = 80001
        name = "mumbai"
        rpc_urls = ["${OPERATOR_TEST_RPC}"]

        [cache]
        url = "memory://"

        [[contracts]]
        name = "Marketplace"
        abi_path = "abi/Marketplace.json"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("OPERATOR_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${OPERATOR_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(
            result,
            "url = \"https://api.example.com/test_value/endpoint\""
        );
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        env::set_var("OPERATOR_TEST_RPC", "http://localhost:8545");
        let settings = Settings::parse(MINIMAL).unwrap();

        assert_eq!(settings.chain.rpc_urls, vec!["http://localhost:8545"]);
        assert!(settings.cache.is_memory());
        assert_eq!(settings.cache.nonce_key, "operator:nonce");
        assert_eq!(settings.cache.hashmap_key, "operator:pending");
        assert_eq!(settings.cache.cleanup_interval, 100);
        assert_eq!(settings.dispatch.nonce_race_codes, vec![-32000]);
        assert_eq!(settings.dispatch.meta_call_error, "META_CALL_ERROR");
        assert_eq!(settings.operator.private_key_env, "OPERATOR_PRIVATE_KEY");
        assert_eq!(settings.chain.receipt_timeout_secs, 300);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}\n[metrics]\nenabled = false\nport = 9200\n",
            MINIMAL.replace("${OPERATOR_TEST_RPC}", "http://node:8545")
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert!(!settings.metrics.enabled);
        assert_eq!(settings.metrics.port, 9200);
        assert_eq!(settings.contracts[0].name, "Marketplace");
    }

    #[test]
    fn test_rejects_missing_contracts() {
        let raw = r#"
            contracts = []

            [chain]
            chain_id = 1
            name = "mainnet"
            rpc_urls = ["http://localhost:8545"]

            [cache]
            url = "memory://"
        "#;
        assert!(Settings::parse(raw).is_err());
    }
}
