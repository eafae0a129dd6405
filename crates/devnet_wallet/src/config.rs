use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_primitives::U256;
use anyhow::{Context, Result};
use devnet_bridge::BridgeConfig;
use devnet_bridge::config::duration_ms_serde;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Felt;

/// Largest amount the devnet faucet mints in one request (10 tokens at 18
/// decimals).
pub const DEFAULT_MAX_MINT_CHUNK: u128 = 10_000_000_000_000_000_000;

/// Universal Deployer Contract address on Starknet devnets.
pub const DEFAULT_UDC_ADDRESS: &str =
    "0x041a78e741e5af2fec34b695679bc6891742439f7afb8484ecd7766661ad02bf";

/// ETH fee token predeployed on devnet.
pub const DEFAULT_FEE_TOKEN: &str =
    "0x49d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";

/// First predeployed devnet account (seed 0).
pub const DEFAULT_ACCOUNT_ADDRESS: &str =
    "0x64b48806902a367c8598f4f95c305e8c1a1acba5f082d294a43793113115691";

/// Which [`Account`](crate::account::Account) variant fronts the address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountMode {
    /// Requests go through the bridge to a signer host.
    #[default]
    Bridge,
    /// Requests go straight to an in-process signing authority.
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub address: Felt,
    pub mode: AccountMode,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            address: parse_const(DEFAULT_ACCOUNT_ADDRESS),
            mode: AccountMode::Bridge,
        }
    }
}

/// Wallet configuration, persisted at `~/.devnet-wallet/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Starknet JSON-RPC endpoint of the devnet.
    pub rpc_url: String,
    /// Base URL of the devnet faucet (`/mint` is appended).
    pub faucet_url: String,
    pub fee_token: Felt,
    /// Receives excess funds returned by a top-up.
    pub sink_address: Felt,
    pub udc_address: Felt,
    /// Per-request faucet cap, as a decimal string on the wire.
    #[serde(with = "u256_dec_serde")]
    pub max_mint_chunk: U256,
    #[serde(with = "duration_ms_serde")]
    pub poll_interval: Duration,
    #[serde(with = "duration_ms_serde")]
    pub inclusion_timeout: Duration,
    #[serde(with = "duration_ms_serde")]
    pub request_timeout: Duration,
    pub account: AccountConfig,
    pub bridge: BridgeConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:5050/rpc".into(),
            faucet_url: "http://127.0.0.1:5050".into(),
            fee_token: parse_const(DEFAULT_FEE_TOKEN),
            sink_address: Felt::from(1u64),
            udc_address: parse_const(DEFAULT_UDC_ADDRESS),
            max_mint_chunk: U256::from(DEFAULT_MAX_MINT_CHUNK),
            poll_interval: Duration::from_millis(500),
            inclusion_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            account: AccountConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl WalletConfig {
    /// Returns the base directory: `~/.devnet-wallet/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".devnet-wallet"))
    }

    /// Returns the config file path: `~/.devnet-wallet/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.devnet-wallet/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Loads config from the default path, or creates it if missing.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path, writing defaults there if the
    /// file does not exist yet.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_file(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to a specific file path, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !validate_url(&self.rpc_url) {
            anyhow::bail!("invalid RPC URL: {}", self.rpc_url);
        }
        if !validate_url(&self.faucet_url) {
            anyhow::bail!("invalid faucet URL: {}", self.faucet_url);
        }
        if self.max_mint_chunk.is_zero() {
            anyhow::bail!("max_mint_chunk must be greater than zero");
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than zero");
        }
        Ok(())
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}

fn parse_const(hex: &str) -> Felt {
    hex.parse().unwrap_or(Felt::ZERO)
}

pub mod u256_dec_serde {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        let raw = raw.trim();
        match raw.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16),
            None => U256::from_str_radix(raw, 10),
        }
        .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.sink_address, Felt::from(1u64));
        assert_eq!(config.max_mint_chunk, U256::from(10u64).pow(U256::from(19u64)));
        assert_eq!(config.udc_address.to_string(), DEFAULT_UDC_ADDRESS.replace("0x0", "0x"));
        assert_eq!(config.account.mode, AccountMode::Bridge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_constants_parse() {
        for hex in [DEFAULT_UDC_ADDRESS, DEFAULT_FEE_TOKEN, DEFAULT_ACCOUNT_ADDRESS] {
            assert!(hex.parse::<Felt>().is_ok(), "{hex}");
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let mut config = WalletConfig::default();
        config.rpc_url = "http://localhost:6060/rpc".into();
        config.account.mode = AccountMode::Local;
        config.max_mint_chunk = U256::from(5u8);
        config.save_to_file(&path).unwrap();

        let loaded = WalletConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_writes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        let loaded = WalletConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, WalletConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"max_mint_chunk": "0x10", "account": {"mode": "local"}}"#).unwrap();

        let loaded = WalletConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.max_mint_chunk, U256::from(16u8));
        assert_eq!(loaded.account.mode, AccountMode::Local);
        assert_eq!(loaded.rpc_url, WalletConfig::default().rpc_url);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = WalletConfig::default();
        config.rpc_url = "ftp://example.com".into();
        assert!(config.validate().is_err());

        let mut config = WalletConfig::default();
        config.faucet_url = "not-a-url".into();
        assert!(config.validate().is_err());

        let mut config = WalletConfig::default();
        config.max_mint_chunk = U256::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("http://127.0.0.1:5050"));
        assert!(validate_url("https://devnet.example.com/rpc"));
        assert!(!validate_url("ws://127.0.0.1:9480"));
        assert!(!validate_url(""));
    }
}
