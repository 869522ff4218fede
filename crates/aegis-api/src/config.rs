//! Server configuration
//!
//! Settings come from config files (`config/default`, `config/local`),
//! environment variables with the `AEGIS` prefix (`__` separator) and a
//! `.env` file. The agent private key is the one setting without a
//! default: every credit-contract write is signed with it.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use aegis_types::{Address, Amount};

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AegisConfig {
    #[serde(default)]
    pub server: ServerSettings,

    /// Ledger gateway and on-ledger collaborator addresses
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub clearing: ClearingSettings,

    #[serde(default)]
    pub facilitator: FacilitatorSettings,
}

/// HTTP binding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("invalid socket address")
    }
}

/// Gateway endpoint and contract addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// JSON-RPC gateway URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Agent signing key for all credit-contract writes (required)
    pub private_key: String,

    /// Clearinghouse agent address on the value ledger
    pub agent_address: Address,

    pub credit_manager_address: Address,

    pub asset_address: Address,

    /// Network tag carried in payment requirements
    #[serde(default = "default_network")]
    pub network: String,

    /// Recovery lower bound
    #[serde(default)]
    pub start_block: u64,
}

/// Clearing-core behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingSettings {
    #[serde(default = "default_min_stake")]
    pub min_stake_amount: Amount,

    #[serde(default = "default_slash_bond")]
    pub slash_bond_amount: Amount,

    #[serde(default = "default_deadline_seconds")]
    pub default_deadline_seconds: u64,

    /// Chain watcher poll period (Δ)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Fallback reputation factor when no oracle is configured
    #[serde(default = "default_rep_factor_permille")]
    pub rep_factor_permille: u32,

    /// Reputation oracle base URL (fixed factor when absent)
    #[serde(default)]
    pub reputation_url: Option<String>,
}

impl Default for ClearingSettings {
    fn default() -> Self {
        Self {
            min_stake_amount: default_min_stake(),
            slash_bond_amount: default_slash_bond(),
            default_deadline_seconds: default_deadline_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            rep_factor_permille: default_rep_factor_permille(),
            reputation_url: None,
        }
    }
}

impl ClearingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Facilitator endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitatorSettings {
    #[serde(default = "default_facilitator_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for FacilitatorSettings {
    fn default() -> Self {
        Self {
            url: default_facilitator_url(),
            api_key: None,
        }
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4020
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_network() -> String {
    "base-sepolia".to_string()
}

fn default_min_stake() -> Amount {
    Amount::new(100_000)
}

fn default_slash_bond() -> Amount {
    Amount::new(1_000)
}

fn default_deadline_seconds() -> u64 {
    3_600
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_sweep_interval_seconds() -> u64 {
    30
}

fn default_rep_factor_permille() -> u32 {
    1_000
}

fn default_facilitator_url() -> String {
    "https://x402.org/facilitator".to_string()
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl AegisConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("AEGIS")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_input() {
        let json = serde_json::json!({
            "ledger": {
                "private_key": "0xkey",
                "agent_address": "0xAgent",
                "credit_manager_address": "0xcm",
                "asset_address": "0xasset",
            }
        });
        let config: AegisConfig = serde_json::from_value(json).unwrap();

        assert_eq!(config.server.port, 4020);
        assert_eq!(config.clearing.default_deadline_seconds, 3_600);
        assert_eq!(config.clearing.poll_interval(), Duration::from_millis(15_000));
        // Addresses are canonicalized on the way in
        assert_eq!(config.ledger.agent_address.as_str(), "0xagent");
    }

    #[test]
    fn test_missing_private_key_is_an_error() {
        let json = serde_json::json!({
            "ledger": {
                "agent_address": "0xagent",
                "credit_manager_address": "0xcm",
                "asset_address": "0xasset",
            }
        });
        assert!(serde_json::from_value::<AegisConfig>(json).is_err());
    }
}
