//! Dual relay configuration
//!
//! Read from environment variables, optionally preloaded from a `.env` file.
//! Signing keys are validated here so that a bad key fails startup instead
//! of the first composition.

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use crate::composer::{GasParams, SigningCredential};
use crate::dev::{deposit_block_factory, TriggerSchedule};
use crate::relay::{DevTrigger, RelayConfig};
use crate::types::MonitoredContract;

/// Settings of one side of the bridge
#[derive(Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint; optional in dev mode
    #[serde(default)]
    pub rpc_url: Option<String>,
    pub chain_id: u64,
    pub private_key: String,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    pub monitored_contract_address: String,
    /// Match contract on the local chain
    pub local_exchange_address: String,
    /// Local account whose nonce stamps events; defaults to the local signer
    #[serde(default)]
    pub dual_state_address: Option<String>,
    /// Receiver of release transactions; defaults to the external signer
    #[serde(default)]
    pub release_receiver_address: Option<String>,
    #[serde(default = "default_match_ratio")]
    pub match_ratio: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_price")]
    pub gas_price_wei: u128,
    #[serde(default = "default_head_poll_interval")]
    pub head_poll_interval_ms: u64,
    #[serde(default)]
    pub light_node: bool,
}

/// Dev mode block generation
#[derive(Debug, Clone, Deserialize)]
pub struct DevConfig {
    pub trigger_intervals_ms: Vec<u64>,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default = "default_deposit_value")]
    pub deposit_value: u64,
    #[serde(default)]
    pub deposit_receiver: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_http")]
    pub http: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            http: default_metrics_http(),
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub relay: RelaySettings,
    pub local: ChainConfig,
    pub external: ChainConfig,
    /// Present when `DEV_TRIGGER_INTERVALS_MS` is set
    #[serde(default)]
    pub dev: Option<DevConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Default functions
fn default_match_ratio() -> u64 {
    1
}

fn default_gas_limit() -> u64 {
    GasParams::default().gas_limit
}

fn default_gas_price() -> u128 {
    GasParams::default().gas_price
}

fn default_head_poll_interval() -> u64 {
    1000
}

fn default_deposit_value() -> u64 {
    500
}

fn default_metrics_http() -> String {
    "127.0.0.1".to_string()
}

fn default_metrics_port() -> u16 {
    6000
}

fn default_local_chain_id() -> u64 {
    24
}

fn default_external_chain_id() -> u64 {
    1
}

/// Parse an optional variable, failing on a malformed value
fn parse_var<T>(vars: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("{} is invalid: {}", name, e)),
        _ => Ok(None),
    }
}

fn required_var(vars: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    vars(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| eyre!("{} environment variable is required", name))
}

/// Parse a comma-separated millisecond list
pub fn parse_intervals(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .wrap_err_with(|| format!("Invalid trigger interval: {}", s))
        })
        .collect()
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    Address::from_str(value.trim()).wrap_err_with(|| format!("{} is not a valid address", field))
}

impl Config {
    /// Load configuration from environment variables
    /// Loads the .env file named by DUAL_RELAY_ENV_FILE (default `.env`) if present
    pub fn load() -> Result<Self> {
        let path = env::var("DUAL_RELAY_ENV_FILE").unwrap_or_else(|_| ".env".to_string());
        Self::load_from_file(&path)
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
            tracing::debug!("Loaded .env from {}", path);
        }
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build the configuration from a variable lookup
    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let relay = RelaySettings {
            monitored_contract_address: required_var(&vars, "MONITORED_CONTRACT_ADDRESS")?,
            local_exchange_address: required_var(&vars, "LOCAL_EXCHANGE_ADDRESS")?,
            dual_state_address: vars("DUAL_STATE_ADDRESS"),
            release_receiver_address: vars("RELEASE_RECEIVER_ADDRESS"),
            match_ratio: parse_var(&vars, "MATCH_RATIO")?.unwrap_or(default_match_ratio()),
            gas_limit: parse_var(&vars, "GAS_LIMIT")?.unwrap_or(default_gas_limit()),
            gas_price_wei: parse_var(&vars, "GAS_PRICE_WEI")?.unwrap_or(default_gas_price()),
            head_poll_interval_ms: parse_var(&vars, "HEAD_POLL_INTERVAL_MS")?
                .unwrap_or(default_head_poll_interval()),
            light_node: parse_var(&vars, "LIGHT_NODE")?.unwrap_or(false),
        };

        let local = ChainConfig {
            rpc_url: vars("LOCAL_RPC_URL").filter(|v| !v.trim().is_empty()),
            chain_id: parse_var(&vars, "LOCAL_CHAIN_ID")?.unwrap_or(default_local_chain_id()),
            private_key: required_var(&vars, "LOCAL_PRIVATE_KEY")?,
        };

        let external = ChainConfig {
            rpc_url: vars("EXTERNAL_RPC_URL").filter(|v| !v.trim().is_empty()),
            chain_id: parse_var(&vars, "EXTERNAL_CHAIN_ID")?
                .unwrap_or(default_external_chain_id()),
            private_key: required_var(&vars, "EXTERNAL_PRIVATE_KEY")?,
        };

        let dev = match vars("DEV_TRIGGER_INTERVALS_MS") {
            Some(raw) => Some(DevConfig {
                trigger_intervals_ms: parse_intervals(&raw)?,
                repeat: parse_var(&vars, "DEV_TRIGGER_REPEAT")?.unwrap_or(false),
                deposit_value: parse_var(&vars, "DEV_DEPOSIT_VALUE")?
                    .unwrap_or(default_deposit_value()),
                deposit_receiver: vars("DEV_DEPOSIT_RECEIVER").unwrap_or_default(),
            }),
            None => None,
        };

        let metrics = MetricsConfig {
            enabled: parse_var(&vars, "METRICS_ENABLED")?.unwrap_or(false),
            http: vars("METRICS_HTTP").unwrap_or_else(default_metrics_http),
            port: parse_var(&vars, "METRICS_PORT")?.unwrap_or(default_metrics_port()),
        };

        let config = Config {
            relay,
            local,
            external,
            dev,
            metrics,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_dev_mode(&self) -> bool {
        self.dev.is_some()
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        parse_address(
            "MONITORED_CONTRACT_ADDRESS",
            &self.relay.monitored_contract_address,
        )?;
        parse_address("LOCAL_EXCHANGE_ADDRESS", &self.relay.local_exchange_address)?;
        if let Some(addr) = &self.relay.dual_state_address {
            parse_address("DUAL_STATE_ADDRESS", addr)?;
        }
        if let Some(addr) = &self.relay.release_receiver_address {
            parse_address("RELEASE_RECEIVER_ADDRESS", addr)?;
        }

        // Unparsable keys must fail the start sequence
        self.local_credential()?;
        self.external_credential()?;

        if self.relay.match_ratio == 0 {
            return Err(eyre!("MATCH_RATIO must be at least 1"));
        }
        if self.relay.head_poll_interval_ms == 0 {
            return Err(eyre!("HEAD_POLL_INTERVAL_MS must be positive"));
        }

        match &self.dev {
            Some(dev) => {
                if dev.trigger_intervals_ms.is_empty() {
                    return Err(eyre!("DEV_TRIGGER_INTERVALS_MS cannot be empty"));
                }
                if dev.repeat && dev.trigger_intervals_ms.iter().all(|ms| *ms == 0) {
                    return Err(eyre!(
                        "A repeating DEV_TRIGGER_INTERVALS_MS needs a non-zero interval"
                    ));
                }
            }
            None => {
                if self.local.rpc_url.is_none() {
                    return Err(eyre!("LOCAL_RPC_URL is required outside dev mode"));
                }
                if self.external.rpc_url.is_none() {
                    return Err(eyre!("EXTERNAL_RPC_URL is required outside dev mode"));
                }
            }
        }

        Ok(())
    }

    pub fn local_credential(&self) -> Result<SigningCredential> {
        self.local
            .private_key
            .parse()
            .wrap_err("LOCAL_PRIVATE_KEY is not a valid signing key")
    }

    pub fn external_credential(&self) -> Result<SigningCredential> {
        self.external
            .private_key
            .parse()
            .wrap_err("EXTERNAL_PRIVATE_KEY is not a valid signing key")
    }

    pub fn monitored_contract(&self) -> Result<MonitoredContract> {
        parse_address(
            "MONITORED_CONTRACT_ADDRESS",
            &self.relay.monitored_contract_address,
        )
        .map(MonitoredContract::new)
    }

    pub fn local_exchange(&self) -> Result<Address> {
        parse_address("LOCAL_EXCHANGE_ADDRESS", &self.relay.local_exchange_address)
    }

    pub fn gas(&self) -> GasParams {
        GasParams {
            gas_limit: self.relay.gas_limit,
            gas_price: self.relay.gas_price_wei,
        }
    }

    pub fn head_poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay.head_poll_interval_ms)
    }

    /// Relay settings with defaults resolved against the signer addresses
    pub fn relay_config(&self) -> Result<RelayConfig> {
        let dual_state_address = match &self.relay.dual_state_address {
            Some(addr) => parse_address("DUAL_STATE_ADDRESS", addr)?,
            None => self.local_credential()?.address(),
        };
        let release_receiver = match &self.relay.release_receiver_address {
            Some(addr) => parse_address("RELEASE_RECEIVER_ADDRESS", addr)?,
            None => self.external_credential()?.address(),
        };
        let dev_trigger = self.dev.as_ref().map(|dev| DevTrigger {
            schedule: TriggerSchedule::from_millis(&dev.trigger_intervals_ms, dev.repeat),
            factory: deposit_block_factory(
                U256::from(dev.deposit_value),
                dev.deposit_receiver.clone(),
            ),
        });

        Ok(RelayConfig {
            monitored: self.monitored_contract()?,
            dual_state_address,
            match_ratio: self.relay.match_ratio,
            release_receiver,
            light_node: self.relay.light_node,
            dev_trigger,
        })
    }
}
