//! Configuration management for the coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::access::AccessControl;
use crate::limiter::{DefaultLimit, LimitKind, LIMIT_UNIT};
use crate::registry::RegistryConfig;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coordinator: CoordinatorConfig,
    /// Event journal; the coordinator runs without one when absent
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub limits: Vec<LimitConfig>,
    #[serde(default)]
    pub plugs: Vec<PlugEntryConfig>,
    #[serde(default)]
    pub gateway_aliases: Vec<GatewayAliasConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub instance_id: String,
    /// Address timeout ids are scoped to
    pub registry_address: Address,
    /// Address fee withdrawal ids are scoped to
    pub fees_manager_address: Address,
    pub owner: Address,
    pub watcher: Address,
    pub delivery_helper: Address,
    #[serde(default = "default_max_timeout_delay")]
    pub max_timeout_delay_secs: u64,
    /// Delay between a revert and its fee settlement
    #[serde(default = "default_expiry_time")]
    pub expiry_time_secs: u64,
    /// How often due timeouts are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

fn default_max_timeout_delay() -> u64 {
    86_400
}

fn default_expiry_time() -> u64 {
    3_600
}

fn default_sweep_interval() -> u64 {
    1_000
}

fn default_event_capacity() -> usize {
    1_024
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Bearer tokens accepted by `POST /rpc`
    #[serde(default)]
    pub credentials: Vec<ApiCredential>,
}

/// Bearer token and the address its holder acts as
#[derive(Clone, Deserialize)]
pub struct ApiCredential {
    pub address: Address,
    pub token: String,
}

impl std::fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredential")
            .field("address", &self.address)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Shortest bearer token accepted
const MIN_TOKEN_LEN: usize = 16;

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Default bucket for one limit kind, in whole units
#[derive(Debug, Clone, Deserialize)]
pub struct LimitConfig {
    pub kind: LimitKind,
    pub max_limit: u64,
    pub rate_per_second: f64,
}

impl LimitConfig {
    /// Convert to fixed point
    pub fn to_default_limit(&self) -> DefaultLimit {
        DefaultLimit {
            max_limit: (self.max_limit as u128).saturating_mul(LIMIT_UNIT),
            rate_per_second: (self.rate_per_second * LIMIT_UNIT as f64).round() as u128,
        }
    }
}

/// One row of the connection table
#[derive(Debug, Clone, Deserialize)]
pub struct PlugEntryConfig {
    pub chain_slug: u32,
    pub plug: Address,
    pub app_gateway: Address,
    pub switchboard: Address,
}

/// Contract charged to an owning app gateway
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayAliasConfig {
    pub contract: Address,
    pub app_gateway: Address,
}

impl Settings {
    /// Load settings from the file named by `COORDINATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("COORDINATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        Self::parse(&config_str)
    }

    /// Parse and validate a TOML document
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let c = &self.coordinator;
        for (name, address) in [
            ("registry_address", c.registry_address),
            ("fees_manager_address", c.fees_manager_address),
            ("owner", c.owner),
            ("watcher", c.watcher),
            ("delivery_helper", c.delivery_helper),
        ] {
            if address == Address::ZERO {
                anyhow::bail!("coordinator.{} must be set", name);
            }
        }
        if c.registry_address == c.fees_manager_address {
            anyhow::bail!("registry and fees manager addresses must differ");
        }
        if c.sweep_interval_ms == 0 {
            anyhow::bail!("coordinator.sweep_interval_ms must be positive");
        }
        if c.event_channel_capacity == 0 {
            anyhow::bail!("coordinator.event_channel_capacity must be positive");
        }

        for limit in &self.limits {
            if !limit.rate_per_second.is_finite() || limit.rate_per_second < 0.0 {
                anyhow::bail!("Limit {} has an invalid rate", limit.kind);
            }
        }
        for kind in LimitKind::ALL {
            if self.limits.iter().filter(|l| l.kind == kind).count() > 1 {
                anyhow::bail!("Limit {} configured more than once", kind);
            }
        }

        for plug in &self.plugs {
            if plug.chain_slug == 0 {
                anyhow::bail!("Plug {} has a zero chain slug", plug.plug);
            }
            if plug.switchboard == Address::ZERO {
                anyhow::bail!(
                    "Plug {} on chain {} has no switchboard",
                    plug.plug,
                    plug.chain_slug
                );
            }
        }

        let mut tokens = std::collections::HashSet::new();
        for credential in &self.api.credentials {
            if credential.address == Address::ZERO {
                anyhow::bail!("API credential has a zero address");
            }
            if credential.token.len() < MIN_TOKEN_LEN {
                anyhow::bail!(
                    "API credential for {} is shorter than {} characters",
                    credential.address,
                    MIN_TOKEN_LEN
                );
            }
            if !tokens.insert(credential.token.as_str()) {
                anyhow::bail!("API credential for {} reuses a token", credential.address);
            }
        }
        if self.api.credentials.is_empty() {
            tracing::warn!("No API credentials configured - POST /rpc rejects every call");
        }

        if self.limits.is_empty() {
            tracing::warn!("No default limits configured - every action is unsupported until limits are set");
        }

        Ok(())
    }

    pub fn access_control(&self) -> AccessControl {
        AccessControl::new(
            self.coordinator.owner,
            self.coordinator.watcher,
            self.coordinator.delivery_helper,
        )
    }

    /// Registry parameters derived from the coordinator section and limits
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            address: self.coordinator.registry_address,
            fees_address: self.coordinator.fees_manager_address,
            access: self.access_control(),
            max_timeout_delay_secs: self.coordinator.max_timeout_delay_secs,
            expiry_time_secs: self.coordinator.expiry_time_secs,
            default_limits: self
                .limits
                .iter()
                .map(|l| (l.kind, l.to_default_limit()))
                .collect(),
        }
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}
