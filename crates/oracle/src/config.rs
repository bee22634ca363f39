//! Oracle configuration (JSON file).
//!
//! Secrets are never stored in the file: the signing key and data-source API keys are read
//! from the environment variables the file names.

use crate::abi::parse_hex_bytes_20;
use crate::dispatcher::{DispatchConfig, ResolverErrorPolicy};
use crate::registration::ProviderInfo;
use crate::registry::{Curve, ResolverRegistry};
use crate::resolver::{StaticResolver, WolframResolver};
use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OracleConfig {
    /// HTTP RPC URL (transactions, eth_call).
    pub http_url: String,
    /// WebSocket RPC URL for the query subscription. Derived from `http_url` when absent.
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Chain id for transaction signing. Read from the node when absent.
    #[serde(default)]
    pub chain_id: Option<u64>,
    pub dispatch_address: String,
    /// Zap Registry contract; only needed by `register`.
    #[serde(default)]
    pub registry_address: Option<String>,
    /// Name of the env var holding the provider's hex private key.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    pub provider: ProviderConfig,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub dispatch: DispatchSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub title: String,
    /// Decimal or 0x-prefixed uint256.
    pub public_key: String,
    /// Endpoint `endpoint_params` apply to. Defaults to the first configured endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub endpoint_params: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default)]
    pub curve: Vec<CurveTerm>,
    pub resolver: ResolverKind,
}

/// Curve term: a JSON integer, or a decimal / 0x string for values beyond u64.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CurveTerm {
    Int(u64),
    Text(String),
}

impl CurveTerm {
    fn to_u256(&self) -> Result<U256> {
        match self {
            CurveTerm::Int(n) => Ok(U256::from(*n)),
            CurveTerm::Text(s) => {
                U256::from_str(s.trim()).map_err(|e| anyhow::anyhow!("curve term '{}': {}", s, e))
            }
        }
    }
}

/// Resolver implementations an endpoint can be bound to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolverKind {
    Wolfram {
        #[serde(default = "default_wolfram_app_id_env")]
        app_id_env: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    Static {
        answer: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    #[serde(default)]
    pub on_resolver_error: ResolverErrorPolicy,
    #[serde(default)]
    pub resolver_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    /// Buffered events between subscription and dispatcher.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            on_resolver_error: ResolverErrorPolicy::default(),
            resolver_timeout_secs: None,
            max_in_flight: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_private_key_env() -> String {
    "ORACLE_PRIVATE_KEY".into()
}

fn default_wolfram_app_id_env() -> String {
    "WOLFRAM_APP_ID".into()
}

fn default_gas_limit() -> u64 {
    300_000
}

fn default_channel_capacity() -> usize {
    256
}

pub fn parse_address(s: &str) -> Result<Address> {
    Ok(Address::from(parse_hex_bytes_20(s.trim())?))
}

impl OracleConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        if config.endpoints.is_empty() {
            anyhow::bail!("no endpoints configured");
        }
        if config.dispatch.max_in_flight == Some(0) {
            anyhow::bail!("dispatch.max_in_flight must be at least 1");
        }
        Ok(config)
    }

    pub fn ws_url(&self) -> String {
        self.ws_url.clone().unwrap_or_else(|| {
            self.http_url
                .replace("http://", "ws://")
                .replace("https://", "wss://")
        })
    }

    pub fn dispatch_address(&self) -> Result<Address> {
        parse_address(&self.dispatch_address).context("dispatch_address")
    }

    pub fn registry_address(&self) -> Result<Address> {
        let s = self
            .registry_address
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("registry_address not configured"))?;
        parse_address(s).context("registry_address")
    }

    pub fn private_key(&self) -> Result<String> {
        std::env::var(&self.private_key_env)
            .with_context(|| format!("env var {} (provider private key) not set", self.private_key_env))
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            on_resolver_error: self.dispatch.on_resolver_error.clone(),
            resolver_timeout: self.dispatch.resolver_timeout_secs.map(Duration::from_secs),
            max_in_flight: self.dispatch.max_in_flight,
        }
    }

    pub fn provider_info(&self) -> Result<ProviderInfo> {
        let public_key = U256::from_str(self.provider.public_key.trim())
            .map_err(|e| anyhow::anyhow!("provider.public_key: {}", e))?;
        let endpoint = match &self.provider.endpoint {
            Some(e) => e.clone(),
            None => self.endpoints[0].name.clone(),
        };
        Ok(ProviderInfo {
            title: self.provider.title.clone(),
            public_key,
            endpoint,
            endpoint_params: self.provider.endpoint_params.clone(),
        })
    }

    /// Build the registry, reading resolver secrets from the process environment.
    pub fn build_registry(&self) -> Result<ResolverRegistry> {
        self.build_registry_with(|name| std::env::var(name).ok())
    }

    /// Build the registry with `env` as the source of resolver secrets.
    pub fn build_registry_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<ResolverRegistry> {
        let mut builder = ResolverRegistry::builder();
        for ep in &self.endpoints {
            let curve = Curve(
                ep.curve
                    .iter()
                    .map(CurveTerm::to_u256)
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("endpoint {}", ep.name))?,
            );
            builder = match &ep.resolver {
                ResolverKind::Wolfram {
                    app_id_env,
                    base_url,
                } => {
                    let app_id = env(app_id_env).ok_or_else(|| {
                        anyhow::anyhow!("endpoint {}: env var {} not set", ep.name, app_id_env)
                    })?;
                    let resolver = WolframResolver::new(app_id, base_url.clone())?;
                    builder.endpoint(ep.name.clone(), resolver, curve)
                }
                ResolverKind::Static { answer } => {
                    builder.endpoint(ep.name.clone(), StaticResolver::new(answer.clone()), curve)
                }
            };
        }
        Ok(builder.build()?)
    }
}
