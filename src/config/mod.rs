use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ledger::Address;
use crate::ledger::retry::{Backoff, RetryPolicy};

/// Engine configuration, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network label, e.g. "fantom" or "arbitrum".
    pub network: String,
    /// JSON-RPC endpoint of the ledger node.
    pub endpoint: String,
    #[serde(default)]
    pub addresses: AddressBook,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Directory holding one JSON batch record per recipe id.
    pub state_dir: PathBuf,
}

/// Per-network contract address table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressBook {
    /// The engine's own on-ledger contract (funds custody, wallet exits).
    pub engine: Address,
    pub router: Address,
    pub factory: Address,
    pub perp_router: Address,
    pub treasury: Address,
    /// Named farm and vault registries, looked up by label.
    pub farms: HashMap<String, Address>,
    pub vaults: HashMap<String, Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub backoff_ms: u64,
    pub backoff: Backoff,
    pub breaker_threshold: usize,
    pub breaker_cooldown_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 500,
            backoff: Backoff::Exponential,
            breaker_threshold: 3,
            breaker_cooldown_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_ms),
            backoff: self.backoff,
            breaker_threshold: self.breaker_threshold,
            breaker_cooldown: Duration::from_millis(self.breaker_cooldown_ms),
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file from {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;
    Ok(config)
}
