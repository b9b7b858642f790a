//! Chain fork configuration: typed overrides, file loading, and per-chain resolution.
//!
//! Each field of a chain's fork spec is resolved independently: an explicit
//! entry in [`MultiChainConfig`] wins, then an environment variable derived
//! from the upper-cased chain name, then a default.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ChainManagerError, Result};

pub const DEFAULT_CHAIN_ID: u64 = 31337;

const RPC_SUFFIX: &str = "_RPC";
const CHAIN_ID_SUFFIX: &str = "_MOCK_CHAIN_ID";
const BLOCK_SUFFIX: &str = "_BLOCK";

/// Per-chain overrides. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: Option<String>,
    pub chain_id: Option<u64>,
    /// Values `<= 0` are treated as "no pinned height".
    pub block_number: Option<i64>,
    /// Accepted for compatibility but never used: fork ports are always allocated by the manager.
    pub port: Option<u16>,
}

impl ChainConfig {
    pub fn with_rpc_url(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: Some(rpc_url.into()),
            ..Self::default()
        }
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn block_number(mut self, block_number: i64) -> Self {
        self.block_number = Some(block_number);
        self
    }
}

/// The `[chains.<name>]` table handed to the manager.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiChainConfig {
    pub chains: BTreeMap<String, ChainConfig>,
}

impl MultiChainConfig {
    /// Loads the chain table from a TOML, JSON or YAML file.
    ///
    /// A missing file is not an error and yields an empty table, leaving
    /// resolution to the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(&path.as_ref().to_string_lossy()).required(false))
            .build()?
            .try_deserialize()
    }

    pub fn add_chain(mut self, name: impl Into<String>, chain: ChainConfig) -> Self {
        self.chains.insert(name.into(), chain);
        self
    }

    /// Looks up a chain table by name. Falls back to a case-insensitive match,
    /// since file sources come back with lowercased keys.
    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.get(name).or_else(|| {
            self.chains
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, chain)| chain)
        })
    }
}

/// Resolved configuration for one chain in one setup batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainForkSpec {
    pub rpc_url: String,
    pub chain_id: u64,
    /// `None` forks at the latest block, which defeats the node's fork cache.
    pub block_number: Option<u64>,
}

/// Loads a `.env` file from the working directory or its parents, if one exists.
pub fn load_env_file() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "loaded environment file");
            Some(path)
        }
        Err(_) => None,
    }
}

/// Resolves the fork spec for `chain`, failing when no RPC URL can be found
/// or an environment value does not parse.
pub fn resolve_fork_spec(chain: &str, config: &MultiChainConfig) -> Result<ChainForkSpec> {
    let overrides = config.chain(chain);
    let prefix = chain.to_uppercase();

    let rpc_key = format!("{prefix}{RPC_SUFFIX}");
    let rpc_url = overrides
        .and_then(|c| c.rpc_url.clone())
        .filter(|url| !url.trim().is_empty())
        .or_else(|| env_value(&rpc_key))
        .ok_or_else(|| {
            ChainManagerError::config(
                chain,
                format!("Missing required rpcUrl for {chain} or {rpc_key} in .env file."),
            )
        })?;

    let chain_id = match overrides.and_then(|c| c.chain_id) {
        Some(id) => id,
        None => {
            let key = format!("{prefix}{CHAIN_ID_SUFFIX}");
            match env_value(&key) {
                Some(raw) => parse_env(chain, &key, &raw)?,
                None => DEFAULT_CHAIN_ID,
            }
        }
    };

    let block_number = match overrides.and_then(|c| c.block_number) {
        Some(n) => Some(n),
        None => {
            let key = format!("{prefix}{BLOCK_SUFFIX}");
            env_value(&key)
                .map(|raw| parse_env::<i64>(chain, &key, &raw))
                .transpose()?
        }
    }
    .and_then(|n| u64::try_from(n).ok())
    .filter(|n| *n > 0);

    if block_number.is_none() {
        info!(
            chain,
            "no fork block number configured; forking latest block without cache"
        );
    }
    if let Some(port) = overrides.and_then(|c| c.port) {
        debug!(chain, port, "ignoring configured port, fork ports are allocated");
    }

    Ok(ChainForkSpec {
        rpc_url,
        chain_id,
        block_number,
    })
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(chain: &str, key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|err| {
        ChainManagerError::config(
            chain,
            format!("Configuration parsing failed: {key}={raw:?}: {err}"),
        )
    })
}
