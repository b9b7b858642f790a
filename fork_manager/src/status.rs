//! Per-chain status records.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainState {
    #[default]
    Unknown,
    Running,
    Stopped,
    Error,
}

impl ChainState {
    /// State after the node process exits. Only a clean exit of a running fork counts as stopped.
    pub fn after_exit(self, exit_code: Option<i32>) -> Self {
        match (self, exit_code) {
            (Self::Running, Some(0)) => Self::Stopped,
            (Self::Stopped, _) => Self::Stopped,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub name: String,
    pub status: ChainState,
    pub rpc_url: String,
    pub port: Option<u16>,
    pub chain_id: Option<u64>,
    pub block_number: Option<u64>,
    pub process_id: Option<u32>,
}

impl ChainStatus {
    pub fn new(name: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ChainState::Unknown,
            rpc_url: rpc_url.into(),
            port: None,
            chain_id: None,
            block_number: None,
            process_id: None,
        }
    }
}

/// Chain name to status, shared with the process supervisors that record exits.
pub type StatusMap = Arc<DashMap<String, ChainStatus>>;

/// Sets the state of an existing entry. Entries removed by cleanup are not recreated.
pub(crate) fn set_state(statuses: &StatusMap, chain: &str, state: ChainState) {
    if let Some(mut entry) = statuses.get_mut(chain) {
        entry.status = state;
    }
}
