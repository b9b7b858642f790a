//! Multi-chain fork manager: runs one local node per named chain, waits for each
//! to serve JSON-RPC, and hands out providers.
//!
//! Library root: validation, config resolution, probing, process supervision,
//! and the [`ChainManager`] that ties them together.

pub mod config;
pub mod error;
pub mod logger;
pub mod manager;
pub mod network;
pub mod process;
pub mod provider;
pub mod status;
pub mod validation;

pub mod prelude;

pub use config::{ChainConfig, ChainForkSpec, MultiChainConfig};
pub use error::{ChainManagerError, Result};
pub use manager::{ChainManager, ChainManagerBuilder, CleanupReport, ManagerOptions};
pub use network::{NetworkProbe, RpcProbe};
pub use process::{LaunchRequest, NodeCommand, NodeLauncher};
pub use provider::{ChainProvider, ProviderRegistry};
pub use status::{ChainState, ChainStatus};
