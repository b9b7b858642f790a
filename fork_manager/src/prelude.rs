//! Minimal prelude for harness code.

pub use crate::config::{load_env_file, ChainConfig, MultiChainConfig};
pub use crate::error::ChainManagerError;
pub use crate::manager::{ChainManager, ChainManagerBuilder};
pub use crate::process::{NodeCommand, NodeLauncher};
pub use crate::provider::{ChainProvider, ProviderRegistry};
pub use crate::status::ChainState;
