//! Error kinds raised by the fork manager.

use thiserror::Error;

/// Boxed cause carried by probe failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = ChainManagerError> = std::result::Result<T, E>;

/// Every failure is traceable to one chain (or one probed URL) and one root cause.
#[derive(Debug, Error)]
pub enum ChainManagerError {
    /// Chain name, RPC URL, port or another configuration field is invalid or missing.
    #[error("Chain '{chain}' configuration error: {issue}")]
    Config { chain: String, issue: String },

    /// A readiness probe did not succeed in time, or the URL was unusable.
    #[error("Failed to connect to network at {url}: {source}")]
    NetworkConnection {
        url: String,
        /// Chain whose readiness was being awaited, when known.
        chain: Option<String>,
        #[source]
        source: BoxError,
    },

    /// A spawned node could not be terminated. Collected during cleanup, never raised.
    #[error("Failed to cleanup process for chain '{chain}': {source}")]
    ProcessCleanup {
        chain: String,
        #[source]
        source: std::io::Error,
    },

    /// The node binary could not be started at all.
    #[error("Failed to spawn node process for chain '{chain}': {source}")]
    Spawn {
        chain: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Provider for network {chain} not found. Ensure the chain is properly configured and running.")]
    ProviderNotFound { chain: String },
}

impl ChainManagerError {
    pub(crate) fn config(chain: impl Into<String>, issue: impl Into<String>) -> Self {
        Self::Config {
            chain: chain.into(),
            issue: issue.into(),
        }
    }

    pub(crate) fn network(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::NetworkConnection {
            url: url.into(),
            chain: None,
            source: source.into(),
        }
    }

    /// Attributes a network error to the chain being set up. Other kinds pass through.
    pub(crate) fn for_chain(self, chain: &str) -> Self {
        match self {
            Self::NetworkConnection { url, source, .. } => Self::NetworkConnection {
                url,
                chain: Some(chain.to_string()),
                source,
            },
            other => other,
        }
    }

    /// Chain the error is attributed to, when it names one.
    pub fn chain(&self) -> Option<&str> {
        match self {
            Self::Config { chain, .. }
            | Self::ProcessCleanup { chain, .. }
            | Self::Spawn { chain, .. }
            | Self::ProviderNotFound { chain } => Some(chain),
            Self::NetworkConnection { chain, .. } => chain.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn config_error_names_chain_and_issue() {
        let err = ChainManagerError::config("testchain", "invalid config");
        let msg = err.to_string();
        assert!(msg.contains("testchain"));
        assert!(msg.contains("invalid config"));
        assert_eq!(err.chain(), Some("testchain"));
    }

    #[test]
    fn network_error_keeps_original_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ChainManagerError::network("http://localhost:8545", cause);
        assert!(err.to_string().contains("http://localhost:8545"));
        assert!(err.to_string().contains("refused"));
        assert_eq!(err.source().unwrap().to_string(), "refused");
        assert_eq!(err.chain(), None);

        let err = err.for_chain("mainnet");
        assert_eq!(err.chain(), Some("mainnet"));
        assert!(err.to_string().contains("http://localhost:8545"));
    }

    #[test]
    fn cleanup_error_names_chain() {
        let err = ChainManagerError::ProcessCleanup {
            chain: "testchain".into(),
            source: std::io::Error::other("no such process"),
        };
        assert!(err.to_string().contains("testchain"));
        assert!(err.source().is_some());
    }
}
