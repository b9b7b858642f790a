//! Provider handles for running forks.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use dashmap::DashMap;
use url::Url;

/// JSON-RPC client bound to one fork endpoint. Cheap to clone.
#[derive(Clone)]
pub struct ChainProvider {
    url: Url,
    inner: DynProvider,
}

impl ChainProvider {
    /// Builds an HTTP provider. No request is made until the provider is used.
    pub fn connect(url: Url) -> Self {
        let inner = ProviderBuilder::new().connect_http(url.clone()).erased();
        Self { url, inner }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Deref for ChainProvider {
    type Target = DynProvider;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl fmt::Debug for ChainProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainProvider")
            .field("url", &self.url.as_str())
            .finish()
    }
}

/// Live chain-name to provider registry. Clones share the same map.
pub type ProviderRegistry = Arc<DashMap<String, ChainProvider>>;
