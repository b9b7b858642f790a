//! Readiness probing: poll `eth_blockNumber` until a node answers or a deadline passes.

use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::error::{BoxError, ChainManagerError, Result};
use crate::validation::validate_rpc_url;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// A lightweight RPC call that succeeds once a node is serving requests.
#[async_trait]
pub trait NetworkProbe: Send + Sync + 'static {
    async fn block_number(&self, url: &Url) -> Result<u64, BoxError>;
}

/// Production probe backed by an alloy HTTP provider.
#[derive(Clone, Copy, Debug, Default)]
pub struct RpcProbe;

#[async_trait]
impl NetworkProbe for RpcProbe {
    async fn block_number(&self, url: &Url) -> Result<u64, BoxError> {
        let provider = ProviderBuilder::new().connect_http(url.clone());
        Ok(provider.get_block_number().await?)
    }
}

/// Waits until `url` answers a block-number request.
///
/// Malformed URLs fail immediately without any network I/O. Otherwise the
/// probe is retried every `interval` until it succeeds or `timeout` has
/// elapsed, in which case the last probe error is returned as the cause.
pub async fn wait_for_network(
    probe: &dyn NetworkProbe,
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let validation = validate_rpc_url(url);
    if !validation.is_valid() {
        return Err(ChainManagerError::network(
            url,
            format!("Invalid URL: {}", validation.error_summary()),
        ));
    }
    let parsed = Url::parse(url).map_err(|err| ChainManagerError::network(url, err))?;

    let start = Instant::now();
    let mut last_error: Option<BoxError> = None;

    while start.elapsed() < timeout {
        let remaining = timeout.saturating_sub(start.elapsed());
        // An unresponsive host can hold a request open forever; bound each attempt by the deadline.
        match tokio::time::timeout(remaining, probe.block_number(&parsed)).await {
            Ok(Ok(block)) => {
                info!(%url, block, "network is ready");
                return Ok(());
            }
            Ok(Err(err)) => {
                debug!(%url, error = %err, "waiting for network");
                last_error = Some(err);
            }
            Err(elapsed) => {
                last_error = Some(Box::new(elapsed));
                break;
            }
        }
        tokio::time::sleep(interval).await;
    }

    let cause = last_error.unwrap_or_else(|| {
        format!(
            "Network at {url} did not respond within {}ms",
            timeout.as_millis()
        )
        .into()
    });
    Err(ChainManagerError::network(url, cause))
}

/// Non-failing form of [`wait_for_network`].
pub async fn validate_network(
    probe: &dyn NetworkProbe,
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> bool {
    wait_for_network(probe, url, timeout, interval).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAST: Duration = Duration::from_millis(10);

    /// Fails a fixed number of times, then reports block 7.
    struct FlakyProbe {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakyProbe {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NetworkProbe for FlakyProbe {
        async fn block_number(&self, _url: &Url) -> Result<u64, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(7);
            }
            self.failures_left.store(left - 1, Ordering::SeqCst);
            Err("connection refused".into())
        }
    }

    #[tokio::test]
    async fn returns_once_probe_succeeds() {
        let probe = FlakyProbe::new(3);
        wait_for_network(&probe, "http://127.0.0.1:8546", Duration::from_secs(5), FAST)
            .await
            .unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn timeout_wraps_last_probe_error() {
        let probe = FlakyProbe::new(usize::MAX);
        let err = wait_for_network(&probe, "http://127.0.0.1:8546", Duration::from_millis(50), FAST)
            .await
            .unwrap_err();

        match err {
            ChainManagerError::NetworkConnection { url, source, .. } => {
                assert_eq!(url, "http://127.0.0.1:8546");
                assert_eq!(source.to_string(), "connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_url_fails_without_probing() {
        let probe = FlakyProbe::new(0);
        let err = wait_for_network(&probe, "invalid-url", Duration::from_secs(5), FAST)
            .await
            .unwrap_err();

        assert!(matches!(err, ChainManagerError::NetworkConnection { .. }));
        assert!(err.to_string().contains("Invalid URL"));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_timeout_never_probes() {
        let probe = FlakyProbe::new(0);
        let err = wait_for_network(&probe, "http://127.0.0.1:8546", Duration::ZERO, FAST)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("did not respond within 0ms"));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validate_network_reports_false_instead_of_failing() {
        let probe = FlakyProbe::new(usize::MAX);
        assert!(!validate_network(&probe, "", Duration::from_millis(20), FAST).await);
        assert!(!validate_network(&probe, "not-a-url", Duration::from_millis(20), FAST).await);
        assert!(
            !validate_network(&probe, "http://127.0.0.1:8546", Duration::from_millis(20), FAST)
                .await
        );
        assert!(
            validate_network(&FlakyProbe::new(0), "http://127.0.0.1:8546", Duration::from_secs(1), FAST)
                .await
        );
    }

    #[tokio::test]
    async fn rpc_probe_reports_unreachable_node() {
        // Port 1 is privileged and never serves JSON-RPC in a test environment.
        let ok = validate_network(
            &RpcProbe,
            "http://127.0.0.1:1",
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
        .await;
        assert!(!ok);
    }
}
