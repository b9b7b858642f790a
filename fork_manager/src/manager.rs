//! Multi-chain fork lifecycle: batch setup with rollback, lookups, and cleanup.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{join_all, try_join_all};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{resolve_fork_spec, MultiChainConfig, DEFAULT_CHAIN_ID};
use crate::error::{ChainManagerError, Result};
use crate::logger::ForkLogger;
use crate::network::{self, NetworkProbe, RpcProbe, DEFAULT_NETWORK_TIMEOUT, POLL_INTERVAL};
use crate::process::{ForkProcess, LaunchRequest, NodeCommand, NodeLauncher};
use crate::provider::{ChainProvider, ProviderRegistry};
use crate::status::{set_state, ChainState, ChainStatus, StatusMap};
use crate::validation::{validate_chain_name, validate_port, validate_rpc_url};

pub const DEFAULT_BASE_PORT: u16 = 8546;
pub const DEFAULT_CHAIN: &str = "hardhat";
pub const DEFAULT_CHAIN_PORT: u16 = 8545;

/// Ports and timeouts used by a [`ChainManager`].
#[derive(Clone, Debug)]
pub struct ManagerOptions {
    /// First port handed to a fork. Each fork in a batch takes the next one.
    pub base_port: u16,
    /// Chain name served by the local development node instead of a fork.
    pub default_chain: String,
    pub default_port: u16,
    /// How long to look for an already running development node.
    pub default_probe_timeout: Duration,
    /// How long a freshly started development node gets to come up.
    pub default_startup_timeout: Duration,
    /// A cold fork against a remote RPC can take a while.
    pub fork_ready_timeout: Duration,
    pub poll_interval: Duration,
    /// Time between the interrupt and the force kill during cleanup.
    pub cleanup_grace: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            default_chain: DEFAULT_CHAIN.to_string(),
            default_port: DEFAULT_CHAIN_PORT,
            default_probe_timeout: Duration::from_secs(5),
            default_startup_timeout: Duration::from_secs(30),
            fork_ready_timeout: Duration::from_secs(100),
            poll_interval: POLL_INTERVAL,
            cleanup_grace: Duration::from_secs(5),
        }
    }
}

/// Builder for a [`ChainManager`] with custom ports, timeouts, launcher or probe.
#[derive(Default)]
pub struct ChainManagerBuilder {
    options: ManagerOptions,
    launcher: Option<Arc<dyn NodeLauncher>>,
    probe: Option<Arc<dyn NetworkProbe>>,
}

impl ChainManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every option at once.
    pub fn options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn base_port(mut self, port: u16) -> Self {
        self.options.base_port = port;
        self
    }

    /// Chain name that maps to the local development node and the port it listens on.
    pub fn default_chain(mut self, name: impl Into<String>, port: u16) -> Self {
        self.options.default_chain = name.into();
        self.options.default_port = port;
        self
    }

    pub fn default_probe_timeout(mut self, timeout: Duration) -> Self {
        self.options.default_probe_timeout = timeout;
        self
    }

    pub fn default_startup_timeout(mut self, timeout: Duration) -> Self {
        self.options.default_startup_timeout = timeout;
        self
    }

    pub fn fork_ready_timeout(mut self, timeout: Duration) -> Self {
        self.options.fork_ready_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    pub fn cleanup_grace(mut self, grace: Duration) -> Self {
        self.options.cleanup_grace = grace;
        self
    }

    /// Node command used for forks and the development node. Defaults to [`NodeCommand::hardhat`].
    pub fn launcher(mut self, launcher: impl NodeLauncher) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    /// Readiness probe. Defaults to [`RpcProbe`].
    pub fn probe(mut self, probe: impl NetworkProbe) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn build(self) -> ChainManager {
        let next_port = AtomicU32::new(u32::from(self.options.base_port));
        ChainManager {
            launcher: self
                .launcher
                .unwrap_or_else(|| Arc::new(NodeCommand::default())),
            probe: self.probe.unwrap_or_else(|| Arc::new(RpcProbe)),
            options: self.options,
            providers: ProviderRegistry::default(),
            statuses: StatusMap::default(),
            processes: DashMap::new(),
            retiring: DashMap::new(),
            next_port,
            batch: Mutex::new(()),
        }
    }
}

/// Outcome of [`ChainManager::cleanup`].
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Chains whose node was still tracked when cleanup started.
    pub terminated: Vec<String>,
    /// Nodes that could not be signalled. Cleanup went on regardless.
    pub errors: Vec<ChainManagerError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Owns every node process, status record and provider for one harness run.
///
/// Setup is all-or-nothing: when any chain of a batch fails, every node the
/// batch started is terminated and all state is cleared before the error is
/// returned.
pub struct ChainManager {
    options: ManagerOptions,
    launcher: Arc<dyn NodeLauncher>,
    probe: Arc<dyn NetworkProbe>,
    providers: ProviderRegistry,
    statuses: StatusMap,
    processes: DashMap<String, ForkProcess>,
    // Nodes of failed chains, already interrupted. Drained by the batch teardown.
    retiring: DashMap<String, ForkProcess>,
    next_port: AtomicU32,
    // Serializes batch setup against cleanup.
    batch: Mutex<()>,
}

impl Default for ChainManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainManager {
    pub fn new() -> Self {
        ChainManagerBuilder::new().build()
    }

    pub fn builder() -> ChainManagerBuilder {
        ChainManagerBuilder::new()
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Starts (or attaches to) a node for every chain in `chains` and waits until all answer.
    ///
    /// Returns the live registry unchanged while a previous batch is still up.
    /// Every name is validated before anything is spawned.
    pub async fn setup_chains<S: AsRef<str>>(
        &self,
        chains: &[S],
        config: &MultiChainConfig,
        logs_dir: Option<&Path>,
    ) -> Result<ProviderRegistry> {
        let _batch = self.batch.lock().await;

        if !self.providers.is_empty() {
            debug!(chains = self.providers.len(), "chains already set up");
            return Ok(Arc::clone(&self.providers));
        }
        if chains.is_empty() {
            return Ok(ProviderRegistry::default());
        }

        let mut seen = HashSet::with_capacity(chains.len());
        for chain in chains.iter().map(AsRef::as_ref) {
            let validation = validate_chain_name(chain);
            if !validation.is_valid() {
                return Err(ChainManagerError::config(chain, validation.error_summary()));
            }
            for warning in &validation.warnings {
                warn!(%chain, "{warning}");
            }
            if !seen.insert(chain) {
                return Err(ChainManagerError::config(
                    chain,
                    "Chain listed more than once in the same setup",
                ));
            }
        }

        // Ports are fixed in batch order before any chain starts its async work.
        let ports: Vec<Option<u32>> = chains
            .iter()
            .map(|chain| {
                (chain.as_ref() != self.options.default_chain)
                    .then(|| self.next_port.fetch_add(1, Ordering::SeqCst))
            })
            .collect();

        let setups = chains
            .iter()
            .zip(ports)
            .map(|(chain, port)| self.setup_chain(chain.as_ref(), port, config, logs_dir));

        if let Err(err) = try_join_all(setups).await {
            error!(
                chain = err.chain().unwrap_or("-"),
                error = %err,
                "chain setup failed, tearing down batch"
            );
            self.cleanup_inner().await;
            return Err(err);
        }

        info!(chains = self.providers.len(), "all chains ready");
        Ok(Arc::clone(&self.providers))
    }

    async fn setup_chain(
        &self,
        chain: &str,
        port: Option<u32>,
        config: &MultiChainConfig,
        logs_dir: Option<&Path>,
    ) -> Result<()> {
        let logger = logs_dir.and_then(|dir| match ForkLogger::create(chain, dir) {
            Ok(logger) => Some(Arc::new(logger)),
            Err(err) => {
                warn!(%chain, dir = %dir.display(), error = %err, "could not create fork log file");
                None
            }
        });

        let result = match port {
            Some(port) => self.setup_fork(chain, port, config, logger).await,
            None => self.setup_default_chain(chain, logger).await,
        };
        if result.is_err() {
            self.rollback_chain(chain);
        }
        result
    }

    async fn setup_fork(
        &self,
        chain: &str,
        port: u32,
        config: &MultiChainConfig,
        logger: Option<Arc<ForkLogger>>,
    ) -> Result<()> {
        let validation = validate_port(port);
        if !validation.is_valid() {
            return Err(ChainManagerError::config(
                chain,
                format!("Port validation failed: {}", validation.error_summary()),
            ));
        }
        for warning in &validation.warnings {
            warn!(%chain, port, "{warning}");
        }
        let port = u16::try_from(port)
            .map_err(|err| ChainManagerError::config(chain, format!("Port validation failed: {err}")))?;

        let spec = resolve_fork_spec(chain, config)?;
        let validation = validate_rpc_url(&spec.rpc_url);
        if !validation.is_valid() {
            return Err(ChainManagerError::config(
                chain,
                format!("RPC URL validation failed: {}", validation.error_summary()),
            ));
        }

        info!(%chain, port, block = ?spec.block_number, "forking chain");
        let mut status = ChainStatus::new(chain, spec.rpc_url.as_str());
        status.port = Some(port);
        status.chain_id = Some(spec.chain_id);
        status.block_number = spec.block_number;
        self.statuses.insert(chain.to_string(), status);

        self.spawn_node(
            &LaunchRequest {
                chain,
                port,
                fork: Some(&spec),
            },
            logger,
        )?;

        let url = local_url(port);
        self.await_ready(chain, &url, self.options.fork_ready_timeout)
            .await?;
        self.register(chain, &url)
    }

    async fn setup_default_chain(
        &self,
        chain: &str,
        logger: Option<Arc<ForkLogger>>,
    ) -> Result<()> {
        let port = self.options.default_port;
        let url = local_url(port);
        info!(%chain, %url, "setting up development node provider");

        let mut status = ChainStatus::new(chain, url.as_str());
        status.port = Some(port);
        status.chain_id = Some(DEFAULT_CHAIN_ID);
        self.statuses.insert(chain.to_string(), status);

        if self
            .probe_until(&url, self.options.default_probe_timeout)
            .await
            .is_ok()
        {
            info!(%chain, %url, "development node already running");
        } else {
            info!(%chain, %url, "starting development node");
            self.spawn_node(
                &LaunchRequest {
                    chain,
                    port,
                    fork: None,
                },
                logger,
            )?;
            self.await_ready(chain, &url, self.options.default_startup_timeout)
                .await?;
            info!(%chain, %url, "development node started");
        }
        self.register(chain, &url)
    }

    // No await between spawn and insert: a batch teardown must always see the process.
    fn spawn_node(&self, request: &LaunchRequest<'_>, logger: Option<Arc<ForkLogger>>) -> Result<()> {
        let command = self.launcher.command(request);
        let process = ForkProcess::spawn(request.chain, command, logger, Arc::clone(&self.statuses))
            .map_err(|source| ChainManagerError::Spawn {
                chain: request.chain.to_string(),
                source,
            })?;
        debug!(chain = %request.chain, pid = ?process.id(), "node process spawned");
        self.processes.insert(request.chain.to_string(), process);
        Ok(())
    }

    async fn await_ready(&self, chain: &str, url: &str, timeout: Duration) -> Result<()> {
        self.probe_until(url, timeout).await.map_err(|err| {
            set_state(&self.statuses, chain, ChainState::Error);
            warn!(%chain, error = %err, "network validation failed");
            err.for_chain(chain)
        })
    }

    async fn probe_until(&self, url: &str, timeout: Duration) -> Result<()> {
        network::wait_for_network(&*self.probe, url, timeout, self.options.poll_interval).await
    }

    fn register(&self, chain: &str, url: &str) -> Result<()> {
        let parsed = Url::parse(url).map_err(|err| ChainManagerError::network(url, err))?;
        set_state(&self.statuses, chain, ChainState::Running);
        self.providers
            .insert(chain.to_string(), ChainProvider::connect(parsed));
        info!(%chain, %url, "provider registered");
        Ok(())
    }

    /// Undoes one chain's partial setup.
    ///
    /// The node is interrupted right away and parked in `retiring`. The batch
    /// teardown in the caller waits for it to exit before returning.
    fn rollback_chain(&self, chain: &str) {
        if let Some((chain, process)) = self.processes.remove(chain) {
            if let Err(err) = process.interrupt() {
                warn!(%chain, error = %err, "failed to interrupt node after setup failure");
            }
            self.retiring.insert(chain, process);
        }
        set_state(&self.statuses, chain, ChainState::Error);
    }

    /// Returns `None` for empty, malformed or unregistered names.
    pub fn get_provider(&self, chain: &str) -> Option<ChainProvider> {
        if chain.is_empty() {
            return None;
        }
        let validation = validate_chain_name(chain);
        if !validation.is_valid() {
            warn!(%chain, "invalid chain name: {}", validation.error_summary());
            return None;
        }
        self.providers.get(chain).map(|entry| entry.value().clone())
    }

    /// Like [`get_provider`](Self::get_provider), but a missing provider is an error.
    pub fn require_provider(&self, chain: &str) -> Result<ChainProvider> {
        self.get_provider(chain)
            .ok_or_else(|| ChainManagerError::ProviderNotFound {
                chain: chain.to_string(),
            })
    }

    /// The live registry. Entries added here are visible to every other holder.
    pub fn get_providers(&self) -> ProviderRegistry {
        Arc::clone(&self.providers)
    }

    pub fn get_chain_status(&self, chain: &str) -> ChainState {
        self.statuses
            .get(chain)
            .map(|entry| entry.status)
            .unwrap_or_default()
    }

    pub fn get_chain_status_details(&self, chain: &str) -> Option<ChainStatus> {
        self.statuses.get(chain).map(|entry| entry.value().clone())
    }

    /// Snapshot of every status record, ordered by chain name.
    pub fn get_all_chain_statuses(&self) -> BTreeMap<String, ChainStatus> {
        self.statuses
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Chains with a tracked node process, sorted.
    pub fn active_processes(&self) -> Vec<String> {
        let mut chains: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        chains.sort();
        chains
    }

    /// Waits for `url` with this manager's probe. `None` uses the 30 second default.
    pub async fn wait_for_network(&self, url: &str, timeout: Option<Duration>) -> Result<()> {
        self.probe_until(url, timeout.unwrap_or(DEFAULT_NETWORK_TIMEOUT))
            .await
    }

    pub async fn validate_network(&self, url: &str, timeout: Option<Duration>) -> bool {
        self.wait_for_network(url, timeout).await.is_ok()
    }

    /// Terminates every tracked node and clears all state. Never fails and is safe to repeat.
    pub async fn cleanup(&self) -> CleanupReport {
        let _batch = self.batch.lock().await;
        self.cleanup_inner().await
    }

    async fn cleanup_inner(&self) -> CleanupReport {
        let mut tracked = drain(&self.processes);
        tracked.extend(drain(&self.retiring));

        let grace = self.options.cleanup_grace;
        let outcomes = join_all(tracked.iter().map(|(chain, process)| async move {
            debug!(%chain, pid = ?process.id(), "stopping node");
            (chain, process.terminate(grace).await)
        }))
        .await;

        let mut report = CleanupReport::default();
        for (chain, outcome) in outcomes {
            report.terminated.push(chain.clone());
            if let Err(source) = outcome {
                report.errors.push(ChainManagerError::ProcessCleanup {
                    chain: chain.clone(),
                    source,
                });
            }
        }
        report.terminated.sort();

        self.providers.clear();
        self.statuses.clear();
        self.next_port
            .store(u32::from(self.options.base_port), Ordering::SeqCst);

        if report.is_clean() {
            info!(terminated = report.terminated.len(), "cleanup complete");
        } else {
            for err in &report.errors {
                warn!(error = %err, "cleanup error");
            }
            warn!(
                errors = report.errors.len(),
                "cleanup completed with errors"
            );
        }
        report
    }
}

fn drain(processes: &DashMap<String, ForkProcess>) -> Vec<(String, ForkProcess)> {
    let chains: Vec<String> = processes.iter().map(|e| e.key().clone()).collect();
    chains
        .into_iter()
        .filter_map(|chain| processes.remove(&chain))
        .collect()
}

fn local_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}
