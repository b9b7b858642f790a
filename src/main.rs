//! Multifork: starts a local fork per chain, runs a command against them, and tears them down.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};

use fork_manager::prelude::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Node {
    #[default]
    Hardhat,
    Anvil,
}

impl Node {
    fn command(self) -> NodeCommand {
        match self {
            Node::Hardhat => NodeCommand::hardhat(),
            Node::Anvil => NodeCommand::anvil(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "multifork", version, about = "Run tests against several forked chains at once")]
struct Cli {
    /// Comma-separated chain names, e.g. `mainnet,base,hardhat`.
    #[arg(long, value_delimiter = ',')]
    chains: Vec<String>,

    /// Directory for per-chain node logs.
    #[arg(long)]
    logs: Option<PathBuf>,

    /// Chain table (TOML, JSON or YAML). A missing file is fine.
    #[arg(long, default_value = "multifork.toml")]
    config: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    node: Node,

    #[arg(long, value_enum, default_value_t)]
    log_level: logging::LogLevel,

    #[arg(long, value_enum, default_value_t)]
    log_format: logging::LogFormat,

    /// Print chain statuses as JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Command to run once every chain is up. Without one, forks stay up until Ctrl-C.
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env_file = load_env_file();
    let _guard = logging::init(cli.log_level, cli.log_format);
    if let Some(path) = env_file {
        debug!(path = %path.display(), "loaded environment file");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = MultiChainConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let manager = ChainManager::builder().launcher(cli.node.command()).build();

    let outcome = session(&manager, &cli, &config).await;

    let cleanup = manager.cleanup().await;
    if !cleanup.is_clean() {
        warn!(errors = cleanup.errors.len(), "some nodes could not be stopped");
    }
    outcome
}

async fn session(
    manager: &ChainManager,
    cli: &Cli,
    config: &MultiChainConfig,
) -> anyhow::Result<ExitCode> {
    if !cli.chains.is_empty() {
        info!(chains = ?cli.chains, "setting up chains");
    }
    manager
        .setup_chains(cli.chains.as_slice(), config, cli.logs.as_deref())
        .await?;
    print_statuses(manager, cli.json)?;

    if cli.command.is_empty() {
        info!("forks are up, press Ctrl-C to stop");
        shutdown_signal().await?;
        return Ok(ExitCode::SUCCESS);
    }
    run_command(manager, &cli.command).await
}

fn print_statuses(manager: &ChainManager, json: bool) -> anyhow::Result<()> {
    let statuses = manager.get_all_chain_statuses();
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }
    for status in statuses.values() {
        let pid = status
            .process_id
            .map_or_else(|| "-".to_string(), |pid| pid.to_string());
        let port = status
            .port
            .map_or_else(|| "-".to_string(), |port| port.to_string());
        println!(
            "{:<20} {:<8} port {:<6} pid {:<8} {}",
            status.name, status.status, port, pid, status.rpc_url
        );
    }
    Ok(())
}

/// `MULTIFORK_<NAME>_RPC_URL`, with `-` mapped to `_`.
fn rpc_env_var(chain: &str) -> String {
    format!("MULTIFORK_{}_RPC_URL", chain.to_uppercase().replace('-', "_"))
}

async fn run_command(manager: &ChainManager, argv: &[String]) -> anyhow::Result<ExitCode> {
    let (program, args) = argv.split_first().context("empty command")?;
    let mut command = tokio::process::Command::new(program);
    command.args(args).kill_on_drop(true);
    for entry in manager.get_providers().iter() {
        command.env(rpc_env_var(entry.key()), entry.value().url().as_str());
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start `{program}`"))?;

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            info!(%status, "command finished");
            let code = status.code().and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
            Ok(ExitCode::from(code))
        }
        signal = shutdown_signal() => {
            signal?;
            warn!("interrupted, stopping command");
            child.kill().await?;
            Ok(ExitCode::from(130))
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<ChainManagerError>() {
        Some(err @ ChainManagerError::Config { .. }) => {
            eprintln!("Configuration error: {err}");
            eprintln!(
                "Check the [chains] table in your config file and the <NAME>_RPC entries in .env."
            );
        }
        Some(err @ ChainManagerError::NetworkConnection { .. }) => {
            eprintln!("Network connection error: {err}");
            eprintln!("Check that the upstream RPC endpoints are reachable and not rate limited.");
        }
        Some(err @ ChainManagerError::Spawn { .. }) => {
            eprintln!("{err}");
            eprintln!("Is the node binary installed? Try --node anvil or --node hardhat.");
        }
        _ => eprintln!("Error: {err:#}"),
    }
}
