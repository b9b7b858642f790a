//! Node process launching and supervision.
//!
//! A [`NodeLauncher`] only describes the command line. [`ForkProcess::spawn`]
//! starts it, forwards its output to the chain's [`ForkLogger`], and hands the
//! child to a supervisor task that owns it until exit. The supervisor records
//! the exit into the shared status map, so status changes keep arriving after
//! setup has returned.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::config::{ChainForkSpec, DEFAULT_CHAIN_ID};
use crate::logger::ForkLogger;
use crate::status::{ChainState, StatusMap};

const LOCALHOST: &str = "127.0.0.1";

/// What to start: a fork of a remote chain, or the plain local development node.
#[derive(Clone, Copy, Debug)]
pub struct LaunchRequest<'a> {
    pub chain: &'a str,
    pub port: u16,
    /// `None` starts an unforked development node.
    pub fork: Option<&'a ChainForkSpec>,
}

/// Interface for building the node command line.
pub trait NodeLauncher: Send + Sync + 'static {
    fn command(&self, request: &LaunchRequest<'_>) -> Command;
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ChainIdOverride {
    Env(&'static str),
    Flag(&'static str),
}

/// Command-line presets for the supported node binaries.
#[derive(Clone, Debug)]
pub struct NodeCommand {
    program: String,
    base_args: Vec<String>,
    host_flag: &'static str,
    fork_flag: &'static str,
    chain_id: ChainIdOverride,
}

impl NodeCommand {
    /// `npx hardhat node --fork <url>`, chain id passed through `HH_CHAIN_ID`.
    pub fn hardhat() -> Self {
        Self {
            program: "npx".to_string(),
            base_args: vec!["hardhat".to_string(), "node".to_string()],
            host_flag: "--hostname",
            fork_flag: "--fork",
            chain_id: ChainIdOverride::Env("HH_CHAIN_ID"),
        }
    }

    /// `anvil --fork-url <url> --chain-id <id>`.
    pub fn anvil() -> Self {
        Self {
            program: "anvil".to_string(),
            base_args: Vec::new(),
            host_flag: "--host",
            fork_flag: "--fork-url",
            chain_id: ChainIdOverride::Flag("--chain-id"),
        }
    }

    /// Overrides the executable, e.g. a pinned binary path.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for NodeCommand {
    fn default() -> Self {
        Self::hardhat()
    }
}

impl NodeLauncher for NodeCommand {
    fn command(&self, request: &LaunchRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(["--port", &request.port.to_string()])
            .args([self.host_flag, LOCALHOST]);

        let chain_id = match request.fork {
            Some(spec) => {
                cmd.args([self.fork_flag, spec.rpc_url.as_str()]);
                if let Some(block) = spec.block_number {
                    cmd.args(["--fork-block-number", &block.to_string()]);
                }
                spec.chain_id
            }
            None => DEFAULT_CHAIN_ID,
        };

        match self.chain_id {
            ChainIdOverride::Env(var) => {
                cmd.env(var, chain_id.to_string());
            }
            ChainIdOverride::Flag(flag) => {
                cmd.args([flag, &chain_id.to_string()]);
            }
        }
        cmd
    }
}

/// How a node process ended. `code` is `None` when it was killed by a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

type KillRequest = oneshot::Sender<io::Result<()>>;

/// Handle to a spawned node. The child itself is owned by its supervisor task.
#[derive(Debug)]
pub struct ForkProcess {
    chain: String,
    pid: Option<u32>,
    killed: AtomicBool,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    kill_tx: mpsc::Sender<KillRequest>,
}

impl ForkProcess {
    /// Spawns `command` and starts supervising it.
    ///
    /// The pid is written into the chain's status entry before the supervisor
    /// starts, so an immediate exit is attributed to the right process.
    pub(crate) fn spawn(
        chain: &str,
        mut command: Command,
        logger: Option<Arc<ForkLogger>>,
        statuses: StatusMap,
    ) -> io::Result<Self> {
        command.stdin(Stdio::null()).kill_on_drop(true);
        // Own process group so termination reaches wrappers like `npx` and their children.
        #[cfg(unix)]
        command.process_group(0);
        if logger.is_some() {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = command.spawn()?;
        let pid = child.id();

        if let Some(logger) = &logger {
            // stderr is chatter from the node, not a failure signal; both go to info.
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_lines(stdout, Arc::clone(logger)));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_lines(stderr, Arc::clone(logger)));
            }
        }

        if let Some(mut entry) = statuses.get_mut(chain) {
            entry.process_id = pid;
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(1);
        tokio::spawn(supervise(
            chain.to_string(),
            pid,
            child,
            logger,
            statuses,
            exit_tx,
            kill_rx,
        ));

        Ok(Self {
            chain: chain.to_string(),
            pid,
            killed: AtomicBool::new(false),
            exit_rx,
            kill_tx,
        })
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// True once a termination signal has been issued.
    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// Waits up to `timeout` for the process to exit. Returns whether it did.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut exit_rx = self.exit_rx.clone();
        // A closed channel means the supervisor is gone along with the child.
        let exited = tokio::time::timeout(timeout, exit_rx.wait_for(Option::is_some))
            .await
            .is_ok();
        exited
    }

    /// Asks the node to shut down (SIGINT) without waiting for it.
    pub fn interrupt(&self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        if self.has_exited() {
            return Ok(());
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            return signal_group(pid, Signal::SIGINT);
        }
        let (reply, _) = oneshot::channel();
        let _ = self.kill_tx.try_send(reply);
        Ok(())
    }

    /// Forcefully terminates the node (SIGKILL).
    pub async fn kill(&self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        if self.has_exited() {
            return Ok(());
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            return signal_group(pid, Signal::SIGKILL);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.kill_tx.send(reply_tx).await.is_err() {
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }

    /// Interrupts the node, waits up to `grace` for it to exit, then kills it.
    ///
    /// An error means the node could not be signalled at all.
    pub async fn terminate(&self, grace: Duration) -> io::Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        self.interrupt()?;
        if self.wait_for_exit(grace).await {
            return Ok(());
        }
        warn!(
            chain = %self.chain,
            grace_ms = grace.as_millis() as u64,
            "node ignored interrupt, force killing"
        );
        self.kill().await
    }
}

async fn forward_lines<R>(reader: R, logger: Arc<ForkLogger>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        logger.info(&line);
    }
}

async fn supervise(
    chain: String,
    pid: Option<u32>,
    mut child: Child,
    logger: Option<Arc<ForkLogger>>,
    statuses: StatusMap,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    mut kill_rx: mpsc::Receiver<KillRequest>,
) {
    let waited = loop {
        tokio::select! {
            waited = child.wait() => break waited,
            Some(reply) = kill_rx.recv() => {
                let _ = reply.send(child.start_kill());
            }
        }
    };

    let code = match waited {
        Ok(status) => {
            let code = status.code();
            let shown = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            if let Some(logger) = &logger {
                logger.info(&format!("Forked process for {chain} exited with code {shown}"));
            }
            debug!(%chain, code = %shown, "node process exited");
            code
        }
        Err(err) => {
            if let Some(logger) = &logger {
                logger.info(&format!("Error in forked process for {chain}: {err}"));
            }
            warn!(%chain, error = %err, "failed waiting on node process");
            None
        }
    };

    if let Some(mut entry) = statuses.get_mut(&chain) {
        // A later setup may have reused the chain name for a new node.
        if entry.process_id == pid {
            entry.status = entry.status.after_exit(code);
        }
    }
    exit_tx.send_replace(Some(ProcessExit { code }));
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    let pgid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match killpg(Pid::from_raw(pgid), signal) {
        // The group is already gone.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}
