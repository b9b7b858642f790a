//! Per-chain log files for forked node output.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

/// Write-only sink for one fork's output, at `<dir>/<chain>-node.log`.
///
/// The file is truncated on creation. Writes go through a background worker
/// that is flushed when the logger is dropped.
pub struct ForkLogger {
    path: PathBuf,
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl ForkLogger {
    pub fn create(chain: &str, dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{chain}-node.log"));
        let file = File::create(&path)?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        Ok(Self {
            path,
            writer,
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, message: &str) {
        let line = format!(
            "[{}] [info] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message.trim_end()
        );
        // The worker queue only fails once it has shut down; fork output is best effort.
        let _ = self.writer.clone().write_all(line.as_bytes());
    }
}

impl std::fmt::Debug for ForkLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkLogger").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_info_lines_to_chain_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ForkLogger::create("mainnet", dir.path()).unwrap();
        assert_eq!(logger.path(), dir.path().join("mainnet-node.log"));

        logger.info("Started HTTP and WebSocket JSON-RPC server\n");
        logger.info("eth_blockNumber");
        drop(logger);

        let contents = fs::read_to_string(dir.path().join("mainnet-node.log")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[info] Started HTTP and WebSocket JSON-RPC server"));
        assert!(lines[1].ends_with("[info] eth_blockNumber"));
    }

    #[test]
    fn truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base-node.log");
        fs::write(&path, "stale output from an earlier run\n").unwrap();

        drop(ForkLogger::create("base", dir.path()).unwrap());

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn creates_missing_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("forks");

        let logger = ForkLogger::create("polygon", &nested).unwrap();

        assert!(logger.path().starts_with(&nested));
        assert!(nested.is_dir());
    }
}
