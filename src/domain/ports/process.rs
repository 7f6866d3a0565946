//! Process port - interface for launching node processes.

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::domain::models::NodeConfiguration;

/// A readable output pipe of a node process.
pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// Output pipes taken from a freshly spawned process.
#[derive(Default)]
pub struct ProcessOutput {
    pub stdout: Option<OutputReader>,
    pub stderr: Option<OutputReader>,
}

/// A spawned node process, owned exclusively by its supervisor.
///
/// Servers are often started through a launcher script that forks the real
/// server process, so killing must take care of both.
#[async_trait]
pub trait NodeProcess: Send {
    /// OS pid of the spawned launcher, if known.
    fn id(&self) -> Option<u32>;

    /// Takes the output pipes. Subsequent calls return empty output.
    fn take_output(&mut self) -> ProcessOutput;

    /// Force-terminates the launcher and, when known, the inner server
    /// process reported by the node itself.
    async fn kill(&mut self, inner_pid: Option<u32>) -> io::Result<()>;

    /// Best-effort, non-blocking variant of [`NodeProcess::kill`] for use
    /// from `Drop`.
    fn start_kill(&mut self, inner_pid: Option<u32>);

    /// Waits for the launcher to exit and returns its exit code.
    async fn wait(&mut self) -> io::Result<Option<i32>>;
}

/// Launches node processes from their configuration.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, node: &NodeConfiguration) -> io::Result<Box<dyn NodeProcess>>;
}
