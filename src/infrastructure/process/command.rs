//! Spawning node processes with `tokio::process`.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::signal::terminate_pid;
use crate::domain::models::NodeConfiguration;
use crate::domain::ports::{NodeProcess, OutputReader, ProcessOutput, ProcessSpawner};

/// Launches each node's [`LaunchCommand`](crate::domain::models::LaunchCommand)
/// as a child process with piped output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSpawner;

impl CommandSpawner {
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for CommandSpawner {
    fn spawn(&self, node: &NodeConfiguration) -> io::Result<Box<dyn NodeProcess>> {
        let launch = &node.launch;
        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        debug!(
            node = %node.name,
            program = %launch.program.display(),
            pid = ?child.id(),
            "spawned node process"
        );
        Ok(Box::new(ChildProcess::new(node.name.clone(), child)))
    }
}

/// A node process backed by a [`tokio::process::Child`].
#[derive(Debug)]
pub struct ChildProcess {
    node: String,
    pid: Option<u32>,
    child: Child,
}

impl ChildProcess {
    pub fn new(node: String, child: Child) -> Self {
        Self {
            pid: child.id(),
            node,
            child,
        }
    }

    fn kill_inner(&self, inner_pid: Option<u32>) -> io::Result<()> {
        match inner_pid {
            Some(pid) if Some(pid) != self.pid => {
                debug!(node = %self.node, pid, "killing server process");
                terminate_pid(pid)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl NodeProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn take_output(&mut self) -> ProcessOutput {
        ProcessOutput {
            stdout: self
                .child
                .stdout
                .take()
                .map(|s| Box::new(s) as OutputReader),
            stderr: self
                .child
                .stderr
                .take()
                .map(|s| Box::new(s) as OutputReader),
        }
    }

    async fn kill(&mut self, inner_pid: Option<u32>) -> io::Result<()> {
        let inner = self.kill_inner(inner_pid);

        // Killing a reaped child is an error in tokio; an exited launcher is fine.
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        inner
    }

    fn start_kill(&mut self, inner_pid: Option<u32>) {
        if let Err(e) = self.kill_inner(inner_pid) {
            warn!(node = %self.node, error = %e, "failed to kill server process");
        }
        if matches!(self.child.try_wait(), Ok(None)) {
            if let Err(e) = self.child.start_kill() {
                warn!(node = %self.node, error = %e, "failed to kill launcher process");
            }
        }
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::models::LaunchCommand;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn shell_node(script: &str) -> NodeConfiguration {
        let mut node = NodeConfiguration::standalone("sh-node", None);
        let mut launch = LaunchCommand::new("sh");
        launch.args = vec!["-c".to_string(), script.to_string()];
        launch.env.insert("GREETING".to_string(), "hello".to_string());
        node.launch = launch;
        node
    }

    #[tokio::test]
    async fn test_spawn_pipes_output_and_env() {
        let mut process = CommandSpawner::new()
            .spawn(&shell_node("echo \"$GREETING\"; echo oops >&2"))
            .expect("spawn");
        assert!(process.id().is_some());

        let output = process.take_output();
        let mut stdout = BufReader::new(output.stdout.expect("stdout")).lines();
        let mut stderr = BufReader::new(output.stderr.expect("stderr")).lines();
        assert_eq!(stdout.next_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(stderr.next_line().await.unwrap().as_deref(), Some("oops"));

        assert_eq!(process.wait().await.unwrap(), Some(0));
        assert!(process.take_output().stdout.is_none());
    }

    #[tokio::test]
    async fn test_kill_after_exit_is_ok() {
        let mut process = CommandSpawner::new()
            .spawn(&shell_node("exit 3"))
            .expect("spawn");
        assert_eq!(process.wait().await.unwrap(), Some(3));
        process.kill(None).await.expect("kill of exited process");
    }

    #[tokio::test]
    async fn test_kill_running_process() {
        let mut process = CommandSpawner::new()
            .spawn(&shell_node("sleep 30"))
            .expect("spawn");
        process.kill(None).await.expect("kill");
        assert_eq!(process.wait().await.unwrap(), None);
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let mut node = NodeConfiguration::standalone("ghost", None);
        node.launch = LaunchCommand::new("/definitely/not/here/opensearch");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let err = CommandSpawner::new().spawn(&node).err().expect("spawn error");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
