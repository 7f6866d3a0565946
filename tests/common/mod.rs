//! Common test utilities for integration tests
//!
//! Provides a scripted, in-memory process spawner so cluster lifecycles can be
//! exercised without a real server installation.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use ephemeral_cluster::domain::models::NodeConfiguration;
use ephemeral_cluster::domain::ports::{NodeProcess, ProcessOutput, ProcessSpawner};

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for a condition to be true with timeout
///
/// Polls the predicate every 20ms until it returns true or timeout is reached.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    false
}

pub fn version_line(node: &str, pid: u32) -> String {
    format!(
        "[2024-01-01T00:00:00,000][INFO ][o.o.n.Node               ] [{node}] version[2.11.0], pid[{pid}], build[tar/4dcad6d/2023-10-13T02:55:55Z], OS[Linux/6.1/amd64]"
    )
}

pub fn port_line(node: &str, port: u16) -> String {
    format!(
        "[2024-01-01T00:00:01,000][INFO ][o.o.h.AbstractHttpServerTransport] [{node}] publish_address {{127.0.0.1:{port}}}, bound_addresses {{127.0.0.1:{port}}}, {{[::1]:{port}}}"
    )
}

pub fn started_line(node: &str) -> String {
    format!("[2024-01-01T00:00:02,000][INFO ][o.o.n.Node               ] [{node}] started")
}

pub fn peers_line(node: &str) -> String {
    format!(
        "[2024-01-01T00:00:02,000][WARN ][o.o.c.c.ClusterFormationFailureHelper] [{node}] not enough master nodes discovered during pinging (found [[]], but needed [2])"
    )
}

/// How a scripted node behaves once spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Announces version, its desired port, then `started`
    Healthy,
    /// Announces `port` instead of its desired one, then `started`
    BindsPort(u16),
    /// Confirms `started` without ever announcing a port
    NoPort,
    /// Never prints anything
    Silent,
    /// Prints its version, a stack trace on stderr, then exits with `code`
    Crashes(i32),
    /// Prints exactly these lines and keeps running
    Lines(Vec<String>),
    /// Writes these bytes to stdout verbatim and keeps running
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct NodeScript {
    pub behavior: Behavior,
    pub fail_spawn: bool,
    pub fail_kill: bool,
}

impl NodeScript {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            fail_spawn: false,
            fail_kill: false,
        }
    }

    pub fn failing_kill(mut self) -> Self {
        self.fail_kill = true;
        self
    }

    pub fn failing_spawn(mut self) -> Self {
        self.fail_spawn = true;
        self
    }

    fn output(&self, node: &NodeConfiguration, pid: u32) -> (Vec<u8>, Vec<u8>, bool, i32) {
        if let Behavior::Bytes(bytes) = &self.behavior {
            return (bytes.clone(), vec![], true, 0);
        }
        let (stdout, stderr, keep_running, code) = self.lines(node, pid);
        (joined(&stdout), joined(&stderr), keep_running, code)
    }

    fn lines(&self, node: &NodeConfiguration, pid: u32) -> (Vec<String>, Vec<String>, bool, i32) {
        let name = node.name.as_str();
        let port = node.desired_port.unwrap_or(9200);
        match &self.behavior {
            Behavior::Healthy => (
                vec![version_line(name, pid), port_line(name, port), started_line(name)],
                vec![],
                true,
                0,
            ),
            Behavior::BindsPort(other) => (
                vec![version_line(name, pid), port_line(name, *other), started_line(name)],
                vec![],
                true,
                0,
            ),
            Behavior::NoPort => (
                vec![version_line(name, pid), started_line(name)],
                vec![],
                true,
                0,
            ),
            Behavior::Silent => (vec![], vec![], true, 0),
            Behavior::Crashes(code) => (
                vec![version_line(name, pid)],
                vec![
                    "Exception in thread \"main\" java.lang.IllegalStateException: failed".to_string(),
                    "Caused by: java.net.BindException: Address already in use".to_string(),
                    "\tat org.opensearch.bootstrap.Bootstrap.init(Bootstrap.java:1)".to_string(),
                ],
                false,
                *code,
            ),
            Behavior::Lines(lines) => (lines.clone(), vec![], true, 0),
            Behavior::Bytes(_) => (vec![], vec![], true, 0),
        }
    }
}

fn joined(lines: &[String]) -> Vec<u8> {
    lines
        .iter()
        .flat_map(|line| format!("{line}\n").into_bytes())
        .collect()
}

/// A [`ProcessSpawner`] that plays back [`NodeScript`]s and records what
/// happened to each process.
#[derive(Clone)]
pub struct ScriptedSpawner {
    default: NodeScript,
    scripts: Arc<Mutex<HashMap<String, NodeScript>>>,
    events: Arc<Mutex<Vec<String>>>,
    next_pid: Arc<AtomicU32>,
}

impl ScriptedSpawner {
    pub fn new(default: Behavior) -> Self {
        Self {
            default: NodeScript::new(default),
            scripts: Arc::new(Mutex::new(HashMap::new())),
            events: Arc::new(Mutex::new(Vec::new())),
            next_pid: Arc::new(AtomicU32::new(40_000)),
        }
    }

    pub fn healthy() -> Self {
        Self::new(Behavior::Healthy)
    }

    pub fn script(self, node: &str, script: NodeScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(node.to_string(), script);
        self
    }

    pub fn behave(self, node: &str, behavior: Behavior) -> Self {
        self.script(node, NodeScript::new(behavior))
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events that start with `prefix`, e.g. `"kill "`.
    pub fn events_of(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    fn script_for(&self, node: &str) -> NodeScript {
        self.scripts
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(&self, node: &NodeConfiguration) -> io::Result<Box<dyn NodeProcess>> {
        let script = self.script_for(&node.name);
        self.events.lock().unwrap().push(format!("spawn {}", node.name));
        if script.fail_spawn {
            return Err(io::Error::new(io::ErrorKind::NotFound, "launch binary missing"));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (stdout_tx, stdout_rx) = tokio::io::duplex(64 * 1024);
        let (stderr_tx, stderr_rx) = tokio::io::duplex(64 * 1024);
        let killed = CancellationToken::new();
        let exited = CancellationToken::new();

        let (stdout, stderr, keep_running, code) = script.output(node, pid);
        tokio::spawn(play(
            stdout,
            stderr,
            keep_running,
            stdout_tx,
            stderr_tx,
            killed.clone(),
            exited.clone(),
        ));

        Ok(Box::new(ScriptedProcess {
            node: node.name.clone(),
            pid,
            code,
            fail_kill: script.fail_kill,
            output: Some(ProcessOutput {
                stdout: Some(Box::new(stdout_rx)),
                stderr: Some(Box::new(stderr_rx)),
            }),
            killed,
            exited,
            events: Arc::clone(&self.events),
        }))
    }
}

async fn play(
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    keep_running: bool,
    mut stdout_tx: DuplexStream,
    mut stderr_tx: DuplexStream,
    killed: CancellationToken,
    exited: CancellationToken,
) {
    let _ = stdout_tx.write_all(&stdout).await;
    let _ = stderr_tx.write_all(&stderr).await;
    if keep_running {
        killed.cancelled().await;
    }
    drop(stdout_tx);
    drop(stderr_tx);
    exited.cancel();
}

struct ScriptedProcess {
    node: String,
    pid: u32,
    code: i32,
    fail_kill: bool,
    output: Option<ProcessOutput>,
    killed: CancellationToken,
    exited: CancellationToken,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NodeProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn take_output(&mut self) -> ProcessOutput {
        self.output.take().unwrap_or_default()
    }

    async fn kill(&mut self, inner_pid: Option<u32>) -> io::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("kill {} inner={inner_pid:?}", self.node));
        self.killed.cancel();
        if self.fail_kill {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "kill refused"));
        }
        Ok(())
    }

    fn start_kill(&mut self, _inner_pid: Option<u32>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start_kill {}", self.node));
        self.killed.cancel();
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        self.exited.cancelled().await;
        if self.killed.is_cancelled() {
            Ok(None)
        } else {
            Ok(Some(self.code))
        }
    }
}
