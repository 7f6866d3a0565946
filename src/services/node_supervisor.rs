//! Node process supervisor
//!
//! Owns one node process. A background drain task pumps the process output
//! through the log classifier, keeps the node's [`NodeRuntimeState`] current
//! and fires a one-shot [`Readiness`] signal the first time the node is
//! either started or known to have failed. Callers block only in
//! [`NodeSupervisor::wait_for_started`].
//!
//! Output is read as raw bytes and decoded lossily, so a stray non-UTF-8
//! byte never ends the relay. Relayed lines are offered to the console sink
//! without waiting: a full sink drops lines rather than stalling readiness.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{NodeError, NodeResult};
use crate::domain::models::{
    ClassifiedLine, ConsoleLine, NodeConfiguration, NodeRuntimeState, NodeStatus, Readiness,
};
use crate::domain::ports::{NodeProcess, OutputReader, ProcessOutput, ProcessSpawner};
use crate::services::log_classifier::{
    classify, extract_port, extract_version_and_pid, is_peer_discovery_diagnostic,
};

/// How long to wait for an exit code after the output closed early.
const EXIT_CODE_GRACE: Duration = Duration::from_secs(2);

/// Result of feeding one line to [`classify_and_advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Nothing decisive yet
    Continue,
    /// The node just became started
    Started,
    /// The node can never become started
    Failed(NodeError),
}

/// Advances a not-yet-started node's state by one classified output line.
///
/// - version/pid announcements are captured once
/// - a port announcement that contradicts the desired port fails the node
///   before any started confirmation can be honoured
/// - a started confirmation (or, when the node allows it, the peer-discovery
///   diagnostic) requires a port to have been observed already
/// - a node that already carries an error never becomes started
pub fn classify_and_advance(
    state: &mut NodeRuntimeState,
    node: &NodeConfiguration,
    line: &ClassifiedLine,
) -> Advance {
    if state.started() || state.last_error.is_some() {
        return Advance::Continue;
    }
    let Some(record) = line.record() else {
        return Advance::Continue;
    };

    if state.version.is_none() {
        if let Some(info) = extract_version_and_pid(&record.section, &record.message) {
            state.version = Some(info.version);
            state.process_id = Some(info.pid);
            state.build = info.build;
        }
    }

    if let Some(port) = extract_port(&record.section, &record.message) {
        if state.port.is_none() {
            state.port = Some(port);
        }
        if let Some(desired) = node.desired_port {
            if desired != port {
                return Advance::Failed(NodeError::ConfigurationMismatch {
                    node: node.name.clone(),
                    desired,
                    observed: port,
                });
            }
        }
    }

    let assumed_started =
        node.assume_started_on_not_enough_peers && is_peer_discovery_diagnostic(&record.message);
    if record.is_started_confirmation || assumed_started {
        if state.port.is_none() {
            return Advance::Failed(NodeError::MissingPortSignal {
                node: node.name.clone(),
            });
        }
        if assumed_started && !record.is_started_confirmation {
            debug!(node = %node.name, "assuming node started on peer discovery diagnostic");
        }
        state.mark_started();
        return Advance::Started;
    }

    Advance::Continue
}

/// Keeps a node's output relay alive. Dropping or disposing it cancels the
/// background reads.
#[derive(Debug)]
pub struct NodeSubscription {
    cancel: CancellationToken,
}

impl NodeSubscription {
    pub fn dispose(self) {
        self.cancel.cancel();
    }
}

impl Drop for NodeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Supervises one node process.
pub struct NodeSupervisor {
    config: Arc<NodeConfiguration>,
    spawner: Arc<dyn ProcessSpawner>,
    relay_after_started: bool,
    state: Arc<watch::Sender<NodeRuntimeState>>,
    process: Mutex<Option<Box<dyn NodeProcess>>>,
    readiness: Mutex<Option<oneshot::Receiver<Readiness>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    /// Cancelled before a kill takes the process lock; exit waiters yield it.
    terminating: CancellationToken,
    /// Cancelled once that kill was attempted.
    terminated: CancellationToken,
    launcher_pid: AtomicU32,
    subscribed: AtomicBool,
    disposed: AtomicBool,
}

impl NodeSupervisor {
    pub fn new(config: NodeConfiguration, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let (state, _) = watch::channel(NodeRuntimeState::default());
        Self {
            config: Arc::new(config),
            spawner,
            relay_after_started: false,
            state: Arc::new(state),
            process: Mutex::new(None),
            readiness: Mutex::new(None),
            drain: Mutex::new(None),
            cancel: CancellationToken::new(),
            terminating: CancellationToken::new(),
            terminated: CancellationToken::new(),
            launcher_pid: AtomicU32::new(0),
            subscribed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Keep relaying output to the sink after the node started.
    #[must_use]
    pub fn with_relay_after_started(mut self, relay: bool) -> Self {
        self.relay_after_started = relay;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn configuration(&self) -> &NodeConfiguration {
        &self.config
    }

    /// Port the node reported binding.
    pub fn port(&self) -> Option<u16> {
        self.state.borrow().port
    }

    pub fn version(&self) -> Option<String> {
        self.state.borrow().version.clone()
    }

    /// Pid of the server process as reported by the node.
    pub fn process_id(&self) -> Option<u32> {
        self.state.borrow().process_id
    }

    /// Pid of the process we spawned.
    pub fn launcher_pid(&self) -> Option<u32> {
        match self.launcher_pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn started(&self) -> bool {
        self.state.borrow().started()
    }

    pub fn last_error(&self) -> Option<NodeError> {
        self.state.borrow().last_error.clone()
    }

    pub fn runtime_state(&self) -> NodeRuntimeState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<NodeRuntimeState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> NodeStatus {
        let state = self.state.borrow();
        NodeStatus {
            name: self.config.name.clone(),
            desired_port: self.config.desired_port,
            port: state.port,
            version: state.version.clone(),
            process_id: state.process_id,
            launcher_pid: self.launcher_pid(),
            started: state.started(),
            last_error: state.last_error.as_ref().map(ToString::to_string),
        }
    }

    /// Spawns the node process and starts draining its output.
    ///
    /// Every line goes to `sink` while the node is starting; after that only
    /// when relaying after start was requested.
    #[instrument(skip(self, sink), fields(node = %self.config.name))]
    pub async fn subscribe(&self, sink: Option<mpsc::Sender<ConsoleLine>>) -> NodeResult<()> {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return Err(NodeError::AlreadySubscribed {
                node: self.config.name.clone(),
            });
        }

        let mut process = self.spawner.spawn(&self.config).map_err(|e| {
            let err = NodeError::Spawn {
                node: self.config.name.clone(),
                message: e.to_string(),
            };
            self.state
                .send_modify(|s| s.last_error = Some(err.clone()));
            err
        })?;

        if let Some(pid) = process.id() {
            self.launcher_pid.store(pid, Ordering::Release);
        }
        info!(
            launcher_pid = ?process.id(),
            desired_port = ?self.config.desired_port,
            "node process spawned"
        );

        let output = process.take_output();
        let (ready_tx, ready_rx) = oneshot::channel();
        let drain = Drain {
            node: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            sink,
            relay_after_started: self.relay_after_started,
            cancel: self.cancel.clone(),
            dropped: 0,
        };

        *self.process.lock().await = Some(process);
        *self.readiness.lock().await = Some(ready_rx);
        *self.drain.lock().await = Some(tokio::spawn(drain.run(output, ready_tx)));
        Ok(())
    }

    /// Waits up to `timeout` for the node's readiness signal.
    ///
    /// On timeout or failure the node's processes are killed before the
    /// error is returned.
    #[instrument(skip(self), fields(node = %self.config.name))]
    pub async fn wait_for_started(&self, timeout: Duration) -> NodeResult<NodeSubscription> {
        let receiver = self.readiness.lock().await.take();
        let Some(receiver) = receiver else {
            if self.started() {
                return Ok(self.subscription());
            }
            return Err(self.last_error().unwrap_or_else(|| NodeError::NotSubscribed {
                node: self.config.name.clone(),
            }));
        };

        let readiness = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(readiness)) => readiness,
            Ok(Err(_)) => Readiness::Failed(self.last_error().unwrap_or_else(|| {
                NodeError::OutputStream {
                    node: self.config.name.clone(),
                    message: "output relay ended without a readiness signal".to_string(),
                }
            })),
            Err(_) => Readiness::TimedOut,
        };

        match readiness {
            Readiness::Started => {
                info!(port = ?self.port(), version = ?self.version(), "node started");
                Ok(self.subscription())
            }
            Readiness::TimedOut => {
                let err = NodeError::StartupTimeout {
                    node: self.config.name.clone(),
                    timeout,
                };
                self.cancel.cancel();
                // Decided under the state lock: a started line classified
                // concurrently either wins here or is refused afterwards.
                let mut started = false;
                self.state.send_modify(|s| {
                    started = s.started();
                    if !started && s.last_error.is_none() {
                        s.last_error = Some(err.clone());
                    }
                });
                if started {
                    info!(port = ?self.port(), "node started as the wait timed out");
                    return Ok(self.subscription());
                }
                warn!(?timeout, "node did not report started in time");
                self.kill_logged().await;
                Err(err)
            }
            Readiness::Failed(err) => {
                let err = self.with_exit_code(err).await;
                warn!(error = %err, "node failed to start");
                self.kill_logged().await;
                Err(err)
            }
        }
    }

    /// Spawns the node and waits for it to start.
    pub async fn start(
        &self,
        timeout: Duration,
        sink: Option<mpsc::Sender<ConsoleLine>>,
    ) -> NodeResult<NodeSubscription> {
        self.subscribe(sink).await?;
        self.wait_for_started(timeout).await
    }

    /// Stops the output relay and force-terminates the node.
    #[instrument(skip(self), fields(node = %self.config.name))]
    pub async fn dispose(&self) -> NodeResult<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        let result = self.kill_processes().await;

        if let Some(drain) = self.drain.lock().await.take() {
            drain.abort();
        }

        result.map_err(|e| NodeError::Terminate {
            node: self.config.name.clone(),
            message: e.to_string(),
        })?;
        debug!("node disposed");
        Ok(())
    }

    /// Waits up to `timeout` for the spawned process to exit.
    ///
    /// Returns `true` when it exited (or was never spawned). A concurrent
    /// [`NodeSupervisor::dispose`] is not held up by the wait.
    pub async fn wait_for_exit(&self, timeout: Duration) -> NodeResult<bool> {
        match tokio::time::timeout(timeout, self.reap()).await {
            Ok(Ok(code)) => {
                debug!(node = %self.config.name, ?code, "node process exited");
                Ok(true)
            }
            Ok(Err(e)) => Err(NodeError::Terminate {
                node: self.config.name.clone(),
                message: e.to_string(),
            }),
            Err(_) => Ok(false),
        }
    }

    /// The last `lines` lines of the node's on-disk log, if it has one.
    pub async fn log_tail(&self, lines: usize) -> Option<String> {
        let contents = tokio::fs::read_to_string(self.config.log_file()).await.ok()?;
        let all: Vec<&str> = contents.lines().collect();
        let tail = all[all.len().saturating_sub(lines)..].join("\n");
        Some(tail).filter(|t| !t.trim().is_empty())
    }

    fn subscription(&self) -> NodeSubscription {
        NodeSubscription {
            cancel: self.cancel.clone(),
        }
    }

    async fn kill_processes(&self) -> io::Result<()> {
        self.terminating.cancel();
        let inner_pid = self.process_id();
        let result = match self.process.lock().await.as_mut() {
            Some(process) => process.kill(inner_pid).await,
            None => Ok(()),
        };
        self.terminated.cancel();
        result
    }

    async fn kill_logged(&self) {
        if let Err(e) = self.kill_processes().await {
            warn!(node = %self.config.name, error = %e, "failed to kill node processes");
        }
    }

    /// Waits for the spawned process to exit; `Ok(None)` when none was spawned.
    ///
    /// The process lock is released as soon as a kill begins and retaken
    /// once the kill was attempted.
    async fn reap(&self) -> io::Result<Option<Option<i32>>> {
        loop {
            if self.terminating.is_cancelled() {
                self.terminated.cancelled().await;
            }
            let mut guard = self.process.lock().await;
            let Some(process) = guard.as_mut() else {
                return Ok(None);
            };
            let yield_on_kill = !self.terminating.is_cancelled();
            tokio::select! {
                result = process.wait() => return result.map(Some),
                () = self.terminating.cancelled(), if yield_on_kill => {}
            }
        }
    }

    async fn with_exit_code(&self, err: NodeError) -> NodeError {
        let NodeError::ExitedBeforeStarted { node, code: None } = err else {
            return err;
        };
        let code = tokio::time::timeout(EXIT_CODE_GRACE, self.reap())
            .await
            .ok()
            .and_then(Result::ok)
            .flatten()
            .flatten();
        let err = NodeError::ExitedBeforeStarted { node, code };
        self.state.send_modify(|s| s.last_error = Some(err.clone()));
        err
    }
}

impl Drop for NodeSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let inner_pid = self.process_id();
        if let Some(process) = self.process.get_mut().as_mut() {
            process.start_kill(inner_pid);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainPhase {
    Starting,
    Started,
    Failed,
}

/// Background reader of one node's output.
struct Drain {
    node: Arc<NodeConfiguration>,
    state: Arc<watch::Sender<NodeRuntimeState>>,
    sink: Option<mpsc::Sender<ConsoleLine>>,
    relay_after_started: bool,
    cancel: CancellationToken,
    dropped: u64,
}

impl Drain {
    async fn run(mut self, output: ProcessOutput, ready_tx: oneshot::Sender<Readiness>) {
        let mut stdout = BufReader::new(output.stdout.unwrap_or_else(empty_reader));
        let mut stderr = BufReader::new(output.stderr.unwrap_or_else(empty_reader));
        // Partial lines survive a select that picked the other stream.
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut stream_error: Option<String> = None;
        let mut ready_tx = Some(ready_tx);
        let mut phase = DrainPhase::Starting;

        loop {
            let (line, is_error) = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => match next {
                    Ok(0) => { stdout_open = false; continue; }
                    Ok(_) => (take_line(&mut stdout_buf), false),
                    Err(e) => { stream_error = Some(e.to_string()); stdout_open = false; continue; }
                },
                next = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => match next {
                    Ok(0) => { stderr_open = false; continue; }
                    Ok(_) => (take_line(&mut stderr_buf), true),
                    Err(e) => { stream_error = Some(e.to_string()); stderr_open = false; continue; }
                },
                else => break,
            };

            let classified = classify(&line);
            let relay_line = phase != DrainPhase::Started || self.relay_after_started;

            if phase == DrainPhase::Starting {
                let mut advance = Advance::Continue;
                self.state
                    .send_modify(|s| advance = classify_and_advance(s, &self.node, &classified));
                match advance {
                    Advance::Continue => {}
                    Advance::Started => {
                        phase = DrainPhase::Started;
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Readiness::Started);
                        }
                    }
                    Advance::Failed(err) => {
                        phase = DrainPhase::Failed;
                        self.fail(&mut ready_tx, err);
                    }
                }
            }

            if relay_line {
                self.relay(line, classified, is_error);
            }

            if phase == DrainPhase::Started && !(self.relay_after_started && self.sink.is_some()) {
                debug!(node = %self.node.name, "node started, releasing output pipes");
                break;
            }
        }

        if phase == DrainPhase::Starting && !self.cancel.is_cancelled() {
            let err = stream_error.map_or_else(
                || NodeError::ExitedBeforeStarted {
                    node: self.node.name.clone(),
                    code: None,
                },
                |message| NodeError::OutputStream {
                    node: self.node.name.clone(),
                    message,
                },
            );
            self.fail(&mut ready_tx, err);
        }
    }

    fn fail(&self, ready_tx: &mut Option<oneshot::Sender<Readiness>>, err: NodeError) {
        debug!(node = %self.node.name, error = %err, "node failure observed");
        self.state.send_modify(|s| {
            if s.last_error.is_none() {
                s.last_error = Some(err.clone());
            }
        });
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Readiness::Failed(err));
        }
    }

    fn relay(&mut self, raw: String, classified: ClassifiedLine, is_error: bool) {
        let Some(sink) = &self.sink else {
            return;
        };
        let line = ConsoleLine {
            node: self.node.name.clone(),
            raw,
            classified,
            is_error,
        };
        match sink.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    debug!(node = %self.node.name, dropped = self.dropped, "console sink full, dropping output");
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(node = %self.node.name, "console sink closed");
                self.sink = None;
            }
        }
    }
}

/// Decodes and clears one buffered line, replacing invalid UTF-8.
fn take_line(buf: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    buf.clear();
    line
}

fn empty_reader() -> OutputReader {
    Box::new(tokio::io::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(desired_port: Option<u16>) -> NodeConfiguration {
        NodeConfiguration::standalone("node-1", desired_port)
    }

    fn feed(state: &mut NodeRuntimeState, node: &NodeConfiguration, line: &str) -> Advance {
        classify_and_advance(state, node, &classify(line))
    }

    const VERSION: &str = "[2024-01-01T00:00:00,000][INFO ][o.o.n.Node] [node-1] version[2.11.0], pid[4242], build[tar/abc/2023], OS[Linux]";
    const PORT: &str = "[2024-01-01T00:00:01,000][INFO ][o.o.h.AbstractHttpServerTransport] [node-1] publish_address {127.0.0.1:9200}, bound_addresses {127.0.0.1:9200}";
    const STARTED: &str = "[2024-01-01T00:00:02,000][INFO ][o.o.n.Node] [node-1] started";

    #[test]
    fn test_happy_path_advances_to_started() {
        let node = node(Some(9200));
        let mut state = NodeRuntimeState::default();

        assert_eq!(feed(&mut state, &node, VERSION), Advance::Continue);
        assert_eq!(state.version.as_deref(), Some("2.11.0"));
        assert_eq!(state.process_id, Some(4242));

        assert_eq!(feed(&mut state, &node, PORT), Advance::Continue);
        assert_eq!(state.port, Some(9200));

        assert_eq!(feed(&mut state, &node, STARTED), Advance::Started);
        assert!(state.started());

        // Already started: nothing more happens.
        assert_eq!(feed(&mut state, &node, STARTED), Advance::Continue);
    }

    #[test]
    fn test_later_version_announcements_are_ignored() {
        let node = node(None);
        let mut state = NodeRuntimeState::default();
        feed(&mut state, &node, VERSION);
        feed(
            &mut state,
            &node,
            "[d][INFO ][o.o.n.Node] [node-1] version[9.9.9], pid[1], build[x]",
        );
        assert_eq!(state.version.as_deref(), Some("2.11.0"));
        assert_eq!(state.process_id, Some(4242));
    }

    #[test]
    fn test_port_mismatch_fails_before_started() {
        let node = node(Some(9201));
        let mut state = NodeRuntimeState::default();

        let advance = feed(&mut state, &node, PORT);
        assert_eq!(
            advance,
            Advance::Failed(NodeError::ConfigurationMismatch {
                node: "node-1".to_string(),
                desired: 9201,
                observed: 9200,
            })
        );
        assert!(!state.started());
    }

    #[test]
    fn test_started_without_port_is_missing_port_signal() {
        let node = node(Some(9200));
        let mut state = NodeRuntimeState::default();
        assert_eq!(
            feed(&mut state, &node, STARTED),
            Advance::Failed(NodeError::MissingPortSignal {
                node: "node-1".to_string()
            })
        );
        assert!(!state.started());
    }

    #[test]
    fn test_assumed_started_only_when_enabled() {
        let diagnostic = "[d][WARN ][o.o.d.z.ZenDiscovery] [node-1] not enough master nodes discovered during pinging (found [[]], but needed [2])";

        let mut strict = node(Some(9200));
        let mut state = NodeRuntimeState::default();
        feed(&mut state, &strict, PORT);
        assert_eq!(feed(&mut state, &strict, diagnostic), Advance::Continue);

        strict.assume_started_on_not_enough_peers = true;
        assert_eq!(feed(&mut state, &strict, diagnostic), Advance::Started);
        assert!(state.started());
    }

    #[test]
    fn test_failed_node_never_becomes_started() {
        let node = node(Some(9200));
        let mut state = NodeRuntimeState::default();
        feed(&mut state, &node, PORT);
        state.last_error = Some(NodeError::StartupTimeout {
            node: "node-1".to_string(),
            timeout: Duration::from_millis(10),
        });

        assert_eq!(feed(&mut state, &node, STARTED), Advance::Continue);
        assert!(!state.started());
    }

    #[test]
    fn test_take_line_decodes_lossily() {
        let mut buf = b"JVM warning: caf\xe9 au lait\r\n".to_vec();
        assert_eq!(take_line(&mut buf), "JVM warning: caf\u{fffd} au lait");
        assert!(buf.is_empty());

        let mut last = b"no newline".to_vec();
        assert_eq!(take_line(&mut last), "no newline");
    }

    #[test]
    fn test_unclassified_lines_do_nothing() {
        let node = node(Some(9200));
        let mut state = NodeRuntimeState::default();
        for line in ["", "started", "Caused by: x.Y: z", "\tat a.b.C(D.java:1)"] {
            assert_eq!(feed(&mut state, &node, line), Advance::Continue);
        }
        assert_eq!(state, NodeRuntimeState::default());
    }
}
