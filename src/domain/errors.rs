//! Domain errors for ephemeral cluster supervision.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Appended to every user-visible startup failure.
pub const SEE_LOGS_HINT: &str = "see the node output above and the on-disk log tails below for details";

/// Failures of a single supervised node.
///
/// These are captured by the node's background drain task and only surfaced
/// to a caller at the synchronization point (`wait_for_started`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node {node} bound to port {observed} but was configured to use port {desired}")]
    ConfigurationMismatch {
        node: String,
        desired: u16,
        observed: u16,
    },

    #[error("node {node} did not report started within {timeout:?}")]
    StartupTimeout { node: String, timeout: Duration },

    #[error("node {node} confirmed started but never announced the port it bound to")]
    MissingPortSignal { node: String },

    #[error("node {node} exited before it reported started (exit code: {code:?})")]
    ExitedBeforeStarted { node: String, code: Option<i32> },

    #[error("node {node} output stream failed: {message}")]
    OutputStream { node: String, message: String },

    #[error("failed to spawn node {node}: {message}")]
    Spawn { node: String, message: String },

    #[error("node {node} is already subscribed to its process output")]
    AlreadySubscribed { node: String },

    #[error("node {node} was never started")]
    NotSubscribed { node: String },

    #[error("failed to terminate node {node}: {message}")]
    Terminate { node: String, message: String },
}

impl NodeError {
    /// Name of the node this error belongs to.
    pub fn node(&self) -> &str {
        match self {
            Self::ConfigurationMismatch { node, .. }
            | Self::StartupTimeout { node, .. }
            | Self::MissingPortSignal { node }
            | Self::ExitedBeforeStarted { node, .. }
            | Self::OutputStream { node, .. }
            | Self::Spawn { node, .. }
            | Self::AlreadySubscribed { node }
            | Self::NotSubscribed { node }
            | Self::Terminate { node, .. } => node,
        }
    }
}

/// Lifecycle phase a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Install,
    BeforeStart,
    AfterStart,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::BeforeStart => "before-start",
            Self::AfterStart => "after-start",
            Self::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// A lifecycle task failed. The task's own error is kept as the source.
#[derive(Debug, Error)]
#[error("{phase} task '{task}' failed: {source}")]
pub struct PipelineError {
    pub phase: Phase,
    pub task: String,
    #[source]
    pub source: anyhow::Error,
}

impl PipelineError {
    /// Consume the failure and hand back the task's original error.
    pub fn into_source(self) -> anyhow::Error {
        self.source
    }
}

/// Per-node entry of an [`ClusterError::AggregatedNodeFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailureReport {
    pub node: String,
    pub started: bool,
    pub error: Option<NodeError>,
    pub log_tail: Option<String>,
}

impl fmt::Display for NodeFailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.started) {
            (Some(err), _) => write!(f, "  - {}: {err}", self.node)?,
            (None, true) => write!(f, "  - {}: started", self.node)?,
            (None, false) => write!(f, "  - {}: not started, no error observed", self.node)?,
        }
        if let Some(tail) = self.log_tail.as_deref().filter(|t| !t.trim().is_empty()) {
            write!(f, "\n    last log lines:")?;
            for line in tail.lines() {
                write!(f, "\n      {line}")?;
            }
        }
        Ok(())
    }
}

fn format_node_failures(failures: &[NodeFailureReport]) -> String {
    let mut out = String::from("cluster failed to start:");
    for report in failures {
        out.push('\n');
        out.push_str(&report.to_string());
    }
    out.push('\n');
    out.push_str(SEE_LOGS_HINT);
    out
}

/// Cluster-level errors.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{}", format_node_failures(.failures))]
    AggregatedNodeFailure { failures: Vec<NodeFailureReport> },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("cluster disposal finished with {} failure(s): {}", .failures.len(), .failures.join("; "))]
    DisposeFailed { failures: Vec<String> },

    #[error("invalid cluster configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl ClusterError {
    /// The pipeline failure, if this error came from a lifecycle task.
    pub fn as_pipeline(&self) -> Option<&PipelineError> {
        match self {
            Self::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
pub type ClusterResult<T> = Result<T, ClusterError>;
