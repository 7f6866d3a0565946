//! Per-node configuration and runtime state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::domain::errors::NodeError;

/// Program, arguments and environment used to launch one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Adds a `-E key=value` server setting.
    pub fn setting(&mut self, key: &str, value: impl std::fmt::Display) -> &mut Self {
        self.args.push("-E".to_string());
        self.args.push(format!("{key}={value}"));
        self
    }

    /// Value of a `-E` setting, if present.
    pub fn setting_value(&self, key: &str) -> Option<&str> {
        let prefix = format!("{key}=");
        self.args
            .windows(2)
            .filter(|pair| pair[0] == "-E")
            .find_map(|pair| pair[1].strip_prefix(prefix.as_str()))
    }
}

/// Static configuration of one node, created once when the cluster is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeConfiguration {
    /// 1-based position in the cluster
    pub index: usize,
    pub name: String,
    pub cluster_name: String,
    /// Port the node must bind; `None` accepts whatever the server picks
    pub desired_port: Option<u16>,
    pub transport_port: u16,
    /// Names of every node in the cluster, identical across all nodes
    pub peers: Vec<String>,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub launch: LaunchCommand,
    /// Accept the peer-discovery diagnostic as a started confirmation
    pub assume_started_on_not_enough_peers: bool,
}

impl NodeConfiguration {
    /// A standalone node with no peers and an empty launch command.
    pub fn standalone(name: impl Into<String>, desired_port: Option<u16>) -> Self {
        let name = name.into();
        Self {
            index: 1,
            cluster_name: name.clone(),
            peers: vec![name.clone()],
            name,
            desired_port,
            transport_port: 0,
            data_dir: PathBuf::new(),
            logs_dir: PathBuf::new(),
            launch: LaunchCommand::default(),
            assume_started_on_not_enough_peers: false,
        }
    }

    /// The server writes its main log to `<logs dir>/<cluster name>.log`.
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir.join(format!("{}.log", self.cluster_name))
    }
}

/// What the node has told us about itself through its output.
///
/// Written only by the node's drain task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRuntimeState {
    /// Port the node reported binding; may differ from the desired one
    pub port: Option<u16>,
    pub version: Option<String>,
    /// Pid of the server process itself, which may differ from the launcher's
    pub process_id: Option<u32>,
    pub build: Option<String>,
    pub last_error: Option<NodeError>,
    started: bool,
}

impl NodeRuntimeState {
    pub const fn started(&self) -> bool {
        self.started
    }

    /// Flips `started` to true. Returns `false` if it already was.
    pub(crate) fn mark_started(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        true
    }
}

/// Outcome of waiting on a node's readiness signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Started,
    Failed(NodeError),
    TimedOut,
}

/// Snapshot of a node for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub desired_port: Option<u16>,
    pub port: Option<u16>,
    pub version: Option<String>,
    pub process_id: Option<u32>,
    pub launcher_pid: Option<u32>,
    pub started: bool,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_is_monotonic() {
        let mut state = NodeRuntimeState::default();
        assert!(!state.started());
        assert!(state.mark_started());
        assert!(!state.mark_started());
        assert!(state.started());
    }

    #[test]
    fn test_launch_command_settings() {
        let mut cmd = LaunchCommand::new("bin/opensearch");
        cmd.setting("http.port", 9200).setting("node.name", "n1");
        assert_eq!(cmd.args, vec!["-E", "http.port=9200", "-E", "node.name=n1"]);
        assert_eq!(cmd.setting_value("http.port"), Some("9200"));
        assert_eq!(cmd.setting_value("http"), None);
    }

    #[test]
    fn test_log_file_uses_cluster_name() {
        let mut node = NodeConfiguration::standalone("n1", Some(9200));
        node.cluster_name = "it".to_string();
        node.logs_dir = PathBuf::from("/tmp/n1/logs");
        assert_eq!(node.log_file(), PathBuf::from("/tmp/n1/logs/it.log"));
    }
}
