//! Cluster-wide configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default launch script, relative to the server home.
pub const DEFAULT_LAUNCH_SCRIPT: &str = "bin/opensearch";

/// Optional behaviours of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterFeatures {
    /// Treat the "not enough peers discovered" diagnostic as a started
    /// confirmation. Only honoured for clusters of more than one node.
    #[serde(default)]
    pub assume_started_on_not_enough_peers: bool,

    /// Keep relaying server output to the console sink after startup.
    #[serde(default)]
    pub relay_output_after_started: bool,

    /// Leave the ephemeral directories on disk when the cluster is disposed.
    #[serde(default)]
    pub keep_data_on_dispose: bool,

    /// Do not run after-start tasks.
    #[serde(default)]
    pub skip_after_start_tasks: bool,
}

/// Desired shape of an ephemeral cluster.
///
/// Immutable once a cluster has been built from it; the orchestrator keeps it
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterConfiguration {
    /// Value of `cluster.name`
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Number of nodes to run
    #[serde(default = "default_node_count")]
    pub node_count: u16,

    /// HTTP port of the first node; node `i` gets `start_port + i`
    #[serde(default = "default_start_port")]
    pub start_port: u16,

    /// Transport port of the first node
    #[serde(default = "default_transport_start_port")]
    pub transport_start_port: u16,

    /// Node name template; supports `{cluster}`, `{index}` and `{port}`
    #[serde(default = "default_node_name_template")]
    pub node_name_template: String,

    /// Installed server home
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Launch binary; defaults to `<home>/bin/opensearch`
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Base directory under which each cluster instance gets its own root
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// JVM heap size passed as `-Xms`/`-Xmx`
    #[serde(default = "default_heap_size")]
    pub heap_size: String,

    /// Expected server version, validated after start when set
    #[serde(default)]
    pub version: Option<String>,

    /// Extra `-E key=value` settings passed to every node
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// Optional behaviours
    #[serde(default)]
    pub features: ClusterFeatures,
}

fn default_cluster_name() -> String {
    "ephemeral".to_string()
}

const fn default_node_count() -> u16 {
    1
}

const fn default_start_port() -> u16 {
    9200
}

const fn default_transport_start_port() -> u16 {
    9300
}

fn default_node_name_template() -> String {
    "{cluster}-node-{index}".to_string()
}

fn default_home() -> PathBuf {
    PathBuf::from("opensearch")
}

fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join("ephemeral-cluster")
}

fn default_heap_size() -> String {
    "1g".to_string()
}

impl Default for ClusterConfiguration {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            node_count: default_node_count(),
            start_port: default_start_port(),
            transport_start_port: default_transport_start_port(),
            node_name_template: default_node_name_template(),
            home: default_home(),
            binary: None,
            base_dir: default_base_dir(),
            heap_size: default_heap_size(),
            version: None,
            settings: BTreeMap::new(),
            features: ClusterFeatures::default(),
        }
    }
}

impl ClusterConfiguration {
    /// Configuration for `node_count` nodes starting at `start_port`.
    pub fn new(name: impl Into<String>, node_count: u16, start_port: u16) -> Self {
        Self {
            name: name.into(),
            node_count,
            start_port,
            ..Self::default()
        }
    }

    /// The binary used to launch every node.
    pub fn launch_binary(&self) -> PathBuf {
        self.binary
            .clone()
            .unwrap_or_else(|| self.home.join(DEFAULT_LAUNCH_SCRIPT))
    }

    /// Renders the node name for the node at 1-based `index`.
    pub fn node_name(&self, index: usize, port: u16) -> String {
        self.node_name_template
            .replace("{cluster}", &self.name)
            .replace("{index}", &index.to_string())
            .replace("{port}", &port.to_string())
    }

    /// Checks the invariants every cluster relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("cluster name cannot be empty".to_string());
        }
        if self.node_count == 0 {
            return Err("node_count must be at least 1".to_string());
        }
        if self.start_port == 0 || self.transport_start_port == 0 {
            return Err("ports must be non-zero".to_string());
        }
        let last = |start: u16| u32::from(start) + u32::from(self.node_count) - 1;
        if last(self.start_port) > u32::from(u16::MAX) {
            return Err(format!(
                "{} nodes starting at port {} exceed the port range",
                self.node_count, self.start_port
            ));
        }
        if last(self.transport_start_port) > u32::from(u16::MAX) {
            return Err(format!(
                "{} nodes starting at transport port {} exceed the port range",
                self.node_count, self.transport_start_port
            ));
        }
        let http = u32::from(self.start_port)..=last(self.start_port);
        let transport = u32::from(self.transport_start_port)..=last(self.transport_start_port);
        if http.start() <= transport.end() && transport.start() <= http.end() {
            return Err("HTTP and transport port ranges overlap".to_string());
        }
        if !self.node_name_template.contains("{index}") && !self.node_name_template.contains("{port}") {
            return Err("node_name_template must contain {index} or {port}".to_string());
        }
        Ok(())
    }
}

/// On-disk layout of one cluster instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFileSystem {
    root: PathBuf,
}

impl ClusterFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A fresh, uniquely named root under the configured base directory.
    pub fn ephemeral(config: &ClusterConfiguration) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(config.base_dir.join(format!("{}-{}", config.name, &id[..8])))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn node_dir(&self, node_name: &str) -> PathBuf {
        self.root.join(node_name)
    }

    pub fn data_dir(&self, node_name: &str) -> PathBuf {
        self.node_dir(node_name).join("data")
    }

    pub fn logs_dir(&self, node_name: &str) -> PathBuf {
        self.node_dir(node_name).join("logs")
    }
}
