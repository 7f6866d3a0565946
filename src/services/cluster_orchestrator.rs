//! Cluster orchestrator
//!
//! Plans every node of a cluster up front (ports, names, peer list, launch
//! command), then drives the lifecycle: install and before-start tasks, node
//! startup against one shared deadline, after-start tasks, and finally
//! disposal with teardown.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, select_all};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{ClusterError, ClusterResult, NodeFailureReport};
use crate::domain::models::{
    ClusterConfiguration, ClusterFileSystem, ConsoleLine, LaunchCommand, NodeConfiguration,
    NodeStatus,
};
use crate::domain::ports::{ProcessSpawner, TaskContext};
use crate::services::node_supervisor::{NodeSubscription, NodeSupervisor};
use crate::services::task_pipeline::{TaskPipeline, TaskRegistry};

/// Lines of each node's on-disk log included in a startup failure.
pub const FAILURE_LOG_TAIL_LINES: usize = 20;

/// Far enough away to never fire, like tokio's own fallback for huge timeouts.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Strategy applied to every planned node before its supervisor is created.
pub type NodeConfigurationHook = Arc<dyn Fn(&mut NodeConfiguration) + Send + Sync>;

/// Computes the configuration of every node.
///
/// Node `i` (0-based) gets HTTP port `start_port + i` and transport port
/// `transport_start_port + i`. All names are computed before any node is
/// configured so that every node receives the same peer list.
pub fn plan_nodes(
    config: &ClusterConfiguration,
    file_system: &ClusterFileSystem,
) -> Vec<NodeConfiguration> {
    let count = usize::from(config.node_count);
    let http_ports: Vec<u16> = (0..config.node_count)
        .map(|i| config.start_port.saturating_add(i))
        .collect();
    let transport_ports: Vec<u16> = (0..config.node_count)
        .map(|i| config.transport_start_port.saturating_add(i))
        .collect();
    let names: Vec<String> = http_ports
        .iter()
        .enumerate()
        .map(|(i, port)| config.node_name(i + 1, *port))
        .collect();
    let seed_hosts = transport_ports
        .iter()
        .map(|p| format!("localhost:{p}"))
        .collect::<Vec<_>>()
        .join(",");

    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let data_dir = file_system.data_dir(name);
            let logs_dir = file_system.logs_dir(name);

            let mut launch = LaunchCommand::new(config.launch_binary());
            launch
                .setting("cluster.name", &config.name)
                .setting("node.name", name)
                .setting("http.port", http_ports[i])
                .setting("transport.port", transport_ports[i])
                .setting("path.data", data_dir.display())
                .setting("path.logs", logs_dir.display());
            if count == 1 {
                launch.setting("discovery.type", "single-node");
            } else {
                launch
                    .setting("discovery.seed_hosts", &seed_hosts)
                    .setting("cluster.initial_cluster_manager_nodes", names.join(","));
            }
            for (key, value) in &config.settings {
                launch.setting(key, value);
            }
            launch.env.insert(
                "OPENSEARCH_HOME".to_string(),
                config.home.display().to_string(),
            );
            launch.env.insert(
                "OPENSEARCH_PATH_CONF".to_string(),
                config.home.join("config").display().to_string(),
            );
            launch.env.insert(
                "OPENSEARCH_JAVA_OPTS".to_string(),
                format!("-Xms{0} -Xmx{0}", config.heap_size),
            );

            NodeConfiguration {
                index: i + 1,
                name: name.clone(),
                cluster_name: config.name.clone(),
                desired_port: Some(http_ports[i]),
                transport_port: transport_ports[i],
                peers: names.clone(),
                data_dir,
                logs_dir,
                launch,
                assume_started_on_not_enough_peers: config
                    .features
                    .assume_started_on_not_enough_peers
                    && count > 1,
            }
        })
        .collect()
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Rejects node sets that break the cluster invariants.
fn check_nodes(nodes: &[NodeConfiguration]) -> Result<(), String> {
    let mut names = HashSet::new();
    let mut ports = HashSet::new();
    for node in nodes {
        if !names.insert(node.name.as_str()) {
            return Err(format!("duplicate node name {}", node.name));
        }
        if let Some(port) = node.desired_port {
            if !ports.insert(port) {
                return Err(format!("port {port} is assigned to more than one node"));
            }
        }
    }
    if let Some(first) = nodes.first() {
        if nodes.iter().any(|n| n.peers != first.peers) {
            return Err("every node must share the same peer list".to_string());
        }
    }
    Ok(())
}

/// Builds a [`ClusterOrchestrator`].
pub struct ClusterBuilder {
    config: ClusterConfiguration,
    spawner: Arc<dyn ProcessSpawner>,
    registry: TaskRegistry,
    modify_node: Option<NodeConfigurationHook>,
    file_system: Option<ClusterFileSystem>,
    console: Option<mpsc::Sender<ConsoleLine>>,
}

impl ClusterBuilder {
    pub fn new(config: ClusterConfiguration, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            config,
            spawner,
            registry: TaskRegistry::new(),
            modify_node: None,
            file_system: None,
            console: None,
        }
    }

    /// Lifecycle tasks of the cluster. Replaces any earlier registry.
    #[must_use]
    pub fn tasks(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Appends tasks to the registry, phase by phase.
    #[must_use]
    pub fn extra_tasks(mut self, registry: TaskRegistry) -> Self {
        self.registry.extend(registry);
        self
    }

    /// Adjusts each planned node before it is created.
    #[must_use]
    pub fn modify_node_configuration(
        mut self,
        hook: impl Fn(&mut NodeConfiguration) + Send + Sync + 'static,
    ) -> Self {
        self.modify_node = Some(Arc::new(hook));
        self
    }

    /// Uses `file_system` instead of a fresh ephemeral root.
    #[must_use]
    pub fn file_system(mut self, file_system: ClusterFileSystem) -> Self {
        self.file_system = Some(file_system);
        self
    }

    /// Receives node output while nodes start (and afterwards when the
    /// cluster relays output after start).
    #[must_use]
    pub fn console_sink(mut self, sink: mpsc::Sender<ConsoleLine>) -> Self {
        self.console = Some(sink);
        self
    }

    /// Validates the configuration and plans every node.
    pub fn build(self) -> ClusterResult<ClusterOrchestrator> {
        self.config
            .validate()
            .map_err(ClusterError::InvalidConfiguration)?;

        let file_system = self
            .file_system
            .unwrap_or_else(|| ClusterFileSystem::ephemeral(&self.config));
        let mut nodes = plan_nodes(&self.config, &file_system);
        if let Some(hook) = &self.modify_node {
            for node in &mut nodes {
                hook(node);
            }
        }
        check_nodes(&nodes).map_err(ClusterError::InvalidConfiguration)?;

        let relay = self.config.features.relay_output_after_started;
        let supervisors = nodes
            .into_iter()
            .map(|node| {
                NodeSupervisor::new(node, Arc::clone(&self.spawner)).with_relay_after_started(relay)
            })
            .collect();

        debug!(
            cluster = %self.config.name,
            root = %file_system.root().display(),
            tasks = ?self.registry,
            "cluster planned"
        );

        Ok(ClusterOrchestrator {
            config: Arc::new(self.config),
            file_system,
            nodes: supervisors,
            pipeline: TaskPipeline::new(self.registry),
            console: self.console,
            running: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }
}

impl fmt::Debug for ClusterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("modify_node", &self.modify_node.is_some())
            .field("file_system", &self.file_system)
            .finish_non_exhaustive()
    }
}

/// Output subscriptions of a started cluster.
///
/// Dropping it stops relaying node output; the nodes keep running until the
/// cluster is disposed.
#[derive(Debug)]
pub struct ClusterSubscription {
    nodes: Vec<NodeSubscription>,
}

impl ClusterSubscription {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dispose(self) {
        for node in self.nodes {
            node.dispose();
        }
    }
}

/// A planned cluster and its lifecycle.
pub struct ClusterOrchestrator {
    config: Arc<ClusterConfiguration>,
    file_system: ClusterFileSystem,
    nodes: Vec<NodeSupervisor>,
    pipeline: TaskPipeline,
    console: Option<mpsc::Sender<ConsoleLine>>,
    running: AtomicBool,
    disposed: AtomicBool,
}

impl ClusterOrchestrator {
    pub fn builder(config: ClusterConfiguration, spawner: Arc<dyn ProcessSpawner>) -> ClusterBuilder {
        ClusterBuilder::new(config, spawner)
    }

    pub fn configuration(&self) -> &ClusterConfiguration {
        &self.config
    }

    pub const fn file_system(&self) -> &ClusterFileSystem {
        &self.file_system
    }

    /// Nodes in index order.
    pub fn nodes(&self) -> &[NodeSupervisor] {
        &self.nodes
    }

    pub const fn pipeline(&self) -> &TaskPipeline {
        &self.pipeline
    }

    /// True once every node started, until the cluster is disposed.
    pub fn started(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.nodes.iter().all(NodeSupervisor::started)
    }

    pub fn status(&self) -> Vec<NodeStatus> {
        self.nodes.iter().map(NodeSupervisor::status).collect()
    }

    /// Context handed to tasks, with a fresh runtime snapshot of every node.
    pub fn task_context(&self) -> TaskContext {
        TaskContext {
            cluster: Arc::clone(&self.config),
            file_system: self.file_system.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| n.configuration().clone())
                .collect(),
            runtime: self.nodes.iter().map(NodeSupervisor::runtime_state).collect(),
        }
    }

    /// Runs install and before-start tasks, starts every node, then runs the
    /// after-start tasks.
    ///
    /// All nodes share one `timeout`. The first node that fails or times out
    /// ends the wait; the error then reports every node's state.
    #[instrument(skip(self), fields(cluster = %self.config.name, nodes = self.nodes.len()))]
    pub async fn start(&self, timeout: Duration) -> ClusterResult<ClusterSubscription> {
        let ctx = self.task_context();
        self.pipeline.install(&ctx).await?;
        self.pipeline.on_before_start(&ctx).await?;

        self.running.store(true, Ordering::Release);
        let deadline = deadline_after(timeout);

        // Every node is subscribed before any wait begins.
        let mut failed = false;
        for node in &self.nodes {
            if let Err(e) = node.subscribe(self.console.clone()).await {
                warn!(node = node.name(), error = %e, "failed to launch node");
                failed = true;
            }
        }

        let mut subscriptions = Vec::with_capacity(self.nodes.len());
        if !failed {
            for node in &self.nodes {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match node.wait_for_started(remaining).await {
                    Ok(subscription) => subscriptions.push(subscription),
                    Err(_) => {
                        failed = true;
                        break;
                    }
                }
            }
        }

        if failed {
            return Err(self.aggregated_failure().await);
        }
        info!("all nodes started");

        let ctx = self.task_context();
        if let Err(e) = self
            .pipeline
            .run_after_start(&ctx, self.config.features.skip_after_start_tasks)
            .await
        {
            warn!(task = %e.task, "after-start task failed, stopping cluster");
            drop(subscriptions);
            if let Err(dispose) = self.dispose().await {
                warn!(error = %dispose, "rollback after failed after-start task incomplete");
            }
            return Err(e.into());
        }

        Ok(ClusterSubscription {
            nodes: subscriptions,
        })
    }

    async fn aggregated_failure(&self) -> ClusterError {
        let tails = join_all(
            self.nodes
                .iter()
                .map(|node| node.log_tail(FAILURE_LOG_TAIL_LINES)),
        )
        .await;
        let failures = self
            .nodes
            .iter()
            .zip(tails)
            .map(|(node, log_tail)| NodeFailureReport {
                node: node.name().to_string(),
                started: node.started(),
                error: node.last_error(),
                log_tail,
            })
            .collect();
        ClusterError::AggregatedNodeFailure { failures }
    }

    /// Disposes every node, then runs the teardown tasks.
    ///
    /// A failing node never keeps the others or teardown from running; every
    /// failure is reported once everything ran. Later calls do nothing, and
    /// teardown never runs twice even when a failed start already ran it.
    #[instrument(skip(self), fields(cluster = %self.config.name))]
    pub async fn dispose(&self) -> ClusterResult<()> {
        self.running.store(false, Ordering::Release);
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut failures = Vec::new();
        for node in &self.nodes {
            if let Err(e) = node.dispose().await {
                warn!(node = node.name(), error = %e, "node disposal failed");
                failures.push(e.to_string());
            }
        }

        let ctx = self.task_context();
        failures.extend(
            self.pipeline
                .teardown(&ctx)
                .await
                .into_iter()
                .map(|e| e.to_string()),
        );

        if failures.is_empty() {
            info!("cluster disposed");
            Ok(())
        } else {
            Err(ClusterError::DisposeFailed { failures })
        }
    }

    /// Waits up to `timeout` for every node process to exit.
    pub async fn wait_for_exit(&self, timeout: Duration) -> ClusterResult<bool> {
        let deadline = deadline_after(timeout);
        for node in &self.nodes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !node.wait_for_exit(remaining).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Waits up to `timeout` for the first node process to exit and returns
    /// its name, or `None` when every node is still running.
    pub async fn wait_for_any_exit(&self, timeout: Duration) -> ClusterResult<Option<&str>> {
        if self.nodes.is_empty() {
            return Ok(None);
        }
        let waits = self.nodes.iter().map(|node| {
            Box::pin(async move {
                node.wait_for_exit(FAR_FUTURE)
                    .await
                    .map(|_| node.name())
            })
        });
        match tokio::time::timeout(timeout, select_all(waits)).await {
            Ok((exited, _, _)) => Ok(Some(exited?)),
            Err(_) => Ok(None),
        }
    }
}

impl fmt::Debug for ClusterOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterOrchestrator")
            .field("cluster", &self.config.name)
            .field("root", &self.file_system.root())
            .field("nodes", &self.nodes.iter().map(NodeSupervisor::name).collect::<Vec<_>>())
            .field("started", &self.started())
            .finish_non_exhaustive()
    }
}
