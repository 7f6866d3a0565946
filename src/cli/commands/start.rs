//! `start`: brings a cluster up and keeps it running until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::output::{create_spinner_with_message, output, CommandOutput, NodeTable, ProgressBarExt};
use crate::cli::relay::{relay_console, RelayMode};
use crate::cli::types::StartArgs;
use crate::domain::models::{ClusterConfiguration, Config, NodeStatus};
use crate::infrastructure::process::CommandSpawner;
use crate::infrastructure::tasks::default_registry;
use crate::services::ClusterBuilder;

/// Console lines buffered between the drain tasks and the terminal.
const CONSOLE_BUFFER: usize = 256;

/// How long to wait for node processes to go away after disposal.
const EXIT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
pub struct StartOutput {
    pub cluster: String,
    pub root: PathBuf,
    pub nodes: Vec<NodeStatus>,
}

impl CommandOutput for StartOutput {
    fn to_human(&self) -> String {
        format!(
            "Cluster '{}' is running ({} node{}), data in {}\n{}\nPress Ctrl-C to stop.",
            self.cluster,
            self.nodes.len(),
            if self.nodes.len() == 1 { "" } else { "s" },
            self.root.display(),
            NodeTable::new().format(&self.nodes)
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Applies command-line overrides on top of the loaded configuration.
pub fn cluster_configuration(config: &Config, args: &StartArgs) -> ClusterConfiguration {
    let mut cluster = config.cluster.clone();
    if let Some(nodes) = args.nodes {
        cluster.node_count = nodes;
    }
    if let Some(port) = args.port {
        cluster.start_port = port;
    }
    if let Some(home) = &args.home {
        cluster.home.clone_from(home);
    }
    if let Some(name) = &args.name {
        cluster.name.clone_from(name);
    }
    if args.relay {
        cluster.features.relay_output_after_started = true;
    }
    if args.keep_data {
        cluster.features.keep_data_on_dispose = true;
    }
    cluster
}

pub async fn execute(args: StartArgs, config: Config, json_mode: bool) -> Result<()> {
    let cluster_config = cluster_configuration(&config, &args);
    let timeout = Duration::from_secs(args.timeout.unwrap_or(config.start_timeout_secs));
    let registry = default_registry(&cluster_config);

    let (console_tx, console_rx) = mpsc::channel(CONSOLE_BUFFER);
    let cluster = ClusterBuilder::new(cluster_config, Arc::new(CommandSpawner::new()))
        .tasks(registry)
        .console_sink(console_tx)
        .build()
        .context("invalid cluster configuration")?;

    let spinner = (!json_mode).then(|| {
        create_spinner_with_message(format!(
            "starting {} node(s) of '{}'",
            cluster.nodes().len(),
            cluster.configuration().name
        ))
    });
    let mode = if args.relay {
        RelayMode::All
    } else {
        RelayMode::Noteworthy
    };
    let relay = tokio::spawn(relay_console(console_rx, mode, spinner.clone()));

    let subscription = match cluster.start(timeout).await {
        Ok(subscription) => subscription,
        Err(err) => {
            if let Some(spinner) = &spinner {
                spinner.finish_error("cluster failed to start");
            }
            if let Err(dispose_err) = cluster.dispose().await {
                warn!(error = %dispose_err, "cleanup after failed start was incomplete");
            }
            return Err(err.into());
        }
    };
    if let Some(spinner) = &spinner {
        spinner.finish_success("cluster started");
    }

    output(
        &StartOutput {
            cluster: cluster.configuration().name.clone(),
            root: cluster.file_system().root().to_path_buf(),
            nodes: cluster.status(),
        },
        json_mode,
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl-C")?;
            info!("shutting down cluster");
        }
        exited = cluster.wait_for_any_exit(Duration::MAX) => match exited {
            Ok(Some(node)) => warn!(node, "node process exited on its own, stopping cluster"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "waiting for node processes failed"),
        },
    }

    subscription.dispose();
    let disposed = cluster.dispose().await;
    if !cluster.wait_for_exit(EXIT_GRACE).await.unwrap_or(false) {
        warn!("node processes still running after shutdown");
    }
    drop(cluster);
    let _ = relay.await;

    disposed.context("cluster shutdown was incomplete")
}
