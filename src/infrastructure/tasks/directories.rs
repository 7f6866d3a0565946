use std::io;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::ports::{ClusterTask, TaskContext};

/// Creates every node's data and logs directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateNodeDirectories;

#[async_trait]
impl ClusterTask for CreateNodeDirectories {
    fn name(&self) -> &str {
        "create-node-directories"
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        for node in &ctx.nodes {
            for dir in [&node.data_dir, &node.logs_dir] {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {} for {}", dir.display(), node.name))?;
            }
            debug!(node = %node.name, data = %node.data_dir.display(), "node directories ready");
        }
        Ok(())
    }
}

/// Removes the cluster's ephemeral root, unless the cluster keeps its data.
///
/// Tolerates a root that is already gone, so running twice is harmless.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveEphemeralDirectories;

#[async_trait]
impl ClusterTask for RemoveEphemeralDirectories {
    fn name(&self) -> &str {
        "remove-ephemeral-directories"
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let root = ctx.file_system.root();
        if ctx.cluster.features.keep_data_on_dispose {
            info!(root = %root.display(), "keeping cluster data");
            return Ok(());
        }
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => {
                debug!(root = %root.display(), "removed cluster data");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", root.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ClusterConfiguration, ClusterFileSystem, NodeConfiguration};
    use std::sync::Arc;

    fn context(root: &std::path::Path, keep: bool) -> TaskContext {
        let file_system = ClusterFileSystem::new(root.join("cluster"));
        let mut cluster = ClusterConfiguration::default();
        cluster.features.keep_data_on_dispose = keep;
        let nodes = (1..=2)
            .map(|i| {
                let mut node = NodeConfiguration::standalone(format!("n{i}"), None);
                node.data_dir = file_system.data_dir(&node.name);
                node.logs_dir = file_system.logs_dir(&node.name);
                node
            })
            .collect();
        TaskContext {
            cluster: Arc::new(cluster),
            file_system,
            nodes,
            runtime: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_then_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), false);

        CreateNodeDirectories.run(&ctx).await.unwrap();
        for node in &ctx.nodes {
            assert!(node.data_dir.is_dir());
            assert!(node.logs_dir.is_dir());
        }

        RemoveEphemeralDirectories.run(&ctx).await.unwrap();
        assert!(!ctx.file_system.root().exists());

        // Second run finds nothing to remove.
        RemoveEphemeralDirectories.run(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_keep_data_on_dispose() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), true);

        CreateNodeDirectories.run(&ctx).await.unwrap();
        RemoveEphemeralDirectories.run(&ctx).await.unwrap();
        assert!(ctx.file_system.root().is_dir());
    }
}
