//! Checks over a started cluster's runtime state.

use std::collections::HashMap;

use anyhow::{anyhow, bail};
use async_trait::async_trait;

use crate::domain::ports::{ClusterTask, TaskContext};

/// Every node must run the configured server version.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateRunningVersion;

#[async_trait]
impl ClusterTask for ValidateRunningVersion {
    fn name(&self) -> &str {
        "validate-running-version"
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let Some(expected) = ctx.cluster.version.as_deref() else {
            return Ok(());
        };
        for (node, state) in ctx.nodes.iter().zip(&ctx.runtime) {
            match state.version.as_deref() {
                Some(actual) if actual == expected => {}
                Some(actual) => {
                    bail!("{} runs version {actual}, expected {expected}", node.name)
                }
                None => bail!("{} did not report its version", node.name),
            }
        }
        Ok(())
    }
}

/// Every node must have reported a port, and no two the same one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateDistinctPorts;

#[async_trait]
impl ClusterTask for ValidateDistinctPorts {
    fn name(&self) -> &str {
        "validate-distinct-ports"
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let mut seen: HashMap<u16, &str> = HashMap::new();
        for (node, state) in ctx.nodes.iter().zip(&ctx.runtime) {
            let port = state
                .port
                .ok_or_else(|| anyhow!("{} did not report a port", node.name))?;
            if let Some(other) = seen.insert(port, &node.name) {
                bail!("{} and {} both report port {port}", other, node.name);
            }
        }
        Ok(())
    }
}
