//! Host checks run before any node is launched.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::debug;

use crate::domain::ports::{ClusterTask, TaskContext};

/// Fails when a node's launch program is given as a path that is not a file.
///
/// Bare program names are resolved through `PATH` at spawn time and are not
/// checked here.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyLaunchBinary;

#[async_trait]
impl ClusterTask for VerifyLaunchBinary {
    fn name(&self) -> &str {
        "verify-launch-binary"
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        for node in &ctx.nodes {
            let program = &node.launch.program;
            if program.components().count() <= 1 {
                continue;
            }
            let metadata = tokio::fs::metadata(program)
                .await
                .with_context(|| format!("launch binary {} for {}", program.display(), node.name))?;
            if !metadata.is_file() {
                bail!("launch binary {} is not a file", program.display());
            }
        }
        Ok(())
    }
}

/// Fails when any assigned HTTP or transport port cannot be bound locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsurePortsAvailable;

#[async_trait]
impl ClusterTask for EnsurePortsAvailable {
    fn name(&self) -> &str {
        "ensure-ports-available"
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        for node in &ctx.nodes {
            let ports = node
                .desired_port
                .into_iter()
                .chain(Some(node.transport_port))
                .filter(|p| *p != 0);
            for port in ports {
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("port {port} of {} is not available", node.name))?;
                drop(listener);
                debug!(node = %node.name, port, "port available");
            }
        }
        Ok(())
    }
}
