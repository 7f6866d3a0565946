//! Task port - units of work run around the cluster lifecycle.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::models::{
    ClusterConfiguration, ClusterFileSystem, NodeConfiguration, NodeRuntimeState,
};

/// Everything a task may look at.
///
/// `runtime` is a snapshot taken when the phase began; before the nodes are
/// started every entry is the default state.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub cluster: Arc<ClusterConfiguration>,
    pub file_system: ClusterFileSystem,
    pub nodes: Vec<NodeConfiguration>,
    pub runtime: Vec<NodeRuntimeState>,
}

/// A named unit of work over the cluster and its filesystem.
///
/// The pipeline does not make tasks idempotent; tasks that may run twice
/// (teardown, for instance) must tolerate it themselves.
#[async_trait]
pub trait ClusterTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()>;
}

/// Adapts a synchronous closure into a [`ClusterTask`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F> FnTask<F>
where
    F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> ClusterTask for FnTask<F>
where
    F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        (self.f)(ctx)
    }
}
