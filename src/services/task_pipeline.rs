//! Lifecycle task pipeline
//!
//! Runs the ordered install, before-start, after-start and teardown task
//! lists of one cluster. Install failures propagate as-is; a failure in
//! before-start or after-start first runs the teardown list as a best-effort
//! compensation. Every phase holds the pipeline's lock, so phases of one
//! cluster never interleave. The teardown list runs at most once per
//! pipeline, whichever path gets there first.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{Phase, PipelineError};
use crate::domain::ports::{ClusterTask, TaskContext};

/// Ordered task lists, fixed when the cluster is built.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    install: Vec<Arc<dyn ClusterTask>>,
    before_start: Vec<Arc<dyn ClusterTask>>,
    after_start: Vec<Arc<dyn ClusterTask>>,
    teardown: Vec<Arc<dyn ClusterTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `task` to the list of `phase`.
    pub fn push(&mut self, phase: Phase, task: Arc<dyn ClusterTask>) {
        self.list_mut(phase).push(task);
    }

    #[must_use]
    pub fn with(mut self, phase: Phase, task: impl ClusterTask + 'static) -> Self {
        self.push(phase, Arc::new(task));
        self
    }

    /// Appends every task of `other`, phase by phase.
    pub fn extend(&mut self, other: Self) {
        self.install.extend(other.install);
        self.before_start.extend(other.before_start);
        self.after_start.extend(other.after_start);
        self.teardown.extend(other.teardown);
    }

    pub fn tasks(&self, phase: Phase) -> &[Arc<dyn ClusterTask>] {
        match phase {
            Phase::Install => &self.install,
            Phase::BeforeStart => &self.before_start,
            Phase::AfterStart => &self.after_start,
            Phase::Teardown => &self.teardown,
        }
    }

    /// Task names of `phase`, in run order.
    pub fn names(&self, phase: Phase) -> Vec<String> {
        self.tasks(phase)
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    fn list_mut(&mut self, phase: Phase) -> &mut Vec<Arc<dyn ClusterTask>> {
        match phase {
            Phase::Install => &mut self.install,
            Phase::BeforeStart => &mut self.before_start,
            Phase::AfterStart => &mut self.after_start,
            Phase::Teardown => &mut self.teardown,
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("install", &self.names(Phase::Install))
            .field("before_start", &self.names(Phase::BeforeStart))
            .field("after_start", &self.names(Phase::AfterStart))
            .field("teardown", &self.names(Phase::Teardown))
            .finish()
    }
}

/// Runs a [`TaskRegistry`] under a per-cluster lock.
#[derive(Debug, Default)]
pub struct TaskPipeline {
    registry: TaskRegistry,
    lock: Mutex<()>,
    torn_down: AtomicBool,
}

impl TaskPipeline {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry,
            lock: Mutex::new(()),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Whether the teardown list already ran.
    pub fn torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub const fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Runs install tasks in order. The first failure stops the phase; no
    /// teardown runs since nothing has been started yet.
    #[instrument(skip_all)]
    pub async fn install(&self, ctx: &TaskContext) -> Result<(), PipelineError> {
        let _guard = self.lock.lock().await;
        self.run_phase(Phase::Install, ctx).await
    }

    /// Runs before-start tasks; on failure runs teardown, then returns the
    /// original failure.
    #[instrument(skip_all)]
    pub async fn on_before_start(&self, ctx: &TaskContext) -> Result<(), PipelineError> {
        let _guard = self.lock.lock().await;
        self.run_compensated(Phase::BeforeStart, ctx).await
    }

    /// Runs after-start tasks unless `skip`; same rollback contract as
    /// [`TaskPipeline::on_before_start`].
    #[instrument(skip_all, fields(skipped = skip))]
    pub async fn on_after_start(&self, ctx: &TaskContext, skip: bool) -> Result<(), PipelineError> {
        let _guard = self.lock.lock().await;
        if skip {
            debug!("after-start tasks skipped");
            return Ok(());
        }
        self.run_compensated(Phase::AfterStart, ctx).await
    }

    /// Runs after-start tasks unless `skip`, without compensation.
    ///
    /// The caller owns the rollback: it is expected to stop whatever was
    /// started and then call [`TaskPipeline::teardown`].
    #[instrument(skip_all, fields(skipped = skip))]
    pub async fn run_after_start(&self, ctx: &TaskContext, skip: bool) -> Result<(), PipelineError> {
        let _guard = self.lock.lock().await;
        if skip {
            debug!("after-start tasks skipped");
            return Ok(());
        }
        self.run_phase(Phase::AfterStart, ctx).await
    }

    /// Runs every teardown task, even after failures, and returns the
    /// failures it collected. Does nothing once teardown already ran.
    #[instrument(skip_all)]
    pub async fn teardown(&self, ctx: &TaskContext) -> Vec<PipelineError> {
        let _guard = self.lock.lock().await;
        self.run_teardown(ctx).await
    }

    async fn run_compensated(&self, phase: Phase, ctx: &TaskContext) -> Result<(), PipelineError> {
        match self.run_phase(phase, ctx).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(%phase, task = %err.task, error = %err.source, "phase failed, running teardown");
                let failures = self.run_teardown(ctx).await;
                if !failures.is_empty() {
                    warn!(count = failures.len(), "compensating teardown had failures");
                }
                Err(err)
            }
        }
    }

    async fn run_phase(&self, phase: Phase, ctx: &TaskContext) -> Result<(), PipelineError> {
        for task in self.registry.tasks(phase) {
            debug!(%phase, task = task.name(), "running task");
            task.run(ctx).await.map_err(|source| PipelineError {
                phase,
                task: task.name().to_string(),
                source,
            })?;
        }
        if !self.registry.tasks(phase).is_empty() {
            info!(%phase, count = self.registry.tasks(phase).len(), "phase completed");
        }
        Ok(())
    }

    async fn run_teardown(&self, ctx: &TaskContext) -> Vec<PipelineError> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            debug!("teardown already ran");
            return Vec::new();
        }
        let mut failures = Vec::new();
        for task in self.registry.tasks(Phase::Teardown) {
            debug!(task = task.name(), "running teardown task");
            if let Err(source) = task.run(ctx).await {
                warn!(task = task.name(), error = %source, "teardown task failed");
                failures.push(PipelineError {
                    phase: Phase::Teardown,
                    task: task.name().to_string(),
                    source,
                });
            }
        }
        failures
    }
}
