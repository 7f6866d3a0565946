//! Service layer
//!
//! - `log_classifier`: parsing of raw server output lines
//! - `node_supervisor`: one node process and its readiness
//! - `task_pipeline`: ordered lifecycle tasks with compensating teardown
//! - `cluster_orchestrator`: planning and lifecycle of a whole cluster

pub mod cluster_orchestrator;
pub mod log_classifier;
pub mod node_supervisor;
pub mod task_pipeline;

pub use cluster_orchestrator::{
    plan_nodes, ClusterBuilder, ClusterOrchestrator, ClusterSubscription, NodeConfigurationHook,
};
pub use node_supervisor::{classify_and_advance, Advance, NodeSubscription, NodeSupervisor};
pub use task_pipeline::{TaskPipeline, TaskRegistry};
