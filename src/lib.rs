//! Ephemeral Cluster - throwaway search clusters for tests and local development
//!
//! Plans, launches and supervises a small cluster of server processes, decides
//! from their log output when each node is ready, and tears everything down
//! again when the cluster is disposed.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the process/task ports
//! - **Service Layer** (`services`): log classification, node supervision,
//!   the lifecycle task pipeline and the cluster orchestrator
//! - **Infrastructure Layer** (`infrastructure`): process spawning, built-in
//!   tasks, configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ephemeral_cluster::infrastructure::process::CommandSpawner;
//! use ephemeral_cluster::infrastructure::tasks::default_registry;
//! use ephemeral_cluster::{ClusterBuilder, ClusterConfiguration};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClusterConfiguration::new("it", 3, 9200);
//!     let cluster = ClusterBuilder::new(config.clone(), Arc::new(CommandSpawner::new()))
//!         .tasks(default_registry(&config))
//!         .build()?;
//!     let _relay = cluster.start(Duration::from_secs(120)).await?;
//!     // talk to http://localhost:9200
//!     cluster.dispose().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{ClusterError, NodeError, PipelineError};
pub use domain::models::{
    ClassifiedLine, ClusterConfiguration, ClusterFeatures, ClusterFileSystem, Config,
    ConsoleLine, NodeConfiguration, NodeStatus, ParsedLogRecord,
};
pub use domain::ports::{ClusterTask, FnTask, NodeProcess, ProcessSpawner, TaskContext};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ClusterBuilder, ClusterOrchestrator, ClusterSubscription, NodeSupervisor, TaskPipeline,
    TaskRegistry,
};
