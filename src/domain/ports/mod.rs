//! Port trait definitions (Hexagonal Architecture)
//!
//! - `ProcessSpawner` / `NodeProcess`: launching and killing node processes
//! - `ClusterTask`: units of work run by the lifecycle pipeline

pub mod process;
pub mod task;

pub use process::{NodeProcess, OutputReader, ProcessOutput, ProcessSpawner};
pub use task::{ClusterTask, FnTask, TaskContext};
