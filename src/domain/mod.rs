//! Domain layer for ephemeral cluster supervision
//!
//! Configuration values, runtime state, classified log records, the error
//! taxonomy and the port traits infrastructure adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    ClusterError, ClusterResult, NodeError, NodeFailureReport, NodeResult, Phase, PipelineError,
};
