pub mod cluster;
pub mod config;
pub mod log_record;
pub mod node;

pub use cluster::{ClusterConfiguration, ClusterFeatures, ClusterFileSystem};
pub use config::{Config, LoggingConfig};
pub use log_record::{ClassifiedLine, ConsoleLine, ParsedLogRecord};
pub use node::{LaunchCommand, NodeConfiguration, NodeRuntimeState, NodeStatus, Readiness};
