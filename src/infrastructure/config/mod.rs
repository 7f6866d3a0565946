//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment: defaults, project YAML files,
//! then `EPHEMERAL_CLUSTER_*` environment overrides, validated after merge.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
