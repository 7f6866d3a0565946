//! Infrastructure layer
//!
//! Adapters behind the domain ports plus the ambient plumbing:
//! - `config`: hierarchical configuration loading
//! - `logging`: tracing subscriber setup
//! - `process`: spawning and killing node processes
//! - `tasks`: built-in lifecycle tasks

pub mod config;
pub mod logging;
pub mod process;
pub mod tasks;
