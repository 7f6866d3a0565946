//! Process management
//!
//! `tokio::process` based implementation of the process ports, plus the
//! signal helpers used to take down a node's inner server process.

pub mod command;
pub mod signal;

pub use command::{ChildProcess, CommandSpawner};
pub use signal::terminate_pid;
